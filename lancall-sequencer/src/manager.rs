/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Multi-stream sequencing behind a fixed-cadence polling loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use web_time::{Duration, Instant};

use crate::clock;
use crate::error::{Result, SequencerError};
use crate::sequencer::{BufferStatus, FrameSequencer, SequencerConfig};

/// Callback invoked once per emitted frame, in emission order, from the
/// manager's polling thread. The receiver (e.g. a GUI layer) handles its
/// own thread-affinity marshaling.
pub type FrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Tunables for the polling loop.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Cadence of the polling loop.
    pub poll_interval: Duration,
    /// Upper bound on frames drained per stream per tick.
    pub max_frames_per_tick: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            // 60 Hz
            poll_interval: Duration::from_micros(16_667),
            max_frames_per_tick: 10,
        }
    }
}

struct StreamEntry {
    sequencer: Arc<Mutex<FrameSequencer>>,
    on_frame: FrameCallback,
}

type StreamMap = HashMap<String, StreamEntry>;

/// Owns one [`FrameSequencer`] per registered stream and drains ready
/// frames into each stream's output callback at a fixed cadence.
///
/// Construct one per session and tear it down with [`stop`](Self::stop)
/// (also run on drop); there is no process-wide instance. Streams make
/// independent progress: each sequencer sits behind its own lock, and no
/// lock is shared across streams.
pub struct SequencingManager {
    config: ManagerConfig,
    streams: Arc<Mutex<StreamMap>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SequencingManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            streams: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Register a stream with default sequencing tunables and an explicit
    /// buffer capacity.
    pub fn register_stream(
        &self,
        stream_id: impl Into<String>,
        on_frame: FrameCallback,
        max_buffer_size: usize,
    ) -> Result<()> {
        self.register_stream_with_config(
            stream_id,
            on_frame,
            SequencerConfig::with_buffer_size(max_buffer_size),
        )
    }

    pub fn register_stream_with_config(
        &self,
        stream_id: impl Into<String>,
        on_frame: FrameCallback,
        config: SequencerConfig,
    ) -> Result<()> {
        let stream_id = stream_id.into();
        let mut streams = lock_unpoisoned(&self.streams);
        if streams.contains_key(&stream_id) {
            return Err(SequencerError::StreamAlreadyRegistered(stream_id));
        }
        let sequencer = Arc::new(Mutex::new(FrameSequencer::new(stream_id.clone(), config)));
        log::info!("registered stream {stream_id}");
        streams.insert(stream_id, StreamEntry { sequencer, on_frame });
        Ok(())
    }

    /// Discard a stream's sequencer and every frame it still buffers.
    /// Safe to call while the polling loop is mid-tick: the loop works on a
    /// snapshot and simply stops seeing the stream on its next tick.
    pub fn unregister_stream(&self, stream_id: &str) -> Result<()> {
        match lock_unpoisoned(&self.streams).remove(stream_id) {
            Some(_) => {
                log::info!("unregistered stream {stream_id}");
                Ok(())
            }
            None => Err(SequencerError::UnknownStream(stream_id.to_string())),
        }
    }

    /// Pass one decoded frame to the owning stream's sequencer, stamping
    /// its arrival with the wall clock. Never blocks beyond the per-stream
    /// lock; safe on the transport hot path.
    pub fn add_frame(
        &self,
        stream_id: &str,
        sequence_number: u64,
        capture_timestamp: f64,
        network_timestamp: f64,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.add_frame_at(
            clock::now_secs(),
            stream_id,
            sequence_number,
            capture_timestamp,
            network_timestamp,
            payload,
        )
    }

    /// [`add_frame`](Self::add_frame) with the arrival time supplied by the
    /// caller.
    pub fn add_frame_at(
        &self,
        arrival_timestamp: f64,
        stream_id: &str,
        sequence_number: u64,
        capture_timestamp: f64,
        network_timestamp: f64,
        payload: Vec<u8>,
    ) -> Result<()> {
        let sequencer = self.sequencer_for(stream_id)?;
        // The map lock is already released; only this stream's lock is held
        // for the insertion.
        lock_unpoisoned(&sequencer).add_frame_at(
            arrival_timestamp,
            sequence_number,
            capture_timestamp,
            network_timestamp,
            payload,
        )?;
        Ok(())
    }

    /// Spawn the polling thread. Idempotent while running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let streams = Arc::clone(&self.streams);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        log::info!(
            "starting sequencing poll loop at {:?} cadence",
            config.poll_interval
        );
        self.worker = Some(std::thread::spawn(move || poll_loop(streams, running, config)));
    }

    /// Stop the polling thread and wait for it to exit. Registered streams
    /// and their buffered frames are kept.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            log::info!("stopped sequencing poll loop");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        lock_unpoisoned(&self.streams).len()
    }

    /// Consistent snapshot of one stream's buffer state and statistics.
    pub fn get_buffer_status(&self, stream_id: &str) -> Result<BufferStatus> {
        let sequencer = self.sequencer_for(stream_id)?;
        let status = lock_unpoisoned(&sequencer).get_buffer_status();
        Ok(status)
    }

    /// Status snapshots for every registered stream.
    pub fn get_all_status(&self) -> HashMap<String, BufferStatus> {
        let entries = self.snapshot();
        entries
            .into_iter()
            .map(|(id, sequencer, _)| {
                let status = lock_unpoisoned(&sequencer).get_buffer_status();
                (id, status)
            })
            .collect()
    }

    pub fn reset_stream(&self, stream_id: &str) -> Result<()> {
        let sequencer = self.sequencer_for(stream_id)?;
        lock_unpoisoned(&sequencer).reset();
        Ok(())
    }

    pub fn reset_all(&self) {
        for (_, sequencer, _) in self.snapshot() {
            lock_unpoisoned(&sequencer).reset();
        }
    }

    fn sequencer_for(&self, stream_id: &str) -> Result<Arc<Mutex<FrameSequencer>>> {
        let streams = lock_unpoisoned(&self.streams);
        streams
            .get(stream_id)
            .map(|entry| Arc::clone(&entry.sequencer))
            .ok_or_else(|| SequencerError::UnknownStream(stream_id.to_string()))
    }

    fn snapshot(&self) -> Vec<(String, Arc<Mutex<FrameSequencer>>, FrameCallback)> {
        let streams = lock_unpoisoned(&self.streams);
        streams
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    Arc::clone(&entry.sequencer),
                    Arc::clone(&entry.on_frame),
                )
            })
            .collect()
    }
}

impl Drop for SequencingManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(streams: Arc<Mutex<StreamMap>>, running: Arc<AtomicBool>, config: ManagerConfig) {
    while running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        // Copy-on-iterate: streams unregistered mid-tick keep their Arc
        // alive until the tick finishes, then disappear.
        let entries: Vec<(Arc<Mutex<FrameSequencer>>, FrameCallback)> = {
            let streams = lock_unpoisoned(&streams);
            streams
                .values()
                .map(|entry| (Arc::clone(&entry.sequencer), Arc::clone(&entry.on_frame)))
                .collect()
        };

        for (sequencer, on_frame) in entries {
            for _ in 0..config.max_frames_per_tick {
                // Hold the stream lock only for the poll itself; the
                // callback runs afterwards with the frame fully owned here.
                let frame = lock_unpoisoned(&sequencer).get_next_frame();
                match frame {
                    Some(frame) => on_frame(frame.payload),
                    None => break,
                }
            }
        }

        if let Some(remaining) = config.poll_interval.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
