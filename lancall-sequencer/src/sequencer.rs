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

//! The per-stream frame sequencer: buffering, chronological ordering, and
//! emission.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::DropReason;
use crate::frame::TimestampedFrame;
use crate::jitter::JitterEstimator;
use crate::policy::{DeliveryState, Readiness, ReadinessPolicy};
use crate::statistics::SequencerStats;
use crate::store::SequenceStore;

/// Tunables for one stream's sequencer.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Maximum number of frames buffered for the stream.
    pub max_buffer_size: usize,
    /// Queue depth below which emission waits (bounded by
    /// `reorder_timeout`) for more frames before committing to an order.
    pub jitter_buffer_size: usize,
    /// Maximum normalized frame age before a frame is dropped, in seconds.
    pub max_frame_age: f64,
    /// Largest missing sequence run the emitter will wait out.
    pub max_sequence_gap: u64,
    /// Maximum time to hold a frame for a missing predecessor, in seconds.
    pub reorder_timeout: f64,
    /// Nominal inter-frame period used by the jitter estimator, in seconds.
    pub nominal_frame_interval: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 20,
            jitter_buffer_size: 3,
            max_frame_age: 1.0,
            max_sequence_gap: 10,
            reorder_timeout: 0.100,
            nominal_frame_interval: 1.0 / 30.0,
        }
    }
}

impl SequencerConfig {
    /// Default configuration with an explicit buffer capacity.
    pub fn with_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size,
            ..Self::default()
        }
    }
}

/// Min-heap key: chronological order by capture timestamp, sequence number
/// as the tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderKey {
    capture_timestamp: f64,
    sequence_number: u64,
}

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.capture_timestamp
            .total_cmp(&other.capture_timestamp)
            .then_with(|| self.sequence_number.cmp(&other.sequence_number))
    }
}

/// Read-only snapshot of one sequencer's state, taken under its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    pub stream_id: String,
    /// Frames currently owned by the store.
    pub buffer_size: usize,
    /// Entries in the order queue, including housekeeping leftovers for
    /// frames that were already evicted.
    pub heap_size: usize,
    /// -1 until the first frame has been delivered.
    pub last_delivered_sequence: i64,
    pub clock_offset: f64,
    pub stats: SequencerStats,
}

/// Chronological frame sequencer for a single stream.
///
/// Frames arrive in any order through [`add_frame`](Self::add_frame); the
/// consumer polls [`get_next_frame`](Self::get_next_frame) at a fixed
/// cadence and receives frames in non-decreasing capture-timestamp order.
/// Both entry points also exist in explicit-time form (`*_at`) so tests and
/// simulations can drive a synthetic clock instead of sleeping.
pub struct FrameSequencer {
    stream_id: String,
    config: SequencerConfig,
    store: SequenceStore,
    order_queue: BinaryHeap<Reverse<OrderKey>>,
    delivery: DeliveryState,
    policy: ReadinessPolicy,
    jitter: JitterEstimator,
    /// `arrival - network_timestamp` of the first frame; normalizes age
    /// calculations across the unsynchronized sender/receiver clocks.
    clock_offset: Option<f64>,
    /// Sequence numbers that arrived after a higher sequence number was
    /// already buffered; drained into `frames_reordered` as they emit.
    out_of_order: HashSet<u64>,
    highest_received: Option<u64>,
    stats: SequencerStats,
}

impl FrameSequencer {
    pub fn new(stream_id: impl Into<String>, config: SequencerConfig) -> Self {
        let policy = ReadinessPolicy::new(config.max_sequence_gap, config.reorder_timeout);
        let jitter = JitterEstimator::new(config.nominal_frame_interval);
        Self {
            stream_id: stream_id.into(),
            config,
            store: SequenceStore::new(),
            order_queue: BinaryHeap::new(),
            delivery: DeliveryState::default(),
            policy,
            jitter,
            clock_offset: None,
            out_of_order: HashSet::new(),
            highest_received: None,
            stats: SequencerStats::default(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SequencerStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Ingest one decoded frame, stamping its arrival with the wall clock.
    pub fn add_frame(
        &mut self,
        sequence_number: u64,
        capture_timestamp: f64,
        network_timestamp: f64,
        payload: Vec<u8>,
    ) -> Result<(), DropReason> {
        self.add_frame_at(
            clock::now_secs(),
            sequence_number,
            capture_timestamp,
            network_timestamp,
            payload,
        )
    }

    /// [`add_frame`](Self::add_frame) with the arrival time supplied by the
    /// caller.
    pub fn add_frame_at(
        &mut self,
        arrival_timestamp: f64,
        sequence_number: u64,
        capture_timestamp: f64,
        network_timestamp: f64,
        payload: Vec<u8>,
    ) -> Result<(), DropReason> {
        self.stats.frame_received();

        self.jitter.on_arrival(arrival_timestamp);
        self.stats.average_jitter = self.jitter.average();

        let clock_offset = *self.clock_offset.get_or_insert_with(|| {
            let offset = arrival_timestamp - network_timestamp;
            log::info!(
                "initialized sequencer for {}: clock offset {offset:.3}s",
                self.stream_id
            );
            offset
        });

        if self.store.contains(sequence_number) {
            self.stats.frame_dropped_duplicate();
            log::debug!("dropped duplicate frame {sequence_number} on {}", self.stream_id);
            return Err(DropReason::DuplicateFrame(sequence_number));
        }

        let age = arrival_timestamp - (network_timestamp + clock_offset);
        if age > self.config.max_frame_age {
            self.stats.frame_dropped_old();
            log::debug!(
                "dropped old frame {sequence_number} (age {age:.3}s) on {}",
                self.stream_id
            );
            return Err(DropReason::TooOld {
                sequence: sequence_number,
                age_secs: age,
            });
        }

        if let Some(highest) = self.highest_received {
            if sequence_number < highest {
                self.out_of_order.insert(sequence_number);
            }
        }
        self.highest_received = Some(
            self.highest_received
                .map_or(sequence_number, |h| h.max(sequence_number)),
        );

        let frame = TimestampedFrame::new(
            self.stream_id.clone(),
            sequence_number,
            capture_timestamp,
            network_timestamp,
            arrival_timestamp,
            payload,
        );
        if self.store.insert(frame).is_ok() {
            self.order_queue.push(Reverse(OrderKey {
                capture_timestamp,
                sequence_number,
            }));
        }

        // Bounded housekeeping on the producer path: O(max_buffer_size).
        self.store
            .evict_older_than(arrival_timestamp, self.config.max_frame_age, &mut self.stats);
        self.store
            .evict_to_capacity(self.config.max_buffer_size, &mut self.stats);
        self.out_of_order.retain(|seq| self.store.contains(*seq));

        Ok(())
    }

    /// Emit the next frame in chronological order, or `None` if nothing is
    /// ready yet. Non-blocking; meant to be polled at a fixed cadence.
    pub fn get_next_frame(&mut self) -> Option<TimestampedFrame> {
        self.get_next_frame_at(clock::now_secs())
    }

    /// [`get_next_frame`](Self::get_next_frame) with the poll time supplied
    /// by the caller.
    pub fn get_next_frame_at(&mut self, now: f64) -> Option<TimestampedFrame> {
        loop {
            // Discard queue entries whose frame was already evicted; an
            // expected housekeeping case, not an error.
            let key = loop {
                let &Reverse(key) = self.order_queue.peek()?;
                if self.store.contains(key.sequence_number) {
                    break key;
                }
                self.order_queue.pop();
            };

            // Jitter-buffer gate: with a shallow queue, give stragglers a
            // bounded chance to arrive before committing to an order.
            if self.order_queue.len() < self.config.jitter_buffer_size {
                if let Some(frame) = self.store.get(key.sequence_number) {
                    if frame.wait_time(now) < self.config.reorder_timeout {
                        return None;
                    }
                }
            }

            self.order_queue.pop();

            let readiness = match self.store.get(key.sequence_number) {
                Some(frame) => self.policy.assess(frame, &self.delivery, now),
                None => continue,
            };

            match readiness {
                Readiness::Ready => {
                    let Some(frame) = self.store.remove(key.sequence_number) else {
                        continue;
                    };
                    if let Some(gap) = self.delivery.gap_to(frame.sequence_number) {
                        if gap > 1 {
                            self.stats.sequence_gap((gap - 1) as u64);
                            log::debug!(
                                "emitting frame {} over {} missing frames on {}",
                                frame.sequence_number,
                                gap - 1,
                                self.stream_id
                            );
                        }
                    }
                    if self.out_of_order.remove(&frame.sequence_number) {
                        self.stats.frame_reordered();
                    }
                    self.delivery.record(&frame);
                    self.stats.frame_displayed();
                    return Some(frame);
                }
                Readiness::Wait => {
                    // Never skip ahead past a pending frame; ask again on
                    // the next poll.
                    self.order_queue.push(Reverse(key));
                    return None;
                }
                Readiness::Stale => {
                    self.store.remove(key.sequence_number);
                    self.out_of_order.remove(&key.sequence_number);
                    self.stats.frame_dropped_old();
                    log::debug!(
                        "skipped stale frame {} on {}",
                        key.sequence_number,
                        self.stream_id
                    );
                }
            }
        }
    }

    /// Clear all buffered state and statistics. A reset sequencer behaves
    /// identically to a newly constructed one.
    pub fn reset(&mut self) {
        self.store.clear();
        self.order_queue.clear();
        self.delivery = DeliveryState::default();
        self.clock_offset = None;
        self.jitter.reset();
        self.out_of_order.clear();
        self.highest_received = None;
        self.stats = SequencerStats::default();
        log::info!("reset sequencer for {}", self.stream_id);
    }

    /// Consistent snapshot of buffer occupancy and statistics.
    pub fn get_buffer_status(&self) -> BufferStatus {
        BufferStatus {
            stream_id: self.stream_id.clone(),
            buffer_size: self.store.len(),
            heap_size: self.order_queue.len(),
            last_delivered_sequence: self.delivery.last_sequence.map_or(-1, |s| s as i64),
            clock_offset: self.clock_offset.unwrap_or(0.0),
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1000.0;

    fn sequencer() -> FrameSequencer {
        FrameSequencer::new("peer-1", SequencerConfig::default())
    }

    /// Adds a frame whose network timestamp equals its capture timestamp,
    /// so the first frame pins the clock offset and later ages stay small.
    fn add(seq: &mut FrameSequencer, arrival: f64, number: u64, capture_ts: f64) {
        seq.add_frame_at(arrival, number, capture_ts, capture_ts, vec![number as u8])
            .unwrap();
    }

    /// Polls with time advanced far enough that gates and timeouts have all
    /// expired.
    fn drain(seq: &mut FrameSequencer, now: f64) -> Vec<u64> {
        let mut emitted = Vec::new();
        while let Some(frame) = seq.get_next_frame_at(now) {
            emitted.push(frame.sequence_number);
        }
        emitted
    }

    #[test]
    fn reorder_scenario_emits_in_capture_order() {
        let mut seq = sequencer();
        add(&mut seq, T0, 0, 0.000);
        add(&mut seq, T0 + 0.01, 2, 0.067);
        add(&mut seq, T0 + 0.02, 1, 0.033);

        let emitted = drain(&mut seq, T0 + 0.2);
        assert_eq!(emitted, vec![0, 1, 2]);
        assert_eq!(seq.stats().frames_reordered, 1);
        assert_eq!(seq.stats().sequence_gaps, 0);
        assert_eq!(seq.stats().frames_displayed, 3);
    }

    #[test]
    fn gap_timeout_scenario_gives_up_after_the_timeout() {
        let mut seq = sequencer();
        add(&mut seq, T0, 0, 0.000);
        add(&mut seq, T0 + 0.01, 2, 0.067);

        // Frame 1 never arrives. Frame 0 emits once its own gate expires.
        assert_eq!(
            seq.get_next_frame_at(T0 + 0.12).map(|f| f.sequence_number),
            Some(0)
        );

        // Frame 2 waits out the reorder timeout, then emits with the gap
        // recorded.
        let frame = seq.get_next_frame_at(T0 + 0.12);
        assert_eq!(frame.map(|f| f.sequence_number), Some(2));
        assert_eq!(seq.stats().sequence_gaps, 1);
    }

    #[test]
    fn gap_below_timeout_keeps_waiting() {
        let mut config = SequencerConfig::default();
        config.jitter_buffer_size = 1; // isolate the policy from the depth gate
        let mut seq = FrameSequencer::new("peer-1", config);

        add(&mut seq, T0, 0, 0.000);
        assert_eq!(
            seq.get_next_frame_at(T0).map(|f| f.sequence_number),
            Some(0)
        );

        add(&mut seq, T0 + 0.01, 2, 0.067);
        // Within the reorder timeout the successor is held back.
        assert!(seq.get_next_frame_at(T0 + 0.05).is_none());
        // The late predecessor still slots in ahead of it.
        add(&mut seq, T0 + 0.06, 1, 0.033);
        assert_eq!(
            seq.get_next_frame_at(T0 + 0.07).map(|f| f.sequence_number),
            Some(1)
        );
        assert_eq!(
            seq.get_next_frame_at(T0 + 0.07).map(|f| f.sequence_number),
            Some(2)
        );
        assert_eq!(seq.stats().sequence_gaps, 0);
    }

    #[test]
    fn duplicate_scenario_counts_and_keeps_the_first() {
        let mut seq = sequencer();
        add(&mut seq, T0, 5, 0.1);

        let err = seq
            .add_frame_at(T0 + 0.01, 5, 0.1, 0.1, vec![0xFF])
            .unwrap_err();
        assert_eq!(err, DropReason::DuplicateFrame(5));

        let status = seq.get_buffer_status();
        assert_eq!(status.stats.frames_dropped_duplicate, 1);
        assert_eq!(status.stats.frames_received, 2);
        assert_eq!(status.buffer_size, 1);
    }

    #[test]
    fn stale_on_arrival_is_rejected_and_never_emitted() {
        let mut seq = sequencer();
        // First frame pins clock_offset = 1000.0 - 500.0 = 500.0.
        seq.add_frame_at(T0, 1, 0.0, 500.0, vec![1]).unwrap();

        // Arrives 1.5s (normalized) after it was sent.
        let err = seq
            .add_frame_at(T0 + 2.0, 2, 0.033, 500.5, vec![2])
            .unwrap_err();
        assert!(matches!(err, DropReason::TooOld { sequence: 2, .. }));
        assert_eq!(seq.stats().frames_dropped_old, 1);

        let emitted = drain(&mut seq, T0 + 3.0);
        assert_eq!(emitted, vec![1]);
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut seq = FrameSequencer::new("peer-1", SequencerConfig::with_buffer_size(5));
        for n in 0..12u64 {
            add(&mut seq, T0 + n as f64 * 0.001, n, n as f64 * 0.033);
            assert!(seq.get_buffer_status().buffer_size <= 5);
        }
        assert_eq!(seq.stats().frames_dropped_old, 7);

        // Evicted frames left housekeeping entries in the queue; emission
        // skips them without a hiccup.
        let emitted = drain(&mut seq, T0 + 1.0);
        assert_eq!(emitted, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn a_sequence_number_is_emitted_at_most_once() {
        let mut seq = sequencer();
        add(&mut seq, T0, 0, 0.000);
        add(&mut seq, T0 + 0.01, 1, 0.033);
        add(&mut seq, T0 + 0.02, 2, 0.067);
        assert_eq!(drain(&mut seq, T0 + 0.2), vec![0, 1, 2]);

        // The same frame arriving again is buffered (the store no longer
        // holds it) but skipped as stale at emission time.
        add(&mut seq, T0 + 0.3, 1, 0.033);
        assert!(seq.get_next_frame_at(T0 + 0.5).is_none());
        assert_eq!(seq.stats().frames_displayed, 3);
    }

    #[test]
    fn emission_never_regresses_in_capture_time() {
        let mut seq = sequencer();
        // A deterministic scramble with a lost frame (9) and a burst of
        // out-of-order arrivals.
        let arrivals: [u64; 11] = [3, 0, 1, 2, 6, 4, 5, 8, 7, 11, 10];
        for (i, &n) in arrivals.iter().enumerate() {
            add(&mut seq, T0 + i as f64 * 0.005, n, n as f64 * 0.033);
        }

        let emitted = drain(&mut seq, T0 + 0.5);
        assert_eq!(emitted.len(), 11);
        let mut last_ts = f64::NEG_INFINITY;
        for pair in emitted.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for &n in &emitted {
            let ts = n as f64 * 0.033;
            assert!(ts >= last_ts);
            last_ts = ts;
        }
        // Frame 9 never existed; its absence shows up as a recorded gap.
        assert!(!emitted.contains(&9));
    }

    #[test]
    fn shallow_queue_is_gated_until_the_timeout() {
        let mut seq = sequencer();
        add(&mut seq, T0, 0, 0.000);

        assert!(seq.get_next_frame_at(T0 + 0.02).is_none());
        assert_eq!(
            seq.get_next_frame_at(T0 + 0.11).map(|f| f.sequence_number),
            Some(0)
        );
    }

    #[test]
    fn reset_reproduces_a_fresh_sequencer() {
        let run = |seq: &mut FrameSequencer| {
            add(seq, T0, 0, 0.000);
            add(seq, T0 + 0.01, 2, 0.067);
            add(seq, T0 + 0.02, 1, 0.033);
            // A duplicate, so the counters exercise more than the happy path.
            let _ = seq.add_frame_at(T0 + 0.03, 2, 0.067, 0.067, vec![2]);
            drain(seq, T0 + 0.2)
        };

        let mut seq = sequencer();
        let first = run(&mut seq);
        let first_stats = seq.stats().clone();

        seq.reset();
        let status = seq.get_buffer_status();
        assert_eq!(status.buffer_size, 0);
        assert_eq!(status.heap_size, 0);
        assert_eq!(status.last_delivered_sequence, -1);
        assert_eq!(status.stats, SequencerStats::default());

        let second = run(&mut seq);
        assert_eq!(first, second);
        assert_eq!(&first_stats, seq.stats());

        let mut fresh = sequencer();
        let third = run(&mut fresh);
        assert_eq!(first, third);
        assert_eq!(&first_stats, fresh.stats());
    }

    #[test]
    fn status_reports_offset_and_delivery_sentinel() {
        let mut seq = sequencer();
        add(&mut seq, T0, 0, 0.000);
        let status = seq.get_buffer_status();
        assert_eq!(status.last_delivered_sequence, -1);
        assert!((status.clock_offset - T0).abs() < f64::EPSILON);
    }
}
