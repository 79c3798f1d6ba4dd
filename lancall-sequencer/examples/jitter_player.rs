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

// This example does the following:
// 1. Spins up a SequencingManager with one stream per simulated sender.
// 2. Generates synthetic 30 fps frames on a producer thread per stream.
// 3. Injects loss, duplication, reordering, and random jitter delay.
// 4. Prints per-stream statistics once per second and a JSON summary at
//    the end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use lancall_sequencer::{ManagerConfig, SequencerConfig, SequencingManager};
use rand::seq::SliceRandom;
use rand::Rng;
use web_time::{Duration, Instant};

#[derive(Parser, Debug)]
#[clap(about = "Frame sequencer player with network simulation", version)]
struct Args {
    #[clap(long, default_value_t = 30, help = "Nominal source frame rate")]
    fps: u32,

    #[clap(long, default_value_t = 2, help = "Number of simulated streams")]
    streams: usize,

    #[clap(
        long,
        default_value_t = 40,
        help = "Maximum additional jitter delay in milliseconds (0-200ms recommended)"
    )]
    max_jitter_ms: u32,

    #[clap(
        long,
        default_value_t = 80,
        help = "Packet reordering window in milliseconds (0 disables reordering)"
    )]
    reorder_window_ms: u32,

    #[clap(long, default_value_t = 0.05, help = "Frame loss rate (0.0-1.0)")]
    loss_rate: f64,

    #[clap(long, default_value_t = 0.02, help = "Frame duplication rate (0.0-1.0)")]
    duplicate_rate: f64,

    #[clap(long, default_value_t = 10, help = "Seconds to run the simulation")]
    duration_secs: u64,
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let fps = args.fps.clamp(1, 240);
    let max_jitter_ms = args.max_jitter_ms.min(200);
    let reorder_window_ms = args.reorder_window_ms.min(500);
    let loss_rate = args.loss_rate.clamp(0.0, 1.0);
    let duplicate_rate = args.duplicate_rate.clamp(0.0, 1.0);

    log::info!(
        "simulation: {} streams at {fps} fps, jitter {max_jitter_ms}ms, \
         reorder window {reorder_window_ms}ms, loss rate {loss_rate:.2}, duplicate rate {duplicate_rate:.2}",
        args.streams
    );

    let mut manager = SequencingManager::new(ManagerConfig::default());

    // Register one stream per simulated sender. The callback stands in for
    // the display layer and just counts payloads.
    let mut delivered_counters = Vec::new();
    for n in 0..args.streams {
        let stream_id = format!("sender-{n}");
        let delivered = Arc::new(AtomicU64::new(0));
        delivered_counters.push((stream_id.clone(), Arc::clone(&delivered)));

        manager.register_stream_with_config(
            stream_id.as_str(),
            Arc::new(move |_payload: Vec<u8>| {
                delivered.fetch_add(1, Ordering::Relaxed);
            }),
            SequencerConfig {
                nominal_frame_interval: 1.0 / fps as f64,
                ..Default::default()
            },
        )?;
    }
    manager.start();

    let manager = Arc::new(manager);
    let run_for = Duration::from_secs(args.duration_secs.max(1));

    // One producer thread per stream, batching frames so that loss,
    // duplication and reordering can be applied per batch.
    let mut producers = Vec::new();
    for n in 0..args.streams {
        let stream_id = format!("sender-{n}");
        let manager = Arc::clone(&manager);
        producers.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
            let batch_len = ((reorder_window_ms as u64 * fps as u64) / 1000).max(1) as usize;
            let start = Instant::now();
            let mut sequence: u64 = 0;

            while start.elapsed() < run_for {
                // Capture a batch at the nominal cadence.
                let mut batch = Vec::with_capacity(batch_len + 2);
                for _ in 0..batch_len {
                    batch.push((sequence, wall_clock_secs()));
                    sequence += 1;
                    thread::sleep(frame_interval);
                }

                batch.retain(|_| rng.gen::<f64>() >= loss_rate);
                let duplicates: Vec<_> = batch
                    .iter()
                    .filter(|_| rng.gen::<f64>() < duplicate_rate)
                    .cloned()
                    .collect();
                batch.extend(duplicates);
                if reorder_window_ms > 0 {
                    batch.shuffle(&mut rng);
                }

                for (seq, capture_ts) in batch {
                    if max_jitter_ms > 0 {
                        let jitter = rng.gen_range(0..=max_jitter_ms as u64);
                        thread::sleep(Duration::from_millis(jitter));
                    }
                    let network_ts = wall_clock_secs();
                    // Drop results on the floor: duplicates and stale frames
                    // are expected products of the simulation.
                    let _ = manager.add_frame(&stream_id, seq, capture_ts, network_ts, vec![0; 1000]);
                }
            }
        }));
    }

    // Print statistics once per second while the producers run.
    let started = Instant::now();
    while started.elapsed() < run_for {
        thread::sleep(Duration::from_secs(1));
        for (stream_id, delivered) in &delivered_counters {
            if let Ok(status) = manager.get_buffer_status(stream_id) {
                println!(
                    "[STATS] {stream_id}: delivered={} displayed={} buffered={} gaps={} \
                     reordered={} dropped_old={} dup={} jitter={:.1}ms",
                    delivered.load(Ordering::Relaxed),
                    status.stats.frames_displayed,
                    status.buffer_size,
                    status.stats.sequence_gaps,
                    status.stats.frames_reordered,
                    status.stats.frames_dropped_old,
                    status.stats.frames_dropped_duplicate,
                    status.stats.average_jitter * 1000.0,
                );
            }
        }
    }

    for producer in producers {
        let _ = producer.join();
    }

    // Let the poll loop drain whatever is still ready, then dump a summary.
    thread::sleep(Duration::from_millis(500));
    println!("\nFinal status:");
    println!("{}", serde_json::to_string_pretty(&manager.get_all_status())?);

    Ok(())
}
