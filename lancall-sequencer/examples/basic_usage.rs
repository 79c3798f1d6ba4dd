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

use lancall_sequencer::{FrameSequencer, SequencerConfig};

fn main() {
    env_logger::init();

    println!("Frame Sequencer Example");
    println!("=======================");

    let config = SequencerConfig {
        max_buffer_size: 20,
        jitter_buffer_size: 3,
        reorder_timeout: 0.100,
        ..Default::default()
    };
    let mut sequencer = FrameSequencer::new("peer-1", config);

    // A scrambled 30 fps delivery: (sequence, capture time) pairs in the
    // order the network handed them over, with frame 6 lost entirely.
    let deliveries: [(u64, f64); 9] = [
        (0, 0.000),
        (1, 0.033),
        (3, 0.100),
        (2, 0.067),
        (5, 0.167),
        (4, 0.133),
        (7, 0.233),
        (8, 0.267),
        (9, 0.300),
    ];

    println!("\nIngesting {} frames out of order...", deliveries.len());
    let base = 1_000.0; // synthetic receiver clock, seconds
    for (i, &(seq, capture_ts)) in deliveries.iter().enumerate() {
        let arrival = base + i as f64 * 0.030;
        match sequencer.add_frame_at(arrival, seq, capture_ts, capture_ts, vec![0; 1000]) {
            Ok(()) => println!("  accepted frame {seq} (capture {capture_ts:.3}s)"),
            Err(reason) => println!("  rejected frame {seq}: {reason}"),
        }
    }

    println!("\nDraining in chronological order...");
    // Poll well past every reorder timeout so nothing is held back.
    let poll_time = base + 1.0;
    while let Some(frame) = sequencer.get_next_frame_at(poll_time) {
        println!(
            "  emitted frame {} (capture {:.3}s, {} bytes)",
            frame.sequence_number,
            frame.capture_timestamp,
            frame.payload_size()
        );
    }

    let status = sequencer.get_buffer_status();
    println!("\nFinal Statistics:");
    println!("=================");
    println!("Frames received:   {}", status.stats.frames_received);
    println!("Frames displayed:  {}", status.stats.frames_displayed);
    println!("Reordered frames:  {}", status.stats.frames_reordered);
    println!("Sequence gaps:     {}", status.stats.sequence_gaps);
    println!("Dropped (old):     {}", status.stats.frames_dropped_old);
    println!("Average jitter:    {:.1}ms", status.stats.average_jitter * 1000.0);
    println!("Last delivered:    {}", status.last_delivered_sequence);
}
