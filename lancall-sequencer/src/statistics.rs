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

//! Per-stream sequencing statistics.

use serde::{Deserialize, Serialize};

/// Fixed set of per-stream counters, updated through typed increments and
/// copied out wholesale in status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequencerStats {
    /// Frames offered to `add_frame`, accepted or not.
    pub frames_received: u64,
    /// Frames emitted to the consumer.
    pub frames_displayed: u64,
    /// Frames dropped for age: rejected on arrival, evicted from the
    /// buffer, or skipped as stale at emission time.
    pub frames_dropped_old: u64,
    /// Frames dropped because their sequence number was already buffered.
    pub frames_dropped_duplicate: u64,
    /// Emitted frames that had been held back by out-of-order arrival.
    pub frames_reordered: u64,
    /// Missing sequence numbers skipped over at emission time.
    pub sequence_gaps: u64,
    /// Mean deviation of inter-arrival times from the nominal frame
    /// period, in seconds.
    pub average_jitter: f64,
}

impl SequencerStats {
    pub fn frame_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn frame_displayed(&mut self) {
        self.frames_displayed += 1;
    }

    pub fn frame_dropped_old(&mut self) {
        self.frames_dropped_old += 1;
    }

    pub fn frame_dropped_duplicate(&mut self) {
        self.frames_dropped_duplicate += 1;
    }

    pub fn frame_reordered(&mut self) {
        self.frames_reordered += 1;
    }

    /// Record a run of `missing` sequence numbers skipped at emission time.
    pub fn sequence_gap(&mut self, missing: u64) {
        self.sequence_gaps += missing;
    }
}
