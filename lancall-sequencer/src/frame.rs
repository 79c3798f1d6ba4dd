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

//! The fundamental data structure for time-stamped media frames.

use serde::{Deserialize, Serialize};

/// A decoded media frame paired with its sequencing metadata.
///
/// Constructed once on the packet-arrival path and never mutated afterwards.
/// Ownership moves into the [`SequenceStore`](crate::store::SequenceStore) on
/// insertion and out to the consumer on emission; the order queue only ever
/// holds `(capture_timestamp, sequence_number)` keys, not the frame itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedFrame {
    /// Monotonically increasing per-stream identifier assigned by the sender.
    pub sequence_number: u64,
    /// Sender-side capture time, in seconds. Shares a clock domain with the
    /// other frames of the stream, not with the receiver.
    pub capture_timestamp: f64,
    /// Sender-side send time, in seconds. Used to estimate the offset
    /// between the sender and receiver clocks.
    pub network_timestamp: f64,
    /// Receiver-side wall-clock time at ingestion, in seconds. Set once.
    pub arrival_timestamp: f64,
    /// Decoded media payload, opaque to the sequencer.
    pub payload: Vec<u8>,
    /// Owning stream.
    pub stream_id: String,
}

impl TimestampedFrame {
    pub fn new(
        stream_id: String,
        sequence_number: u64,
        capture_timestamp: f64,
        network_timestamp: f64,
        arrival_timestamp: f64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence_number,
            capture_timestamp,
            network_timestamp,
            arrival_timestamp,
            payload,
            stream_id,
        }
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Age of the frame at `now`, normalized into the receiver's clock
    /// domain via the stream's clock offset.
    pub fn age_at(&self, now: f64, clock_offset: f64) -> f64 {
        now - (self.network_timestamp + clock_offset)
    }

    /// Time this frame has spent buffered at the receiver.
    pub fn wait_time(&self, now: f64) -> f64 {
        now - self.arrival_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(network_ts: f64, arrival_ts: f64) -> TimestampedFrame {
        TimestampedFrame::new("peer-1".into(), 7, 0.0, network_ts, arrival_ts, vec![0; 16])
    }

    #[test]
    fn age_is_normalized_by_clock_offset() {
        // Sender clock runs 100s behind the receiver.
        let f = frame(900.0, 1000.0);
        let offset = 100.0;
        assert!((f.age_at(1000.0, offset) - 0.0).abs() < f64::EPSILON);
        assert!((f.age_at(1000.5, offset) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn wait_time_counts_from_arrival() {
        let f = frame(0.0, 1000.0);
        assert!((f.wait_time(1000.25) - 0.25).abs() < f64::EPSILON);
    }
}
