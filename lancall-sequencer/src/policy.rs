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

//! Pure readiness decisions for the emission path.

use crate::frame::TimestampedFrame;

/// Outcome of a readiness check for the earliest queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Emit the frame now.
    Ready,
    /// Leave the frame queued and ask again on the next poll.
    Wait,
    /// The frame cannot be emitted without regressing in capture time;
    /// discard it.
    Stale,
}

/// What has already been shown to the consumer of one stream.
#[derive(Debug, Clone, Default)]
pub struct DeliveryState {
    /// Highest sequence number delivered so far; `None` before the first.
    pub last_sequence: Option<u64>,
    /// Latest capture timestamp delivered so far.
    pub last_timestamp: f64,
}

impl DeliveryState {
    /// Record an emission. Both fields are monotone: a delivered frame only
    /// ever moves them forward.
    pub fn record(&mut self, frame: &TimestampedFrame) {
        self.last_sequence = Some(match self.last_sequence {
            Some(last) => last.max(frame.sequence_number),
            None => frame.sequence_number,
        });
        self.last_timestamp = self.last_timestamp.max(frame.capture_timestamp);
    }

    /// Signed sequence distance from the last delivered frame; `None` before
    /// anything has been delivered.
    pub fn gap_to(&self, sequence_number: u64) -> Option<i64> {
        self.last_sequence
            .map(|last| sequence_number as i64 - last as i64)
    }
}

/// Decides whether the earliest queued frame should be emitted, held back,
/// or discarded.
///
/// This is the latency/smoothness trade at the heart of the sequencer: wait
/// a bounded time for a straggling predecessor, and never regress to an
/// earlier capture time once something later has shipped.
///
/// Sequence numbers are `u64` and are assumed not to wrap within a session.
/// A sender restart shows up as a negative gap with newer capture
/// timestamps and resynchronizes through the timestamp rule below.
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Largest missing run worth waiting out; beyond it, resynchronize.
    max_sequence_gap: u64,
    /// How long to hold a frame whose predecessors are missing, in seconds.
    reorder_timeout: f64,
}

impl ReadinessPolicy {
    pub fn new(max_sequence_gap: u64, reorder_timeout: f64) -> Self {
        Self {
            max_sequence_gap,
            reorder_timeout,
        }
    }

    pub fn assess(
        &self,
        frame: &TimestampedFrame,
        delivery: &DeliveryState,
        now: f64,
    ) -> Readiness {
        // Nothing delivered yet: the first frame bootstraps the stream.
        let Some(gap) = delivery.gap_to(frame.sequence_number) else {
            return Readiness::Ready;
        };

        if gap == 1 {
            return Readiness::Ready;
        }

        if gap > 1 {
            if gap as u64 > self.max_sequence_gap {
                // The gap is unrecoverable; stop waiting and resynchronize
                // on this frame.
                return Readiness::Ready;
            }
            // Give the missing in-between frames a bounded chance to arrive.
            if frame.wait_time(now) >= self.reorder_timeout {
                return Readiness::Ready;
            }
            return Readiness::Wait;
        }

        // Behind or equal to the last delivered sequence number: emit only
        // if capture time still moves forward.
        if frame.capture_timestamp > delivery.last_timestamp {
            Readiness::Ready
        } else {
            Readiness::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REORDER_TIMEOUT: f64 = 0.1;

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy::new(10, REORDER_TIMEOUT)
    }

    fn delivered(last_sequence: u64, last_timestamp: f64) -> DeliveryState {
        DeliveryState {
            last_sequence: Some(last_sequence),
            last_timestamp,
        }
    }

    fn frame(seq: u64, capture_ts: f64, arrival_ts: f64) -> TimestampedFrame {
        TimestampedFrame::new("peer-1".into(), seq, capture_ts, capture_ts, arrival_ts, vec![])
    }

    #[test]
    fn first_frame_is_always_ready() {
        let f = frame(17, 5.0, 1000.0);
        assert_eq!(
            policy().assess(&f, &DeliveryState::default(), 1000.0),
            Readiness::Ready
        );
    }

    #[test]
    fn next_in_sequence_is_ready() {
        let f = frame(6, 0.2, 1000.0);
        assert_eq!(
            policy().assess(&f, &delivered(5, 0.166), 1000.0),
            Readiness::Ready
        );
    }

    #[test]
    fn small_gap_waits_for_the_timeout() {
        let f = frame(7, 0.233, 1000.0);
        let state = delivered(5, 0.166);

        assert_eq!(policy().assess(&f, &state, 1000.05), Readiness::Wait);
        assert_eq!(
            policy().assess(&f, &state, 1000.0 + REORDER_TIMEOUT),
            Readiness::Ready
        );
    }

    #[test]
    fn unrecoverable_gap_is_ready_immediately() {
        let f = frame(100, 3.3, 1000.0);
        assert_eq!(
            policy().assess(&f, &delivered(5, 0.166), 1000.0),
            Readiness::Ready
        );
    }

    #[test]
    fn behind_sequence_with_newer_timestamp_is_ready() {
        // Sender restarted its counter but capture time moved forward.
        let f = frame(2, 0.5, 1000.0);
        assert_eq!(
            policy().assess(&f, &delivered(5, 0.166), 1000.0),
            Readiness::Ready
        );
    }

    #[test]
    fn behind_sequence_with_older_timestamp_is_stale() {
        let f = frame(2, 0.1, 1000.0);
        assert_eq!(
            policy().assess(&f, &delivered(5, 0.166), 1000.0),
            Readiness::Stale
        );
    }

    #[test]
    fn equal_sequence_with_equal_timestamp_is_stale() {
        let f = frame(5, 0.166, 1000.0);
        assert_eq!(
            policy().assess(&f, &delivered(5, 0.166), 1000.0),
            Readiness::Stale
        );
    }

    #[test]
    fn delivery_state_is_monotone() {
        let mut state = DeliveryState::default();
        state.record(&frame(5, 0.166, 1000.0));
        // A frame behind the maximum must not move either field backwards.
        state.record(&frame(3, 0.1, 1000.0));

        assert_eq!(state.last_sequence, Some(5));
        assert_eq!(state.last_timestamp, 0.166);
    }
}
