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

//! Authoritative holder of not-yet-delivered frames for one stream.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::DropReason;
use crate::frame::TimestampedFrame;
use crate::statistics::SequencerStats;

/// Mapping from sequence number to buffered frame.
///
/// The store owns every frame between ingestion and emission; an entry
/// leaves exactly once, either through [`remove`](Self::remove) on emission
/// or through an eviction sweep.
#[derive(Debug, Default)]
pub struct SequenceStore {
    frames: HashMap<u64, TimestampedFrame>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, sequence_number: u64) -> bool {
        self.frames.contains_key(&sequence_number)
    }

    pub fn get(&self, sequence_number: u64) -> Option<&TimestampedFrame> {
        self.frames.get(&sequence_number)
    }

    /// Insert a frame. The first arrival wins; a second frame with the same
    /// sequence number is rejected, never overwritten.
    pub fn insert(&mut self, frame: TimestampedFrame) -> Result<(), DropReason> {
        match self.frames.entry(frame.sequence_number) {
            Entry::Occupied(_) => Err(DropReason::DuplicateFrame(frame.sequence_number)),
            Entry::Vacant(slot) => {
                slot.insert(frame);
                Ok(())
            }
        }
    }

    /// Remove and return a frame. `None` means the frame was already evicted
    /// by a sweep before the order queue got to it; callers treat that as a
    /// cue to skip the stale queue entry, not as a fault.
    pub fn remove(&mut self, sequence_number: u64) -> Option<TimestampedFrame> {
        self.frames.remove(&sequence_number)
    }

    /// Drop every frame that has sat in the buffer longer than `max_age`.
    pub fn evict_older_than(&mut self, now: f64, max_age: f64, stats: &mut SequencerStats) {
        let initial_len = self.frames.len();

        self.frames.retain(|_, frame| {
            let keep = frame.wait_time(now) <= max_age;
            if !keep {
                stats.frame_dropped_old();
            }
            keep
        });

        let evicted = initial_len - self.frames.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} stale frames");
        }
    }

    /// Keep only the `max_size` most-recent-by-capture-timestamp frames,
    /// evicting the rest.
    pub fn evict_to_capacity(&mut self, max_size: usize, stats: &mut SequencerStats) {
        if self.frames.len() <= max_size {
            return;
        }

        let mut by_capture: Vec<(u64, f64)> = self
            .frames
            .iter()
            .map(|(&seq, frame)| (seq, frame.capture_timestamp))
            .collect();
        by_capture.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut evicted = 0usize;
        for (seq, _) in by_capture.into_iter().skip(max_size) {
            self.frames.remove(&seq);
            stats.frame_dropped_old();
            evicted += 1;
        }
        log::debug!("capacity eviction removed {evicted} frames, kept {max_size}");
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(seq: u64, capture_ts: f64, arrival_ts: f64) -> TimestampedFrame {
        TimestampedFrame::new("peer-1".into(), seq, capture_ts, capture_ts, arrival_ts, vec![0; 8])
    }

    #[test]
    fn first_arrival_wins() {
        let mut store = SequenceStore::new();
        store.insert(test_frame(1, 0.0, 100.0)).unwrap();

        let err = store.insert(test_frame(1, 5.0, 101.0)).unwrap_err();
        assert_eq!(err, DropReason::DuplicateFrame(1));

        // Original entry untouched.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().capture_timestamp, 0.0);
    }

    #[test]
    fn remove_of_absent_sequence_is_tolerated() {
        let mut store = SequenceStore::new();
        assert!(store.remove(42).is_none());
    }

    #[test]
    fn age_sweep_drops_only_old_frames() {
        let mut store = SequenceStore::new();
        let mut stats = SequencerStats::default();

        store.insert(test_frame(1, 0.0, 100.0)).unwrap();
        store.insert(test_frame(2, 0.033, 100.9)).unwrap();

        store.evict_older_than(101.2, 1.0, &mut stats);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(1));
        assert!(store.contains(2));
        assert_eq!(stats.frames_dropped_old, 1);
    }

    #[test]
    fn capacity_eviction_keeps_newest_by_capture_timestamp() {
        let mut store = SequenceStore::new();
        let mut stats = SequencerStats::default();

        for seq in 0..6u64 {
            store.insert(test_frame(seq, seq as f64 * 0.033, 100.0)).unwrap();
        }

        store.evict_to_capacity(4, &mut stats);
        assert_eq!(store.len(), 4);
        assert!(!store.contains(0));
        assert!(!store.contains(1));
        for seq in 2..6u64 {
            assert!(store.contains(seq));
        }
        assert_eq!(stats.frames_dropped_old, 2);
    }

    #[test]
    fn capacity_eviction_is_a_no_op_under_the_limit() {
        let mut store = SequenceStore::new();
        let mut stats = SequencerStats::default();

        store.insert(test_frame(1, 0.0, 100.0)).unwrap();
        store.evict_to_capacity(4, &mut stats);

        assert_eq!(store.len(), 1);
        assert_eq!(stats.frames_dropped_old, 0);
    }
}
