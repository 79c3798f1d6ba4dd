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

use thiserror::Error;

/// Result type for sequencing operations.
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Why a frame was rejected on the arrival path.
///
/// These are expected, per-frame outcomes: each one is counted in the
/// stream's statistics, and none of them must ever tear down a producer
/// task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The sequence number is already buffered; the first arrival wins.
    #[error("duplicate frame {0}")]
    DuplicateFrame(u64),

    /// The frame's normalized age exceeded the configured maximum.
    #[error("frame {sequence} too old ({age_secs:.3}s)")]
    TooOld { sequence: u64, age_secs: f64 },
}

/// Errors that can occur in sequencing operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequencerError {
    /// Operation referenced a stream id that was never registered, or was
    /// already unregistered. Indicates a stream-lifecycle bug in the caller.
    #[error("no stream registered under id `{0}`")]
    UnknownStream(String),

    /// A stream id was registered twice without an intervening unregister.
    #[error("stream `{0}` is already registered")]
    StreamAlreadyRegistered(String),

    /// The frame was rejected and counted; see [`DropReason`].
    #[error(transparent)]
    FrameDropped(#[from] DropReason),
}
