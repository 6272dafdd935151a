// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines the error taxonomy of the texture streaming pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// An error produced while reserving, processing, or staging a streamed texture.
///
/// None of these are fatal for the pipeline: a failed reservation is reported
/// to the caller, and a failed entry is published as failed while the worker
/// keeps draining.
#[derive(Debug, Error)]
pub enum StreamingError {
    /// Every request slot is reserved and not yet completed by the upload stage.
    #[error("texture request queue is full ({capacity} slots in flight)")]
    QueueFull {
        /// The queue capacity `N`.
        capacity: usize,
    },
    /// The source path exceeds the stored path bound.
    #[error("texture path is {len} bytes long, the limit is {max}")]
    PathTooLong {
        /// Length of the rejected path in bytes.
        len: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The decoder could not read or decode the source image.
    #[error("failed to decode '{}': {reason}", path.display())]
    DecodeFailure {
        /// The source file that failed.
        path: PathBuf,
        /// The rendered decoder error chain.
        reason: String,
    },
    /// The downsampler or block compressor failed on the decoded image.
    #[error("failed to encode the mip chain of '{}': {reason}", path.display())]
    EncodeFailure {
        /// The source file whose chain was being encoded.
        path: PathBuf,
        /// The rendered capability error chain.
        reason: String,
    },
    /// The upload stage did not free enough ring space in time.
    #[error("timed out after {waited:?} waiting for {requested} bytes of ring space")]
    RingTimeout {
        /// Size of the span that could not be allocated.
        requested: u64,
        /// How long the worker waited.
        waited: Duration,
    },
    /// The mip chain can never fit in the ring buffer.
    #[error("mip chain of {requested} bytes exceeds the ring capacity of {capacity} bytes")]
    SpanTooLarge {
        /// Size of the requested span.
        requested: u64,
        /// The ring buffer capacity.
        capacity: u64,
    },
    /// The scratch arena cannot hold the decoded image and its mip buffers.
    #[error("scratch arena exhausted: {requested} bytes requested, {available} available")]
    ScratchExhausted {
        /// Bytes requested, including alignment padding.
        requested: usize,
        /// Bytes left in the arena.
        available: usize,
    },
    /// The request was cancelled through its token.
    #[error("texture request was cancelled")]
    Cancelled,
    /// The streaming worker has been shut down.
    #[error("texture streaming worker is not running")]
    WorkerStopped,
}

impl StreamingError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamingError::QueueFull { .. } | StreamingError::RingTimeout { .. }
        )
    }
}

/// A specialized `Result` type for streaming operations.
pub type StreamingResult<T> = Result<T, StreamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = StreamingError::QueueFull { capacity: 4 };
        assert_eq!(
            err.to_string(),
            "texture request queue is full (4 slots in flight)"
        );

        let err = StreamingError::DecodeFailure {
            path: PathBuf::from("textures/missing.png"),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to decode 'textures/missing.png': No such file or directory"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StreamingError::QueueFull { capacity: 1 }.is_retryable());
        assert!(StreamingError::RingTimeout {
            requested: 8,
            waited: Duration::from_millis(1),
        }
        .is_retryable());
        assert!(!StreamingError::Cancelled.is_retryable());
        assert!(!StreamingError::EncodeFailure {
            path: PathBuf::from("a.png"),
            reason: "bad block".to_string(),
        }
        .is_retryable());
        assert!(!StreamingError::SpanTooLarge {
            requested: 2,
            capacity: 1,
        }
        .is_retryable());
    }
}
