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

//! The data carried by one request slot.

use super::ring_buffer::RingSpan;
use khora_core::streaming::{CancelToken, StreamingError};
use khora_core::texture::{TextureFormat, TextureHandle, TextureInfo, TextureKind};
use std::fmt;
use std::path::PathBuf;

/// The logical index of a reservation.
///
/// Slot ids grow forever; the physical slot is `id % capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) u64);

impl SlotId {
    /// The reservation number, starting at 0.
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request to stream one texture from disk.
#[derive(Debug, Clone)]
pub struct TextureRequest {
    /// The renderer texture that receives the data.
    pub target: TextureHandle,
    /// The material role of the texture.
    pub kind: TextureKind,
    /// Whether a diffuse texture keeps its alpha channel.
    pub alpha_enabled: bool,
    /// The source image file.
    pub path: PathBuf,
    /// Cancels the request while it waits or is processed.
    pub cancel: CancelToken,
}

impl TextureRequest {
    /// Creates a request with alpha disabled and a fresh cancel token.
    pub fn new(target: TextureHandle, kind: TextureKind, path: impl Into<PathBuf>) -> Self {
        Self {
            target,
            kind,
            alpha_enabled: false,
            path: path.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the alpha flag.
    pub fn with_alpha(mut self, alpha_enabled: bool) -> Self {
        self.alpha_enabled = alpha_enabled;
        self
    }

    /// Replaces the cancel token with one the caller keeps a clone of.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The compressed format this request will be encoded into.
    pub fn format(&self) -> TextureFormat {
        TextureFormat::select(self.kind, self.alpha_enabled)
    }
}

/// What the worker produced for an entry.
#[derive(Debug)]
pub enum EntryOutcome {
    /// The compressed mip chain sits in `span` of the staging ring.
    Ready {
        /// Layout of the compressed chain.
        info: TextureInfo,
        /// Where the chain lives in the ring.
        span: RingSpan,
    },
    /// The entry was skipped. It owns no ring space.
    Failed(StreamingError),
}

impl EntryOutcome {
    /// Returns `true` for [`EntryOutcome::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, EntryOutcome::Ready { .. })
    }
}

/// The externally visible lifecycle of a slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Reserved and waiting for the worker.
    Pending,
    /// The worker is decoding or compressing it.
    Processing,
    /// Compressed data is ready for upload.
    Ready,
    /// The worker skipped it; the upload stage only needs to complete it.
    Failed,
    /// The upload stage completed it; the slot may already hold a newer entry.
    Completed,
}
