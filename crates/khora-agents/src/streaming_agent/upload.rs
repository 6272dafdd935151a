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

//! The upload side of the streamer: hands finished textures to the renderer
//! and gives their queue slot and ring space back.

use super::stats::StreamingStats;
use khora_core::streaming::StreamingError;
use khora_core::texture::{TextureHandle, TextureInfo};
use khora_data::streaming::{EntryOutcome, EntryState, QueueCompleter, RingReader, SlotId};
use std::path::Path;
use std::sync::Arc;

/// A compressed texture ready to be copied to the GPU.
#[derive(Debug)]
pub struct ReadyTexture<'a> {
    /// The queue entry it came from.
    pub id: SlotId,
    /// The renderer texture to fill.
    pub target: TextureHandle,
    /// Extent, mip count, format and swizzle of the chain.
    pub info: TextureInfo,
    /// The whole mip chain, mip 0 first.
    pub bytes: &'a [u8],
}

/// A request the worker could not turn into a texture.
///
/// The target keeps its placeholder; the entry still has to be completed.
#[derive(Debug)]
pub struct FailedTexture<'a> {
    /// The queue entry it came from.
    pub id: SlotId,
    /// The renderer texture that was requested.
    pub target: TextureHandle,
    /// The source file of the request.
    pub path: &'a Path,
    /// Why the entry was skipped.
    pub error: &'a StreamingError,
}

/// The oldest finished entry, as returned by [`UploadStage::poll_ready`].
#[derive(Debug)]
pub enum UploadEntry<'a> {
    /// Compressed data is waiting in the ring.
    Ready(ReadyTexture<'a>),
    /// The entry was skipped.
    Failed(FailedTexture<'a>),
}

impl UploadEntry<'_> {
    /// The queue entry id, to pass to [`UploadStage::complete`].
    pub fn id(&self) -> SlotId {
        match self {
            UploadEntry::Ready(texture) => texture.id,
            UploadEntry::Failed(texture) => texture.id,
        }
    }

    /// The renderer texture the entry targets.
    pub fn target(&self) -> TextureHandle {
        match self {
            UploadEntry::Ready(texture) => texture.target,
            UploadEntry::Failed(texture) => texture.target,
        }
    }
}

/// The GPU upload role.
///
/// Exactly one exists per streamer. It sees finished entries strictly in
/// reservation order, and [`complete`](Self::complete) is the only thing that
/// frees ring space and queue slots: an upload stage that stops completing
/// entries eventually stalls the worker, which then fails entries with
/// [`StreamingError::RingTimeout`].
pub struct UploadStage {
    completer: QueueCompleter,
    ring: RingReader,
    stats: Arc<StreamingStats>,
}

impl UploadStage {
    pub(crate) fn new(
        completer: QueueCompleter,
        ring: RingReader,
        stats: Arc<StreamingStats>,
    ) -> Self {
        Self {
            completer,
            ring,
            stats,
        }
    }

    /// The oldest entry the worker has finished, if any.
    pub fn poll_ready(&self) -> Option<UploadEntry<'_>> {
        let finished = self.completer.peek_finished()?;
        let target = finished.request.target;
        Some(match finished.outcome {
            EntryOutcome::Ready { info, span } => UploadEntry::Ready(ReadyTexture {
                id: finished.id,
                target,
                info: *info,
                bytes: self.ring.span(span),
            }),
            EntryOutcome::Failed(error) => UploadEntry::Failed(FailedTexture {
                id: finished.id,
                target,
                path: &finished.request.path,
                error,
            }),
        })
    }

    /// Releases the ring span of entry `id`, then frees its slot.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not the entry [`poll_ready`](Self::poll_ready) returns.
    pub fn complete(&mut self, id: SlotId) {
        let span = match self.completer.peek_finished() {
            Some(finished) if finished.id == id => match finished.outcome {
                EntryOutcome::Ready { span, .. } => Some(*span),
                EntryOutcome::Failed(_) => None,
            },
            _ => panic!("texture {id} is not the oldest finished entry"),
        };
        if let Some(span) = span {
            self.ring.release(&span);
        }
        self.completer.complete(id);
        self.stats.record_completed();
    }

    /// Hands every finished entry to `upload` and completes it.
    ///
    /// Returns the number of entries completed.
    pub fn drain_with(&mut self, mut upload: impl FnMut(UploadEntry<'_>)) -> usize {
        let mut count = 0;
        while let Some(entry) = self.poll_ready() {
            let id = entry.id();
            upload(entry);
            self.complete(id);
            count += 1;
        }
        count
    }

    /// The lifecycle state of a reservation.
    pub fn state(&self, id: SlotId) -> EntryState {
        self.completer.state(id)
    }

    /// Returns `true` when every reservation has been completed.
    pub fn is_empty(&self) -> bool {
        self.completer.is_empty()
    }

    /// Bytes of committed ring data not yet released.
    pub fn pending_bytes(&self) -> u64 {
        self.ring.pending_bytes()
    }
}
