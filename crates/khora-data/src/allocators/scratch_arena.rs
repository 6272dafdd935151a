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

//! A bump allocator for per-entry scratch memory.
//!
//! The streaming worker pushes its downsample buffers into a [`ScratchArena`]
//! and rewinds it once the entry is done. [`ScratchArena::scope`] returns a
//! guard that rewinds on drop, so every exit path (success, decode failure,
//! cancellation, panic) releases the memory.

use khora_core::streaming::{StreamingError, StreamingResult};
use std::ops::{Deref, DerefMut, Range};

/// A position in the arena that can be restored later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaCheckpoint(usize);

/// A region handed out by [`ScratchArena::push`].
///
/// Spans are plain offsets; the bytes are accessed through the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchSpan {
    offset: usize,
    len: usize,
}

impl ScratchSpan {
    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the span holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// A fixed-capacity bump allocator with checkpoint/restore.
#[derive(Debug)]
pub struct ScratchArena {
    buf: Vec<u8>,
    offset: usize,
    high_water: usize,
}

impl ScratchArena {
    /// Creates an arena with `capacity` bytes, allocated up front.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            offset: 0,
            high_water: 0,
        }
    }

    /// Records the current top of the arena.
    pub fn checkpoint(&self) -> ArenaCheckpoint {
        ArenaCheckpoint(self.offset)
    }

    /// Releases everything pushed after `checkpoint`.
    pub fn restore(&mut self, checkpoint: ArenaCheckpoint) {
        debug_assert!(
            checkpoint.0 <= self.offset,
            "restoring to a checkpoint above the arena top"
        );
        self.offset = checkpoint.0.min(self.offset);
    }

    /// Reserves `size` bytes whose offset is a multiple of `align`.
    ///
    /// The returned bytes keep whatever a previous user left in them.
    pub fn push(&mut self, size: usize, align: usize) -> StreamingResult<ScratchSpan> {
        let align = align.max(1);
        let start = self.offset.next_multiple_of(align);
        let end = start.checked_add(size).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            return Err(StreamingError::ScratchExhausted {
                requested: size.saturating_add(start - self.offset),
                available: self.remaining(),
            });
        };
        self.offset = end;
        self.high_water = self.high_water.max(end);
        Ok(ScratchSpan { offset: start, len: size })
    }

    /// Shared access to a span's bytes.
    pub fn get(&self, span: ScratchSpan) -> &[u8] {
        &self.buf[span.range()]
    }

    /// Exclusive access to a span's bytes.
    pub fn get_mut(&mut self, span: ScratchSpan) -> &mut [u8] {
        &mut self.buf[span.range()]
    }

    /// Borrows `src` for reading and `dst` for writing at the same time.
    ///
    /// # Panics
    ///
    /// Panics if the two spans overlap.
    pub fn split_pair(&mut self, src: ScratchSpan, dst: ScratchSpan) -> (&[u8], &mut [u8]) {
        let (src_range, dst_range) = (src.range(), dst.range());
        assert!(
            src_range.end <= dst_range.start || dst_range.end <= src_range.start,
            "scratch spans overlap"
        );
        if src_range.end <= dst_range.start {
            let (low, high) = self.buf.split_at_mut(dst_range.start);
            (&low[src_range], &mut high[..dst.len])
        } else {
            let (low, high) = self.buf.split_at_mut(src_range.start);
            (&high[..src.len], &mut low[dst_range])
        }
    }

    /// Opens a scope whose pushes are released when the guard drops.
    pub fn scope(&mut self) -> ScratchScope<'_> {
        let checkpoint = self.checkpoint();
        ScratchScope {
            arena: self,
            checkpoint,
        }
    }

    /// Bytes currently pushed.
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still available (ignoring alignment).
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// The largest `used()` value ever reached.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

/// A guard that restores its arena to the checkpoint taken when it was opened.
pub struct ScratchScope<'a> {
    arena: &'a mut ScratchArena,
    checkpoint: ArenaCheckpoint,
}

impl Deref for ScratchScope<'_> {
    type Target = ScratchArena;

    fn deref(&self) -> &Self::Target {
        self.arena
    }
}

impl DerefMut for ScratchScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.arena
    }
}

impl Drop for ScratchScope<'_> {
    fn drop(&mut self) {
        self.arena.restore(self.checkpoint);
    }
}
