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

//! Fixed-capacity staging ring for compressed mip chains.
//!
//! The ring is split into two halves, mirroring a channel:
//!
//! - [`RingWriter`], owned by the streaming worker, allocates contiguous
//!   spans, fills them, and commits them.
//! - [`RingReader`], owned by the upload stage, reads committed spans and
//!   releases them once they have been copied to the GPU.
//!
//! Cursors are logical, monotonically increasing byte positions; the physical
//! offset is `position % capacity`. A span never straddles the physical end of
//! the buffer: when it would, the writer skips ahead to the next multiple of
//! the capacity and the skipped gap is reclaimed with the next release. If the
//! reader has already released everything, the gap is skipped on both cursors
//! at once, so an idle ring always accepts any span up to its capacity.
//!
//! ```text
//!   read_at          write_at   head
//!      |  committed     |  filling |      free
//! [----[################[##########]------------]
//! ```

use crossbeam_utils::{Backoff, CachePadded};
use khora_core::streaming::{CancelToken, StreamingError, StreamingResult};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A contiguous region of the ring, handed out by [`RingWriter::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpan {
    begin: u64,
    len: u64,
    offset: usize,
}

impl RingSpan {
    /// Physical byte offset of the span inside the ring storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the span holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical position of the first byte.
    pub fn logical_begin(&self) -> u64 {
        self.begin
    }

    /// Logical position one past the last byte.
    pub fn logical_end(&self) -> u64 {
        self.begin + self.len
    }
}

struct RingStorage {
    bytes: Box<[UnsafeCell<u8>]>,
    /// End of the last committed span. Written by the writer only.
    write_at: CachePadded<AtomicU64>,
    /// End of the last released span. Written by the reader, and by the
    /// writer only when skipping a wrap gap on a fully drained ring.
    read_at: CachePadded<AtomicU64>,
}

// SAFETY: the bytes are only reached through `RingWriter::span_mut` and
// `RingReader::span`. The writer only touches `[write_at, head)`, the reader
// only touches `[read_at, write_at)`, and `head - read_at <= capacity`, so the
// two halves never alias the same byte. The writer moves `read_at` only while
// `[read_at, head)` is empty.
unsafe impl Sync for RingStorage {}

impl RingStorage {
    fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.bytes.as_ptr())
    }
}

/// Creates a staging ring of `capacity` bytes and returns its two halves.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn texture_ring(capacity: usize) -> (RingWriter, RingReader) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let storage = Arc::new(RingStorage {
        bytes: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        write_at: CachePadded::new(AtomicU64::new(0)),
        read_at: CachePadded::new(AtomicU64::new(0)),
    });
    (
        RingWriter {
            storage: Arc::clone(&storage),
            head: 0,
            previous_head: 0,
        },
        RingReader { storage },
    )
}

/// The allocating half of the ring. Owned by the single streaming worker.
pub struct RingWriter {
    storage: Arc<RingStorage>,
    /// End of the last allocated span, committed or not.
    head: u64,
    /// `head` before the latest allocation, for [`RingWriter::abandon`].
    previous_head: u64,
}

impl RingWriter {
    /// Capacity of the ring in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.bytes.len()
    }

    /// End of the last allocated span.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// End of the last committed span.
    pub fn write_at(&self) -> u64 {
        self.storage.write_at.load(Ordering::Relaxed)
    }

    /// Allocates `size` contiguous bytes without waiting.
    ///
    /// Returns `None` if the span does not fit until the reader releases more.
    pub fn try_allocate(&mut self, size: u64) -> StreamingResult<Option<RingSpan>> {
        let begin = self.placement(size)?;
        if !self.has_room(begin, size) {
            return Ok(None);
        }
        Ok(Some(self.claim(begin, size)))
    }

    /// Allocates `size` contiguous bytes, spinning until the reader has freed
    /// enough room.
    ///
    /// Gives up with [`StreamingError::RingTimeout`] after `timeout`, or with
    /// [`StreamingError::Cancelled`] once any of `cancel` fires. Neither
    /// outcome moves any cursor.
    pub fn allocate(
        &mut self,
        size: u64,
        timeout: Duration,
        cancel: &[&CancelToken],
    ) -> StreamingResult<RingSpan> {
        let begin = self.placement(size)?;

        let started = Instant::now();
        let backoff = Backoff::new();
        let mut stalled = false;
        loop {
            if self.has_room(begin, size) {
                break;
            }
            if cancel.iter().any(|token| token.is_cancelled()) {
                return Err(StreamingError::Cancelled);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(StreamingError::RingTimeout {
                    requested: size,
                    waited,
                });
            }
            stalled = true;
            backoff.snooze();
        }

        if stalled {
            log::trace!("Ring allocation of {size} bytes waited {:?}", started.elapsed());
        }
        Ok(self.claim(begin, size))
    }

    /// Exclusive access to an allocated, not yet committed span.
    ///
    /// # Panics
    ///
    /// Panics if the span was already committed or was never allocated.
    pub fn span_mut(&mut self, span: &RingSpan) -> &mut [u8] {
        let write_at = self.storage.write_at.load(Ordering::Relaxed);
        assert!(
            span.logical_begin() >= write_at && span.logical_end() <= self.head,
            "span {:?} is not owned by the writer (write_at={write_at}, head={})",
            span,
            self.head
        );
        // SAFETY: `[begin, end)` lies between `write_at` and `head`, which the
        // reader never accesses, and `offset + len <= capacity` by placement.
        // The `&mut self` receiver prevents a second live slice.
        unsafe {
            std::slice::from_raw_parts_mut(self.storage.base_ptr().add(span.offset), span.len())
        }
    }

    /// Publishes a filled span to the reader.
    ///
    /// Every byte written through [`span_mut`](Self::span_mut) happens-before
    /// a reader that observes the new `write_at`.
    pub fn commit(&mut self, span: &RingSpan) {
        let write_at = self.storage.write_at.load(Ordering::Relaxed);
        debug_assert!(span.logical_end() <= self.head);
        if span.logical_end() > write_at {
            self.storage
                .write_at
                .store(span.logical_end(), Ordering::Release);
        }
    }

    /// Gives back the most recent, uncommitted allocation.
    ///
    /// Used when an entry fails after its span was allocated, so that the
    /// span does not hold ring space nobody will ever release.
    pub fn abandon(&mut self, span: &RingSpan) {
        let write_at = self.storage.write_at.load(Ordering::Relaxed);
        if span.logical_end() == self.head && span.logical_begin() >= write_at {
            self.head = self.previous_head;
        } else {
            log::warn!("Ignoring abandon of {span:?}: it is not the latest allocation");
        }
    }

    /// Chooses where a span of `size` bytes would start.
    fn placement(&self, size: u64) -> StreamingResult<u64> {
        let capacity = self.storage.capacity();
        if size > capacity {
            return Err(StreamingError::SpanTooLarge {
                requested: size,
                capacity,
            });
        }
        let begin = self.head;
        if size > 0 && begin % capacity + size > capacity {
            return Ok(begin.next_multiple_of(capacity));
        }
        Ok(begin)
    }

    /// Whether `[begin, begin + size)` fits without overrunning unread bytes.
    ///
    /// When it does not only because of the wrap gap and the reader has
    /// released everything up to `head`, both cursors jump to `begin`.
    fn has_room(&mut self, begin: u64, size: u64) -> bool {
        let read_at = self.storage.read_at.load(Ordering::Acquire);
        if begin + size - read_at <= self.storage.capacity() {
            return true;
        }
        if begin > self.head && read_at == self.head {
            // `read_at == head` leaves nothing committed or allocated, so the
            // reader has no span left to release and cannot race these stores.
            self.storage.write_at.store(begin, Ordering::Release);
            self.storage.read_at.store(begin, Ordering::Release);
            self.head = begin;
            return true;
        }
        false
    }

    fn claim(&mut self, begin: u64, size: u64) -> RingSpan {
        self.previous_head = self.head;
        self.head = begin + size;
        RingSpan {
            begin,
            len: size,
            offset: (begin % self.storage.capacity()) as usize,
        }
    }
}

/// The consuming half of the ring. Owned by the upload stage.
pub struct RingReader {
    storage: Arc<RingStorage>,
}

impl RingReader {
    /// Capacity of the ring in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.bytes.len()
    }

    /// End of the last released span.
    pub fn read_at(&self) -> u64 {
        self.storage.read_at.load(Ordering::Relaxed)
    }

    /// End of the last committed span.
    pub fn write_at(&self) -> u64 {
        self.storage.write_at.load(Ordering::Acquire)
    }

    /// Committed bytes not yet released, including wrap padding.
    pub fn pending_bytes(&self) -> u64 {
        // `read_at` first: a writer skipping a wrap gap moves `write_at`
        // before `read_at`, so this order never sees `read_at > write_at`.
        let read_at = self.storage.read_at.load(Ordering::Acquire);
        self.write_at() - read_at
    }

    /// Shared access to a committed, not yet released span.
    ///
    /// # Panics
    ///
    /// Panics if the span is not in the committed window.
    pub fn span(&self, span: &RingSpan) -> &[u8] {
        let read_at = self.storage.read_at.load(Ordering::Acquire);
        let write_at = self.write_at();
        assert!(
            span.logical_begin() >= read_at && span.logical_end() <= write_at,
            "span {:?} is outside the committed window [{read_at}, {write_at})",
            span
        );
        // SAFETY: `[begin, end)` lies in `[read_at, write_at)`, which the writer
        // no longer touches, and the Acquire load of `write_at` orders the
        // writer's stores before this read.
        unsafe { std::slice::from_raw_parts(self.storage.base_ptr().add(span.offset), span.len()) }
    }

    /// Frees every byte up to the end of `span`, including any wrap padding
    /// before it.
    pub fn release(&mut self, span: &RingSpan) {
        let read_at = self.read_at();
        debug_assert!(span.logical_end() <= self.write_at());
        if span.logical_end() > read_at {
            self.storage
                .read_at
                .store(span.logical_end(), Ordering::Release);
        }
    }
}
