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

//! Bounded multi-producer, single-consumer queue of texture requests.
//!
//! The queue is a fixed array of `N` slots addressed by three monotonic
//! counters:
//!
//! - `reserved`: advanced by producers with a compare-and-swap,
//! - `processing`: advanced by the single streaming worker,
//! - `completed`: advanced by the upload stage once it is done with an entry.
//!
//! `completed <= processing <= reserved` and `reserved - completed <= N` hold
//! at all times. The top bit of the `reserved` word marks the queue closed,
//! so closing and reserving are ordered by the same compare-and-swap: once
//! the bit is set the reserved count is final. Each slot also carries an atomic state, so the worker never
//! reads a slot a producer is still writing, and the upload stage never reads
//! one the worker is still filling.
//!
//! Access is split into three role handles, returned by [`request_queue`]:
//! [`QueueProducer`] (cloneable), [`QueueConsumer`] and [`QueueCompleter`].

use super::entry::{EntryOutcome, EntryState, SlotId, TextureRequest};
use super::wake::WakeSignal;
use crossbeam_utils::{Backoff, CachePadded};
use khora_core::streaming::{StreamingError, StreamingResult};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FREE: u8 = 0;
const PENDING: u8 = 1;
const PROCESSING: u8 = 2;
const READY: u8 = 3;
const FAILED: u8 = 4;

/// Set in `reserved` once the queue is closed.
const CLOSED: u64 = 1 << 63;

struct Slot {
    state: AtomicU8,
    request: UnsafeCell<Option<TextureRequest>>,
    outcome: UnsafeCell<Option<EntryOutcome>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            request: UnsafeCell::new(None),
            outcome: UnsafeCell::new(None),
        }
    }
}

struct QueueShared {
    slots: Box<[Slot]>,
    reserved: CachePadded<AtomicU64>,
    processing: CachePadded<AtomicU64>,
    completed: CachePadded<AtomicU64>,
    wake: WakeSignal,
    max_path_len: usize,
}

// SAFETY: a slot's cells are only touched by the role that currently owns it,
// as given by its state: the reserving producer while it is FREE (and
// `completed` proves the previous occupant is gone), the worker while it is
// PROCESSING, and the completer while it is READY or FAILED. Every hand-over
// is a Release store of the state or counter, paired with an Acquire load.
unsafe impl Sync for QueueShared {}

impl QueueShared {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, index: u64) -> &Slot {
        &self.slots[(index % self.capacity()) as usize]
    }

    fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Acquire) & !CLOSED
    }

    fn is_closed(&self) -> bool {
        self.reserved.load(Ordering::Acquire) & CLOSED != 0
    }

    fn close(&self) {
        self.reserved.fetch_or(CLOSED, Ordering::AcqRel);
        self.wake.signal();
    }

    fn counters(&self) -> QueueCounters {
        // Loaded from the most downstream counter up, so the snapshot keeps
        // `completed <= processing <= reserved`.
        let completed = self.completed.load(Ordering::Acquire);
        let processing = self.processing.load(Ordering::Acquire);
        let reserved = self.reserved();
        QueueCounters {
            reserved,
            processing,
            completed,
        }
    }

    fn state(&self, id: SlotId) -> EntryState {
        if id.0 < self.completed.load(Ordering::Acquire) {
            return EntryState::Completed;
        }
        let state = self.slot(id.0).state.load(Ordering::Acquire);
        // The slot can only be recycled after `completed` passes `id`.
        if id.0 < self.completed.load(Ordering::Acquire) {
            return EntryState::Completed;
        }
        match state {
            PROCESSING => EntryState::Processing,
            READY => EntryState::Ready,
            FAILED => EntryState::Failed,
            _ => EntryState::Pending,
        }
    }

    fn is_empty(&self) -> bool {
        let counters = self.counters();
        counters.completed == counters.reserved
    }
}

/// A snapshot of the three queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounters {
    /// Total reservations ever made.
    pub reserved: u64,
    /// Total entries the worker has finished.
    pub processing: u64,
    /// Total entries the upload stage has completed.
    pub completed: u64,
}

impl QueueCounters {
    /// Entries holding a slot.
    pub fn in_flight(&self) -> u64 {
        self.reserved - self.completed
    }
}

/// Creates a queue with `capacity` slots that accepts paths of at most
/// `max_path_len` bytes.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn request_queue(
    capacity: usize,
    max_path_len: usize,
) -> (QueueProducer, QueueConsumer, QueueCompleter) {
    assert!(capacity > 0, "queue capacity must be non-zero");
    let shared = Arc::new(QueueShared {
        slots: (0..capacity).map(|_| Slot::new()).collect(),
        reserved: CachePadded::new(AtomicU64::new(0)),
        processing: CachePadded::new(AtomicU64::new(0)),
        completed: CachePadded::new(AtomicU64::new(0)),
        wake: WakeSignal::new(),
        max_path_len,
    });
    (
        QueueProducer {
            shared: Arc::clone(&shared),
        },
        QueueConsumer {
            shared: Arc::clone(&shared),
        },
        QueueCompleter { shared },
    )
}

/// The reserving side of the queue. Cheap to clone and share between threads.
#[derive(Clone)]
pub struct QueueProducer {
    shared: Arc<QueueShared>,
}

impl QueueProducer {
    /// Reserves the next slot for `request` and wakes the worker.
    ///
    /// Never blocks. When `N` entries are in flight the call fails with
    /// [`StreamingError::QueueFull`] and no counter changes. Once the queue is
    /// closed it fails with [`StreamingError::WorkerStopped`].
    pub fn try_reserve(&self, request: TextureRequest) -> StreamingResult<SlotId> {
        let path_len = request.path.as_os_str().len();
        if path_len > self.shared.max_path_len {
            return Err(StreamingError::PathTooLong {
                len: path_len,
                max: self.shared.max_path_len,
            });
        }

        let capacity = self.shared.capacity();
        let mut reserved = self.shared.reserved.load(Ordering::Acquire);
        let index = loop {
            if reserved & CLOSED != 0 {
                return Err(StreamingError::WorkerStopped);
            }
            let completed = self.shared.completed.load(Ordering::Acquire);
            if reserved.saturating_sub(completed) >= capacity {
                return Err(StreamingError::QueueFull {
                    capacity: capacity as usize,
                });
            }
            match self.shared.reserved.compare_exchange_weak(
                reserved,
                reserved + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break reserved,
                Err(actual) => reserved = actual,
            }
        };

        let slot = self.shared.slot(index);
        debug_assert_eq!(slot.state.load(Ordering::Acquire), FREE);
        // SAFETY: `completed > index - N` was observed above, so the previous
        // occupant has been completed and its slot is FREE. Only the producer
        // that won `index` touches the slot until it is marked PENDING.
        unsafe {
            *slot.request.get() = Some(request);
            *slot.outcome.get() = None;
        }
        slot.state.store(PENDING, Ordering::Release);
        self.shared.wake.signal();
        Ok(SlotId(index))
    }

    /// The lifecycle state of a reservation.
    pub fn state(&self, id: SlotId) -> EntryState {
        self.shared.state(id)
    }

    /// Number of slots (`N`).
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// A snapshot of the queue counters.
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }

    /// Returns `true` when every reservation has been completed.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// Rejects further reservations and wakes the worker so it can observe
    /// the closure.
    ///
    /// Every reservation that succeeded did so before the closure, so a
    /// consumer that sees the queue closed can drain it completely.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// The draining side of the queue. Exactly one exists, owned by the worker.
pub struct QueueConsumer {
    shared: Arc<QueueShared>,
}

impl QueueConsumer {
    /// Returns `true` if a reserved entry has not been processed yet.
    pub fn has_pending(&self) -> bool {
        self.shared.processing.load(Ordering::Relaxed) < self.shared.reserved()
    }

    /// Blocks up to `timeout` for a producer's wake-up.
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        self.shared.wake.wait(timeout)
    }

    /// Closes the queue from the consumer side, see [`QueueProducer::close`].
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns `true` once the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// A snapshot of the queue counters.
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }

    /// Takes the oldest unprocessed entry, in reservation order.
    ///
    /// Returns `None` when the worker has caught up. If the entry is reserved
    /// but its producer is still writing it, waits for the write to land.
    pub fn begin_next(&mut self) -> Option<ProcessingEntry<'_>> {
        let index = self.shared.processing.load(Ordering::Relaxed);
        if index >= self.shared.reserved() {
            return None;
        }

        let slot = self.shared.slot(index);
        let backoff = Backoff::new();
        while slot.state.load(Ordering::Acquire) != PENDING {
            backoff.snooze();
        }
        slot.state.store(PROCESSING, Ordering::Release);

        // SAFETY: the slot is PROCESSING, so only this consumer accesses it
        // until `finish` publishes the outcome. The Acquire load above orders
        // the producer's write before this read.
        let request = unsafe { &*slot.request.get() };
        let Some(request) = request.as_ref() else {
            unreachable!("pending slot {index} holds no request");
        };
        Some(ProcessingEntry {
            shared: &self.shared,
            index,
            request,
            finished: false,
        })
    }
}

/// An entry the worker is processing.
///
/// Dropping it without [`finish`](Self::finish) publishes it as failed with
/// [`StreamingError::WorkerStopped`], so the upload stage never stalls on it.
pub struct ProcessingEntry<'a> {
    shared: &'a QueueShared,
    index: u64,
    request: &'a TextureRequest,
    finished: bool,
}

impl ProcessingEntry<'_> {
    /// The reservation id of this entry.
    pub fn id(&self) -> SlotId {
        SlotId(self.index)
    }

    /// The request the producer submitted.
    pub fn request(&self) -> &TextureRequest {
        self.request
    }

    /// Publishes the outcome and hands the entry to the upload stage.
    ///
    /// The outcome, and every byte it refers to, is visible to the upload
    /// stage before the entry's state reads as ready or failed.
    pub fn finish(mut self, outcome: EntryOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: EntryOutcome) {
        debug_assert!(!self.finished, "entry {} published twice", self.index);
        let slot = self.shared.slot(self.index);
        let state = if outcome.is_ready() { READY } else { FAILED };
        // SAFETY: the slot is still PROCESSING and owned by this entry.
        unsafe {
            *slot.outcome.get() = Some(outcome);
        }
        slot.state.store(state, Ordering::Release);
        self.shared
            .processing
            .store(self.index + 1, Ordering::Release);
        self.finished = true;
    }
}

impl Drop for ProcessingEntry<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("Entry #{} dropped unfinished, marking it failed", self.index);
            self.publish(EntryOutcome::Failed(StreamingError::WorkerStopped));
        }
    }
}

/// An entry the worker has finished, as seen by the upload stage.
pub struct FinishedEntry<'a> {
    /// The reservation id.
    pub id: SlotId,
    /// The request as submitted.
    pub request: &'a TextureRequest,
    /// What the worker produced.
    pub outcome: &'a EntryOutcome,
}

/// The completing side of the queue. Exactly one exists, owned by the upload stage.
pub struct QueueCompleter {
    shared: Arc<QueueShared>,
}

impl QueueCompleter {
    /// The oldest finished entry that has not been completed yet.
    pub fn peek_finished(&self) -> Option<FinishedEntry<'_>> {
        let index = self.shared.completed.load(Ordering::Relaxed);
        if index >= self.shared.processing.load(Ordering::Acquire) {
            return None;
        }
        let slot = self.shared.slot(index);
        debug_assert!(matches!(slot.state.load(Ordering::Acquire), READY | FAILED));
        // SAFETY: `processing > index`, so the worker has published this slot
        // and will not touch it again; only the completer reads it until it
        // is completed.
        let (request, outcome) = unsafe { (&*slot.request.get(), &*slot.outcome.get()) };
        let (Some(request), Some(outcome)) = (request.as_ref(), outcome.as_ref()) else {
            unreachable!("finished slot {index} is missing its request or outcome");
        };
        Some(FinishedEntry {
            id: SlotId(index),
            request,
            outcome,
        })
    }

    /// Frees the slot of a finished entry for reuse.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not the oldest finished entry.
    pub fn complete(&mut self, id: SlotId) {
        let index = self.shared.completed.load(Ordering::Relaxed);
        assert_eq!(
            id.0, index,
            "entries must be completed in reservation order"
        );
        assert!(
            index < self.shared.processing.load(Ordering::Acquire),
            "entry {id} has not been finished by the worker"
        );
        let slot = self.shared.slot(index);
        // SAFETY: same ownership as in `peek_finished`; the `&mut self`
        // receiver guarantees no `FinishedEntry` borrow is still alive.
        unsafe {
            *slot.request.get() = None;
            *slot.outcome.get() = None;
        }
        slot.state.store(FREE, Ordering::Release);
        self.shared.completed.store(index + 1, Ordering::Release);
    }

    /// The lifecycle state of a reservation.
    pub fn state(&self, id: SlotId) -> EntryState {
        self.shared.state(id)
    }

    /// Returns `true` when every reservation has been completed.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// A snapshot of the queue counters.
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ring_buffer::texture_ring;
    use khora_core::texture::{TextureFormat, TextureHandle, TextureInfo, TextureKind};
    use std::collections::HashSet;
    use std::thread;

    fn request(n: u64) -> TextureRequest {
        TextureRequest::new(
            TextureHandle(n),
            TextureKind::Diffuse,
            format!("textures/{n}.png"),
        )
    }

    fn finish_failed(consumer: &mut QueueConsumer) -> SlotId {
        let entry = consumer.begin_next().expect("an entry is pending");
        let id = entry.id();
        entry.finish(EntryOutcome::Failed(StreamingError::Cancelled));
        id
    }

    #[test]
    fn test_reserve_until_full() {
        let (producer, _consumer, _completer) = request_queue(4, 64);
        for n in 0..4 {
            assert_eq!(producer.try_reserve(request(n)).unwrap().index(), n);
        }
        let before = producer.counters();
        let err = producer.try_reserve(request(4)).unwrap_err();
        assert!(matches!(err, StreamingError::QueueFull { capacity: 4 }));
        assert_eq!(producer.counters(), before, "a rejected reservation mutates nothing");
        assert_eq!(before.in_flight(), 4);
    }

    #[test]
    fn test_backpressure_leaves_entries_untouched() {
        let (producer, mut consumer, _completer) = request_queue(3, 64);
        let ids: Vec<_> = (0..3).map(|n| producer.try_reserve(request(n)).unwrap()).collect();
        assert!(producer.try_reserve(request(99)).is_err());

        for (n, id) in ids.iter().enumerate() {
            assert_eq!(producer.state(*id), EntryState::Pending);
            let entry = consumer.begin_next().unwrap();
            assert_eq!(entry.id(), *id);
            assert_eq!(entry.request().target, TextureHandle(n as u64));
            assert_eq!(entry.request().path.to_str(), Some(format!("textures/{n}.png").as_str()));
            entry.finish(EntryOutcome::Failed(StreamingError::Cancelled));
        }
    }

    #[test]
    fn test_drains_in_reservation_order() {
        let (producer, mut consumer, _completer) = request_queue(8, 64);
        for n in 0..6 {
            producer.try_reserve(request(n)).unwrap();
        }
        let mut seen = Vec::new();
        while let Some(entry) = consumer.begin_next() {
            seen.push(entry.id().index());
            entry.finish(EntryOutcome::Failed(StreamingError::Cancelled));
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert!(!consumer.has_pending());
    }

    #[test]
    fn test_completion_frees_slots_for_reuse() {
        let (producer, mut consumer, mut completer) = request_queue(2, 64);
        producer.try_reserve(request(0)).unwrap();
        producer.try_reserve(request(1)).unwrap();
        assert!(producer.try_reserve(request(2)).is_err());

        let first = finish_failed(&mut consumer);
        assert!(producer.try_reserve(request(2)).is_err(), "processing alone frees nothing");

        assert!(completer.peek_finished().is_some());
        completer.complete(first);
        assert_eq!(producer.state(first), EntryState::Completed);

        let third = producer.try_reserve(request(2)).unwrap();
        assert_eq!(third.index(), 2);
        assert_eq!(producer.state(third), EntryState::Pending);
        assert!(producer.counters().in_flight() <= 2);
    }

    #[test]
    fn test_publish_is_observed_once() {
        let (producer, mut consumer, completer) = request_queue(2, 64);
        let (mut writer, _reader) = texture_ring(64);
        let id = producer.try_reserve(request(0)).unwrap();
        assert_eq!(producer.state(id), EntryState::Pending);
        assert!(completer.peek_finished().is_none());

        let entry = consumer.begin_next().unwrap();
        assert_eq!(producer.state(id), EntryState::Processing);
        assert!(completer.peek_finished().is_none());

        let span = writer.try_allocate(8).unwrap().unwrap();
        writer.commit(&span);
        entry.finish(EntryOutcome::Ready {
            info: TextureInfo::new(4, 4, TextureFormat::Bc1RgbUnormSrgb),
            span,
        });
        assert_eq!(producer.state(id), EntryState::Ready);
        let finished = completer.peek_finished().unwrap();
        assert_eq!(finished.id, id);
        assert!(finished.outcome.is_ready());
    }

    #[test]
    fn test_dropped_entry_is_published_as_failed() {
        let (producer, mut consumer, completer) = request_queue(2, 64);
        let id = producer.try_reserve(request(0)).unwrap();
        drop(consumer.begin_next());
        assert_eq!(producer.state(id), EntryState::Failed);
        let finished = completer.peek_finished().unwrap();
        assert!(matches!(
            finished.outcome,
            EntryOutcome::Failed(StreamingError::WorkerStopped)
        ));
    }

    #[test]
    fn test_path_length_is_bounded() {
        let (producer, _consumer, _completer) = request_queue(2, 8);
        let long = TextureRequest::new(TextureHandle(0), TextureKind::Normal, "123456789.png");
        let err = producer.try_reserve(long).unwrap_err();
        assert!(matches!(err, StreamingError::PathTooLong { len: 13, max: 8 }));
        assert_eq!(producer.counters().reserved, 0);
    }

    #[test]
    fn test_closed_queue_rejects_reservations() {
        let (producer, consumer, _completer) = request_queue(2, 64);
        producer.close();
        assert!(consumer.is_closed());
        assert!(matches!(
            producer.try_reserve(request(0)),
            Err(StreamingError::WorkerStopped)
        ));
    }

    #[test]
    fn test_close_is_final_for_racing_producers() {
        const PRODUCERS: u64 = 4;

        for round in 0..50 {
            let (producer, mut consumer, _completer) = request_queue(256, 64);
            let accepted = Arc::new(AtomicU64::new(0));
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|p| {
                    let producer = producer.clone();
                    let accepted = Arc::clone(&accepted);
                    thread::spawn(move || {
                        for n in 0.. {
                            match producer.try_reserve(request(p * 1000 + n)) {
                                Ok(_) => {
                                    accepted.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(StreamingError::QueueFull { .. }) => thread::yield_now(),
                                Err(StreamingError::WorkerStopped) => break,
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                    })
                })
                .collect();

            for _ in 0..round % 5 {
                thread::yield_now();
            }
            consumer.close();
            let mut drained = 0;
            while let Some(entry) = consumer.begin_next() {
                entry.finish(EntryOutcome::Failed(StreamingError::WorkerStopped));
                drained += 1;
            }

            for handle in producers {
                handle.join().unwrap();
            }
            assert!(!consumer.has_pending(), "round {round}: a reservation landed after close");
            assert_eq!(drained, accepted.load(Ordering::Relaxed), "round {round}");
            assert_eq!(consumer.counters().reserved, drained);
            assert!(producer.is_closed());
        }
    }

    #[test]
    #[should_panic(expected = "reservation order")]
    fn test_out_of_order_completion_panics() {
        let (producer, mut consumer, mut completer) = request_queue(4, 64);
        producer.try_reserve(request(0)).unwrap();
        producer.try_reserve(request(1)).unwrap();
        finish_failed(&mut consumer);
        let second = finish_failed(&mut consumer);
        completer.complete(second);
    }

    #[test]
    fn test_concurrent_producers_never_oversubscribe() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 500;
        const CAPACITY: usize = 8;

        let (producer, mut consumer, mut completer) = request_queue(CAPACITY, 64);

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let producer = producer.clone();
                thread::spawn(move || {
                    let mut ids = Vec::new();
                    for n in 0..PER_PRODUCER {
                        loop {
                            match producer.try_reserve(request(p * PER_PRODUCER + n)) {
                                Ok(id) => {
                                    ids.push(id.index());
                                    break;
                                }
                                Err(StreamingError::QueueFull { .. }) => thread::yield_now(),
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                        assert!(producer.counters().in_flight() <= CAPACITY as u64);
                    }
                    ids
                })
            })
            .collect();

        let total = PRODUCERS * PER_PRODUCER;
        let mut drained = Vec::new();
        let mut targets = HashSet::new();
        while (drained.len() as u64) < total {
            if let Some(entry) = consumer.begin_next() {
                drained.push(entry.id().index());
                assert!(targets.insert(entry.request().target));
                entry.finish(EntryOutcome::Failed(StreamingError::Cancelled));
            }
            while let Some(id) = completer.peek_finished().map(|f| f.id) {
                completer.complete(id);
            }
            thread::yield_now();
        }

        let mut reserved: Vec<u64> = producers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        reserved.sort_unstable();
        assert_eq!(reserved, (0..total).collect::<Vec<_>>());
        assert_eq!(drained, (0..total).collect::<Vec<_>>(), "FIFO drain order");
        assert!(completer.is_empty());
    }
}
