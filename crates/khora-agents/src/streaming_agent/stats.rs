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

//! Counters describing the streamer's activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, shared by the producers, the worker and the upload stage.
#[derive(Debug, Default)]
pub struct StreamingStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    compressed: AtomicU64,
    failed: AtomicU64,
    completed: AtomicU64,
    bytes_written: AtomicU64,
    ring_wait_us: AtomicU64,
}

/// A point-in-time copy of [`StreamingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted into the queue.
    pub submitted: u64,
    /// Requests refused at reservation (full queue, long path, stopped worker).
    pub rejected: u64,
    /// Entries published as ready.
    pub compressed: u64,
    /// Entries published as failed.
    pub failed: u64,
    /// Entries completed by the upload stage.
    pub completed: u64,
    /// Compressed bytes staged in the ring.
    pub bytes_written: u64,
    /// Total time the worker spent waiting for ring space.
    pub ring_wait: Duration,
}

impl StreamingStats {
    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            compressed: self.compressed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            ring_wait: Duration::from_micros(self.ring_wait_us.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compressed(&self, bytes: u64, ring_wait: Duration) {
        self.compressed.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.ring_wait_us
            .fetch_add(ring_wait.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}
