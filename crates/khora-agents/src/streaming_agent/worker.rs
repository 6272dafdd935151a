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

//! The background thread that drains the request queue.

use super::stats::StreamingStats;
use khora_core::streaming::StreamingError;
use khora_data::allocators::ScratchArena;
use khora_data::streaming::{EntryOutcome, QueueConsumer, RingWriter};
use khora_lanes::streaming_lane::TextureCompressionLane;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the worker does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    /// Entries are waiting; process one and check again.
    Draining,
    /// Caught up; block on the wake signal.
    Idle,
}

/// The single consumer of the request queue and writer of the ring.
pub(crate) struct StreamingWorker {
    consumer: QueueConsumer,
    ring: RingWriter,
    scratch: ScratchArena,
    lane: TextureCompressionLane,
    stats: Arc<StreamingStats>,
    running: Arc<AtomicBool>,
    idle_wait: Duration,
}

impl StreamingWorker {
    pub(crate) fn new(
        consumer: QueueConsumer,
        ring: RingWriter,
        scratch: ScratchArena,
        lane: TextureCompressionLane,
        stats: Arc<StreamingStats>,
        running: Arc<AtomicBool>,
        idle_wait: Duration,
    ) -> Self {
        Self {
            consumer,
            ring,
            scratch,
            lane,
            stats,
            running,
            idle_wait,
        }
    }

    /// Runs until `running` is cleared or the queue is closed, then closes the
    /// queue and fails whatever is still in it.
    pub(crate) fn run(mut self) {
        log::info!(
            "Texture streaming worker started (ring {} bytes, scratch {} bytes).",
            self.ring.capacity(),
            self.scratch.capacity()
        );

        let mut state = WorkerState::Idle;
        while self.running.load(Ordering::Acquire) && !self.consumer.is_closed() {
            let next = self.step();
            if next != state {
                log::trace!("Texture streaming worker {:?} -> {:?}", state, next);
                state = next;
            }
            if state == WorkerState::Idle && !self.consumer.wait_for_work(self.idle_wait) {
                log::trace!("Texture streaming worker woke up on timeout");
            }
        }

        // No reservation can land after this, so the drain below is complete.
        self.consumer.close();
        let abandoned = self.fail_remaining();
        if abandoned > 0 {
            log::warn!("{abandoned} queued textures were dropped at shutdown");
        }
        log::info!(
            "Texture streaming worker stopped (scratch high water {} bytes).",
            self.scratch.high_water()
        );
    }

    /// Processes the next entry if there is one.
    pub(crate) fn step(&mut self) -> WorkerState {
        let Some(entry) = self.consumer.begin_next() else {
            return WorkerState::Idle;
        };

        let id = entry.id();
        let request = entry.request();
        let outcome = match self.lane.process(request, &mut self.ring, &mut self.scratch) {
            Ok(texture) => {
                log::debug!(
                    "Texture {} '{}' staged as {:?}: {} mips, {} bytes",
                    id,
                    request.path.display(),
                    texture.info.format,
                    texture.info.mip_level_count,
                    texture.span.len()
                );
                self.stats
                    .record_compressed(texture.span.len() as u64, texture.ring_wait);
                EntryOutcome::Ready {
                    info: texture.info,
                    span: texture.span,
                }
            }
            Err(err) => {
                log::warn!(
                    "Skipping texture {} '{}': {}",
                    id,
                    request.path.display(),
                    err
                );
                self.stats.record_failed();
                EntryOutcome::Failed(err)
            }
        };
        entry.finish(outcome);
        WorkerState::Draining
    }

    fn fail_remaining(&mut self) -> usize {
        let mut count = 0;
        while let Some(entry) = self.consumer.begin_next() {
            entry.finish(EntryOutcome::Failed(StreamingError::WorkerStopped));
            self.stats.record_failed();
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use khora_core::streaming::{BlockCompressor, Downsampler, ImageDecoder, ImageHeader};
    use khora_core::texture::{BlockCodec, DownsampleMode, TextureHandle, TextureKind};
    use khora_data::streaming::{request_queue, texture_ring, EntryState, TextureRequest};
    use std::path::Path;

    struct FlatDecoder;

    impl ImageDecoder for FlatDecoder {
        fn probe(&self, path: &Path) -> Result<ImageHeader> {
            anyhow::ensure!(path.exists() || path.ends_with("ok.png"), "missing file");
            Ok(ImageHeader {
                width: 8,
                height: 8,
                source_channels: 4,
            })
        }

        fn decode_into(&self, path: &Path, dst: &mut [u8]) -> Result<ImageHeader> {
            let header = self.probe(path)?;
            dst.fill(255);
            Ok(header)
        }
    }

    struct NoopDownsampler;

    impl Downsampler for NoopDownsampler {
        fn resize(
            &self,
            _: &[u8],
            _: u32,
            _: u32,
            _: &mut [u8],
            _: u32,
            _: u32,
            _: DownsampleMode,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct ZeroCompressor;

    impl BlockCompressor for ZeroCompressor {
        fn compress_block(&self, dst: &mut [u8], _: &[u8], _: BlockCodec) -> Result<()> {
            dst.fill(0);
            Ok(())
        }
    }

    fn worker(
        consumer: QueueConsumer,
        ring: RingWriter,
        running: Arc<AtomicBool>,
    ) -> (StreamingWorker, Arc<StreamingStats>) {
        let stats = Arc::new(StreamingStats::default());
        let lane = TextureCompressionLane::new(
            Box::new(FlatDecoder),
            Box::new(NoopDownsampler),
            Box::new(ZeroCompressor),
            Duration::from_millis(20),
        );
        let worker = StreamingWorker::new(
            consumer,
            ring,
            ScratchArena::new(1024),
            lane,
            Arc::clone(&stats),
            running,
            Duration::from_millis(5),
        );
        (worker, stats)
    }

    #[test]
    fn test_step_drains_one_entry_at_a_time() {
        let (producer, consumer, _completer) = request_queue(4, 64);
        let (ring, _reader) = texture_ring(1024);
        let (mut worker, stats) = worker(consumer, ring, Arc::new(AtomicBool::new(true)));

        let a = producer
            .try_reserve(TextureRequest::new(TextureHandle(1), TextureKind::Diffuse, "ok.png"))
            .unwrap();
        let b = producer
            .try_reserve(TextureRequest::new(TextureHandle(2), TextureKind::Diffuse, "missing.png"))
            .unwrap();

        assert_eq!(worker.step(), WorkerState::Draining);
        assert_eq!(producer.state(a), EntryState::Ready);
        assert_eq!(producer.state(b), EntryState::Pending);

        assert_eq!(worker.step(), WorkerState::Draining);
        assert_eq!(producer.state(b), EntryState::Failed);
        assert_eq!(worker.step(), WorkerState::Idle);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.compressed, 1);
        assert_eq!(snapshot.failed, 1);
        // 8x8 BC1: 4 + 1 + 1 + 1 blocks.
        assert_eq!(snapshot.bytes_written, 56);
    }

    #[test]
    fn test_stopped_worker_fails_queued_entries() {
        let (producer, consumer, _completer) = request_queue(4, 64);
        let (ring, _reader) = texture_ring(1024);
        let (worker, stats) = worker(consumer, ring, Arc::new(AtomicBool::new(false)));

        let id = producer
            .try_reserve(TextureRequest::new(TextureHandle(1), TextureKind::Normal, "ok.png"))
            .unwrap();
        worker.run();

        assert_eq!(producer.state(id), EntryState::Failed);
        assert_eq!(stats.snapshot().failed, 1);
        assert!(
            matches!(
                producer.try_reserve(TextureRequest::new(TextureHandle(2), TextureKind::Normal, "ok.png")),
                Err(StreamingError::WorkerStopped)
            ),
            "A stopped worker closes the queue behind it"
        );
    }
}
