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

//! The public entry point of texture streaming.

use super::stats::{StatsSnapshot, StreamingStats};
use super::upload::UploadStage;
use super::worker::StreamingWorker;
use anyhow::{Context, Result};
use khora_core::streaming::{CancelToken, StreamingConfig, StreamingResult};
use khora_core::texture::{TextureHandle, TextureKind};
use khora_data::allocators::ScratchArena;
use khora_data::streaming::{
    request_queue, texture_ring, EntryState, QueueProducer, SlotId, TextureRequest,
};
use khora_lanes::streaming_lane::TextureCompressionLane;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// A cloneable handle for submitting texture loads from any thread.
#[derive(Clone)]
pub struct TextureProducer {
    queue: QueueProducer,
    stats: Arc<StreamingStats>,
}

impl TextureProducer {
    /// Queues `path` to be decoded, compressed and staged for `target`.
    ///
    /// Never blocks. A full queue is reported as
    /// [`QueueFull`](khora_core::streaming::StreamingError::QueueFull), which
    /// is worth retrying once the upload stage has completed some entries.
    pub fn reserve_texture_load(
        &self,
        target: TextureHandle,
        kind: TextureKind,
        alpha_enabled: bool,
        path: impl Into<PathBuf>,
    ) -> StreamingResult<SlotId> {
        self.submit(TextureRequest::new(target, kind, path).with_alpha(alpha_enabled))
    }

    /// Queues a fully built request, e.g. one carrying a cancel token.
    pub fn submit(&self, request: TextureRequest) -> StreamingResult<SlotId> {
        match self.queue.try_reserve(request) {
            Ok(id) => {
                self.stats.record_submitted();
                Ok(id)
            }
            Err(err) => {
                self.stats.record_rejected();
                log::warn!("Texture load rejected: {err}");
                Err(err)
            }
        }
    }

    /// The lifecycle state of a reservation.
    pub fn state(&self, id: SlotId) -> EntryState {
        self.queue.state(id)
    }

    /// Returns `true` when every reservation has been completed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Owns the streaming worker thread.
///
/// Created together with its [`UploadStage`] by [`TextureStreamer::new`].
/// Dropping the streamer shuts the worker down.
pub struct TextureStreamer {
    producer: TextureProducer,
    stats: Arc<StreamingStats>,
    running: Arc<AtomicBool>,
    interrupt: CancelToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl TextureStreamer {
    /// Starts a streamer with the default decoder, downsampler and compressor.
    pub fn new(config: &StreamingConfig) -> Result<(Self, UploadStage)> {
        let lane = TextureCompressionLane::with_defaults(config.ring_wait_timeout());
        Self::with_lane(config, lane)
    }

    /// Starts a streamer around a custom compression lane.
    pub fn with_lane(
        config: &StreamingConfig,
        lane: TextureCompressionLane,
    ) -> Result<(Self, UploadStage)> {
        config.validate().context("Invalid streaming configuration")?;

        let (queue, consumer, completer) =
            request_queue(config.queue_capacity, config.max_path_len);
        let (ring_writer, ring_reader) = texture_ring(config.ring_capacity);
        let stats = Arc::new(StreamingStats::default());
        let running = Arc::new(AtomicBool::new(true));
        let interrupt = CancelToken::new();

        let worker = StreamingWorker::new(
            consumer,
            ring_writer,
            ScratchArena::new(config.scratch_capacity),
            lane.with_shutdown_token(interrupt.clone()),
            Arc::clone(&stats),
            Arc::clone(&running),
            config.idle_wait(),
        );
        let handle = thread::Builder::new()
            .name("khora-texture-streamer".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn the texture streaming worker")?;

        let streamer = Self {
            producer: TextureProducer {
                queue,
                stats: Arc::clone(&stats),
            },
            stats: Arc::clone(&stats),
            running,
            interrupt,
            handle: Some(handle),
        };
        let upload = UploadStage::new(completer, ring_reader, stats);
        Ok((streamer, upload))
    }

    /// See [`TextureProducer::reserve_texture_load`].
    pub fn reserve_texture_load(
        &self,
        target: TextureHandle,
        kind: TextureKind,
        alpha_enabled: bool,
        path: impl Into<PathBuf>,
    ) -> StreamingResult<SlotId> {
        self.producer
            .reserve_texture_load(target, kind, alpha_enabled, path)
    }

    /// See [`TextureProducer::submit`].
    pub fn submit(&self, request: TextureRequest) -> StreamingResult<SlotId> {
        self.producer.submit(request)
    }

    /// A handle for submitting from other threads.
    pub fn producer(&self) -> TextureProducer {
        self.producer.clone()
    }

    /// The lifecycle state of a reservation.
    pub fn state(&self, id: SlotId) -> EntryState {
        self.producer.state(id)
    }

    /// Returns `true` when every reservation has been completed.
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    /// A copy of the activity counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns `true` while the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops accepting requests, lets the worker finish the entry in hand,
    /// and joins it.
    ///
    /// An entry waiting for ring space is not waited for. It and every entry
    /// still queued are published as failed with
    /// [`WorkerStopped`](khora_core::streaming::StreamingError::WorkerStopped).
    /// Calling this twice is harmless.
    pub fn shutdown(&mut self) {
        // Closing also wakes the worker if it is idle.
        self.producer.queue.close();
        self.interrupt.cancel();
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Texture streaming worker panicked");
            }
        }
    }
}

impl Drop for TextureStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
