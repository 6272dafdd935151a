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

//! Configuration for the texture streaming pipeline.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the texture streaming pipeline.
///
/// Every field has a default, so a config file only needs to name the values
/// it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of request slots (`N`).
    pub queue_capacity: usize,
    /// Size of the staging ring buffer in bytes.
    pub ring_capacity: usize,
    /// Size of the per-entry scratch arena in bytes. Holds the decoded
    /// source image and two mip buffers.
    pub scratch_capacity: usize,
    /// Longest source path accepted at reservation, in bytes.
    pub max_path_len: usize,
    /// How long the idle worker waits for a wake signal before polling again.
    pub idle_wait_ms: u64,
    /// How long the worker may spin waiting for ring space.
    pub ring_wait_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ring_capacity: 64 * 1024 * 1024,
            // A 4096x4096 RGBA8 source plus its two mip buffers.
            scratch_capacity: 96 * 1024 * 1024,
            max_path_len: 512,
            idle_wait_ms: 100,
            ring_wait_timeout_ms: 5000,
        }
    }
}

impl StreamingConfig {
    /// The idle wait as a [`Duration`].
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// The ring spin-wait bound as a [`Duration`].
    pub fn ring_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_wait_timeout_ms)
    }

    /// Checks that every capacity is usable.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.queue_capacity > 0, "queue_capacity must be at least 1");
        ensure!(self.ring_capacity > 0, "ring_capacity must be at least 1");
        ensure!(self.scratch_capacity > 0, "scratch_capacity must be at least 1");
        ensure!(self.max_path_len > 0, "max_path_len must be at least 1");
        Ok(())
    }
}
