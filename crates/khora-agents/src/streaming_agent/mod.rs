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

//! Acts as the **[A]gent** for texture streaming.
//!
//! Producers on any thread reserve texture loads through a
//! [`TextureProducer`]. A single background worker drains the requests in
//! order, runs each through the
//! [`TextureCompressionLane`](khora_lanes::streaming_lane::TextureCompressionLane),
//! and stages the compressed mip chain in a ring buffer. The renderer's
//! upload code polls the [`UploadStage`] for finished entries, copies them,
//! and completes them, which frees both the ring space and the queue slot.
//!
//! ```text
//! producers --reserve--> [request queue] --drain--> worker --stage--> [ring]
//!                                                                       |
//!                       UploadStage <--poll_ready / complete------------+
//! ```

mod stats;
mod streamer;
mod upload;
mod worker;

pub use self::stats::{StatsSnapshot, StreamingStats};
pub use self::streamer::{TextureProducer, TextureStreamer};
pub use self::upload::{FailedTexture, ReadyTexture, UploadEntry, UploadStage};
