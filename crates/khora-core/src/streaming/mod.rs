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

//! Contracts of the asynchronous texture streaming pipeline.
//!
//! A producer reserves a request slot, the single streaming worker decodes,
//! mip-maps and block-compresses the image into a staging ring buffer, and an
//! external upload stage copies the result to the GPU and frees the space.

pub mod cancel;
pub mod config;
pub mod error;
pub mod traits;

pub use self::cancel::CancelToken;
pub use self::config::StreamingConfig;
pub use self::error::{StreamingError, StreamingResult};
pub use self::traits::{BlockCompressor, Downsampler, ImageDecoder, ImageHeader};
