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

//! Lanes of the texture streaming pipeline.
//!
//! The capability lanes (decoder, downsampler, block compressor) are the
//! default implementations of the `khora_core::streaming` contracts. The
//! [`TextureCompressionLane`] chains them for one queue entry.

mod block_compression_lane;
mod image_decoder_lane;
mod mip_downsample_lane;
mod texture_compression_lane;

pub use self::block_compression_lane::DdsBlockCompressor;
pub use self::image_decoder_lane::ImageCrateDecoder;
pub use self::mip_downsample_lane::MipDownsampler;
pub use self::texture_compression_lane::{CompressedTexture, TextureCompressionLane};
