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

//! BC1/BC3/BC5 block encoding through `image_dds`.
//!
//! Block layouts (all little-endian):
//!
//! | Codec | Bytes | Layout |
//! |-------|-------|--------|
//! | BC1   | 8     | two RGB565 endpoints, 16 x 2-bit indices |
//! | BC3   | 16    | BC4 alpha block, then a BC1 colour block |
//! | BC5   | 16    | BC4 block for red, then one for green |

use anyhow::{ensure, Context, Result};
use image_dds::{ImageFormat, Mipmaps, Quality, SurfaceRgba8};
use khora_core::streaming::BlockCompressor;
use khora_core::texture::BlockCodec;

const TEXELS: usize = 16;

/// Encodes each 4x4 block as a single-block `image_dds` surface.
#[derive(Debug, Clone, Copy)]
pub struct DdsBlockCompressor {
    quality: Quality,
}

impl DdsBlockCompressor {
    /// Creates a compressor tuned for throughput.
    pub fn new() -> Self {
        Self::with_quality(Quality::Fast)
    }

    /// Creates a compressor with an explicit encoder quality.
    pub fn with_quality(quality: Quality) -> Self {
        Self { quality }
    }
}

impl Default for DdsBlockCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn image_format(codec: BlockCodec) -> ImageFormat {
    match codec {
        BlockCodec::Bc1 => ImageFormat::BC1RgbaUnorm,
        BlockCodec::Bc3 => ImageFormat::BC3RgbaUnorm,
        BlockCodec::Bc5 => ImageFormat::BC5RgUnorm,
    }
}

impl BlockCompressor for DdsBlockCompressor {
    fn compress_block(&self, dst: &mut [u8], src: &[u8], codec: BlockCodec) -> Result<()> {
        ensure!(
            src.len() == codec.source_bytes(),
            "{codec:?} block source is {} bytes, expected {}",
            src.len(),
            codec.source_bytes()
        );

        let mut rgba = [0u8; TEXELS * 4];
        match codec {
            // Red and green pairs, widened with blue 0 and alpha opaque.
            BlockCodec::Bc5 => {
                for (texel, rg) in rgba.chunks_exact_mut(4).zip(src.chunks_exact(2)) {
                    texel.copy_from_slice(&[rg[0], rg[1], 0, u8::MAX]);
                }
            }
            BlockCodec::Bc1 | BlockCodec::Bc3 => rgba.copy_from_slice(src),
        }

        let surface = SurfaceRgba8 {
            width: 4,
            height: 4,
            depth: 1,
            layers: 1,
            mipmaps: 1,
            data: &rgba[..],
        };
        let encoded = surface
            .encode(image_format(codec), self.quality, Mipmaps::Disabled)
            .with_context(|| format!("Failed to encode {codec:?} block"))?;
        ensure!(
            encoded.data.len() == dst.len(),
            "{codec:?} encoder produced {} bytes for a {}-byte block",
            encoded.data.len(),
            dst.len()
        );
        dst.copy_from_slice(&encoded.data);
        Ok(())
    }
}
