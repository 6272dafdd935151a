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

//! Contracts for the external capabilities the streaming pipeline consumes.
//!
//! The pipeline orchestrates decoding, mip reduction, and block compression
//! but never implements them itself. Concrete implementations live in
//! `khora-lanes`; tests substitute their own.

use crate::texture::{BlockCodec, DownsampleMode};
use anyhow::Result;
use std::path::Path;

/// Dimensions and channel count of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Number of channels stored in the source file (1 to 4).
    pub source_channels: u8,
}

impl ImageHeader {
    /// Size in bytes of the image once expanded to RGBA8.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Decodes an image file into RGBA8 texels.
///
/// Decoding is split in two so the caller can size the destination before
/// any texel is produced: the pipeline probes the header, carves the RGBA8
/// buffer out of its scratch arena, then decodes straight into it.
pub trait ImageDecoder: Send + Sync {
    /// Reads the header of the file at `path`.
    fn probe(&self, path: &Path) -> Result<ImageHeader>;

    /// Decodes the file at `path` into `dst`, forcing four output channels.
    ///
    /// `dst` is exactly [`ImageHeader::rgba_len`] bytes of the header
    /// [`probe`](Self::probe) returned for the same file.
    fn decode_into(&self, path: &Path, dst: &mut [u8]) -> Result<ImageHeader>;
}

/// Produces a smaller RGBA8 image from a larger one.
pub trait Downsampler: Send + Sync {
    /// Resamples `src` (`src_w` x `src_h` RGBA8) into `dst` (`dst_w` x `dst_h` RGBA8).
    ///
    /// `dst` is exactly `dst_w * dst_h * 4` bytes long.
    #[allow(clippy::too_many_arguments)]
    fn resize(
        &self,
        src: &[u8],
        src_w: u32,
        src_h: u32,
        dst: &mut [u8],
        dst_w: u32,
        dst_h: u32,
        mode: DownsampleMode,
    ) -> Result<()>;
}

/// Compresses one 4x4 block of texels.
pub trait BlockCompressor: Send + Sync {
    /// Writes exactly `codec.block_bytes()` bytes into `dst`.
    ///
    /// `src` holds `codec.source_bytes()` bytes: 16 RGBA8 texels for BC1 and
    /// BC3, or 16 interleaved RG8 pairs for BC5, in row-major order.
    fn compress_block(&self, dst: &mut [u8], src: &[u8], codec: BlockCodec) -> Result<()>;
}
