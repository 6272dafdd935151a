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

//! Sizing of compressed mip chains and the description handed to the upload stage.

use super::format::{BlockCodec, ChannelSwizzle, TextureFormat};
use crate::math::{Extent2D, Extent3D};

/// An opaque reference to a renderer-owned texture.
///
/// The streaming pipeline never owns or frees the texture; it only carries
/// the handle so the upload stage knows which GPU texture receives the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Number of mip levels in a full chain for a `width` x `height` base level.
///
/// Equals `floor(log2(max(width, height))) + 1`. Zero-sized inputs are
/// treated as 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Compressed size in bytes of a single mip level.
///
/// Block formats always store whole 4x4 blocks, so the extent is rounded up
/// to a multiple of 4 on both axes before the byte rate is applied.
pub fn compressed_mip_size(extent: Extent2D, format: TextureFormat) -> u64 {
    let aligned = extent.align_to_blocks(BlockCodec::BLOCK_DIM);
    format.byte_rate().bytes_for(aligned.texel_count())
}

/// Compressed size in bytes of mips `0..mip_count` of a base extent.
pub fn compressed_chain_size(base: Extent2D, mip_count: u32, format: TextureFormat) -> u64 {
    (0..mip_count)
        .map(|level| compressed_mip_size(base.mip(level), format))
        .sum()
}

/// Placement of one mip level inside a compressed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevel {
    /// The mip index, 0 being full resolution.
    pub level: u32,
    /// The texel extent of this level (not block aligned).
    pub extent: Extent2D,
    /// Byte offset of this level from the start of the chain.
    pub offset: u64,
    /// Compressed size in bytes of this level.
    pub size: u64,
}

/// Everything the upload stage needs to create and fill the GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Size of mip 0. Depth is always 1.
    pub size: Extent3D,
    /// Number of array layers. Always 1 for streamed textures.
    pub array_layer_count: u32,
    /// Number of mip levels stored in the chain.
    pub mip_level_count: u32,
    /// The compressed format of every level.
    pub format: TextureFormat,
    /// The swizzle to apply when sampling.
    pub swizzle: ChannelSwizzle,
}

impl TextureInfo {
    /// Describes a full mip chain for a `width` x `height` texture in `format`.
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            size: Extent2D::new(width, height).into(),
            array_layer_count: 1,
            mip_level_count: mip_level_count(width, height),
            format,
            swizzle: format.swizzle(),
        }
    }

    /// Total compressed size in bytes of the whole chain.
    pub fn byte_size(&self) -> u64 {
        compressed_chain_size(self.size.xy(), self.mip_level_count, self.format)
    }

    /// Iterates over the levels of the chain in storage order.
    pub fn mip_levels(&self) -> impl Iterator<Item = MipLevel> + '_ {
        let base = self.size.xy();
        let format = self.format;
        let mut offset = 0u64;
        (0..self.mip_level_count).map(move |level| {
            let extent = base.mip(level);
            let size = compressed_mip_size(extent, format);
            let mip = MipLevel {
                level,
                extent,
                offset,
                size,
            };
            offset += size;
            mip
        })
    }
}
