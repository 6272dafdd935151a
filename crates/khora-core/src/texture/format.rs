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

//! Texture kinds, block-compressed target formats, and the fixed mapping
//! between them.

use serde::{Deserialize, Serialize};

/// The material role of a streamed texture.
///
/// The kind decides the compressed target format and the filter used when
/// building the mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// Base color, authored in sRGB.
    Diffuse,
    /// Tangent-space normal map. Only the R and G channels are kept.
    Normal,
    /// Packed metallic/roughness data, stored linearly.
    MetallicRoughness,
}

impl TextureKind {
    /// Every texture kind, in declaration order.
    pub const ALL: [TextureKind; 3] = [
        TextureKind::Diffuse,
        TextureKind::Normal,
        TextureKind::MetallicRoughness,
    ];

    /// The filter used to produce mip `m` from mip `m - 1`.
    pub const fn downsample_mode(self) -> DownsampleMode {
        match self {
            TextureKind::Diffuse => DownsampleMode::SrgbBox,
            TextureKind::Normal | TextureKind::MetallicRoughness => DownsampleMode::Linear,
        }
    }
}

/// The filter applied when reducing one mip level to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownsampleMode {
    /// Box filter that averages in linear light, treating RGB as sRGB encoded.
    SrgbBox,
    /// Box filter that averages the stored values directly.
    Linear,
}

/// The shape of one compressed 4x4 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCodec {
    /// Two RGB565 endpoints and 2-bit indices. 8 bytes per block.
    Bc1,
    /// An 8-byte alpha block followed by a BC1 color block. 16 bytes per block.
    Bc3,
    /// Two independent single-channel blocks (R then G). 16 bytes per block.
    Bc5,
}

impl BlockCodec {
    /// Width and height, in texels, of one compressed block.
    pub const BLOCK_DIM: u32 = 4;

    /// Size in bytes of one compressed block.
    pub const fn block_bytes(self) -> usize {
        match self {
            BlockCodec::Bc1 => 8,
            BlockCodec::Bc3 | BlockCodec::Bc5 => 16,
        }
    }

    /// Size in bytes of the 16 source texels the compressor expects.
    ///
    /// BC1 and BC3 consume RGBA8 texels, BC5 consumes interleaved RG8.
    pub const fn source_bytes(self) -> usize {
        match self {
            BlockCodec::Bc1 | BlockCodec::Bc3 => 16 * 4,
            BlockCodec::Bc5 => 16 * 2,
        }
    }

    /// Compressed bytes per texel.
    pub const fn byte_rate(self) -> ByteRate {
        match self {
            BlockCodec::Bc1 => ByteRate::new(1, 2),
            BlockCodec::Bc3 | BlockCodec::Bc5 => ByteRate::new(1, 1),
        }
    }
}

/// A rational number of bytes per texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRate {
    /// Numerator of the rate.
    pub numerator: u32,
    /// Denominator of the rate. Never zero.
    pub denominator: u32,
}

impl ByteRate {
    /// Creates a new byte rate.
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Bytes needed to store `texels` texels at this rate.
    ///
    /// Block-aligned texel counts are multiples of 16, so the division is exact
    /// for every rate used here.
    pub const fn bytes_for(self, texels: u64) -> u64 {
        texels * self.numerator as u64 / self.denominator as u64
    }
}

/// How a shader should read the channels of the uploaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSwizzle {
    /// Identity mapping.
    Rgba,
    /// R and G come from the texture, B reads 0 and A reads 1.
    Rg01,
}

/// The compressed GPU format a streamed texture is encoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// BC1 without alpha, sRGB encoded.
    Bc1RgbUnormSrgb,
    /// BC3 with alpha, sRGB encoded.
    Bc3RgbaUnormSrgb,
    /// BC3 with alpha, linear.
    Bc3RgbaUnorm,
    /// BC5 two-channel, linear.
    Bc5RgUnorm,
}

impl TextureFormat {
    /// Selects the target format for a texture.
    ///
    /// The mapping is total over `(kind, alpha_enabled)`; the alpha flag only
    /// matters for [`TextureKind::Diffuse`].
    pub const fn select(kind: TextureKind, alpha_enabled: bool) -> Self {
        match (kind, alpha_enabled) {
            (TextureKind::Diffuse, true) => TextureFormat::Bc3RgbaUnormSrgb,
            (TextureKind::Diffuse, false) => TextureFormat::Bc1RgbUnormSrgb,
            (TextureKind::Normal, _) => TextureFormat::Bc5RgUnorm,
            (TextureKind::MetallicRoughness, _) => TextureFormat::Bc3RgbaUnorm,
        }
    }

    /// The block codec used to produce this format.
    pub const fn codec(self) -> BlockCodec {
        match self {
            TextureFormat::Bc1RgbUnormSrgb => BlockCodec::Bc1,
            TextureFormat::Bc3RgbaUnormSrgb | TextureFormat::Bc3RgbaUnorm => BlockCodec::Bc3,
            TextureFormat::Bc5RgUnorm => BlockCodec::Bc5,
        }
    }

    /// Whether the GPU should decode this format from sRGB.
    pub const fn is_srgb(self) -> bool {
        matches!(
            self,
            TextureFormat::Bc1RgbUnormSrgb | TextureFormat::Bc3RgbaUnormSrgb
        )
    }

    /// The channel swizzle the sampler view should apply.
    pub const fn swizzle(self) -> ChannelSwizzle {
        match self {
            TextureFormat::Bc5RgUnorm => ChannelSwizzle::Rg01,
            _ => ChannelSwizzle::Rgba,
        }
    }

    /// Compressed bytes per texel.
    pub const fn byte_rate(self) -> ByteRate {
        self.codec().byte_rate()
    }
}
