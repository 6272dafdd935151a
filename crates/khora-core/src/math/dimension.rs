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

//! Provides structs for representing texture extents and their mip reductions.
//!
//! These types use integer (`u32`) components, making them suitable for
//! pixel-based sizes. Every extent handled by the streaming pipeline is at
//! least 1x1x1.

/// A two-dimensional extent, typically representing width and height.
///
/// This is commonly used for the dimensions of a single mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// The width component of the extent.
    pub width: u32,
    /// The height component of the extent.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the extent of the next smaller mip level.
    ///
    /// Each axis is halved (rounding down) and clamped to 1.
    pub fn next_mip(self) -> Self {
        Self {
            width: (self.width / 2).max(1),
            height: (self.height / 2).max(1),
        }
    }

    /// Returns the extent of mip `level` of a texture whose base is `self`.
    pub fn mip(self, level: u32) -> Self {
        Self {
            width: self.width.checked_shr(level).unwrap_or(0).max(1),
            height: self.height.checked_shr(level).unwrap_or(0).max(1),
        }
    }

    /// Returns the extent rounded up to whole `block` x `block` tiles.
    pub fn align_to_blocks(self, block: u32) -> Self {
        Self {
            width: self.width.div_ceil(block) * block,
            height: self.height.div_ceil(block) * block,
        }
    }

    /// The number of texels covered by this extent.
    pub fn texel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A three-dimensional extent, representing width, height, and depth.
///
/// Streamed textures are always 2D, so `depth_or_array_layers` is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3D {
    /// The width component of the extent.
    pub width: u32,
    /// The height component of the extent.
    pub height: u32,
    /// The depth or number of array layers.
    pub depth_or_array_layers: u32,
}

impl Extent3D {
    /// Returns the width and height as an [`Extent2D`].
    pub fn xy(self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }
}

impl From<Extent2D> for Extent3D {
    fn from(extent: Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        }
    }
}
