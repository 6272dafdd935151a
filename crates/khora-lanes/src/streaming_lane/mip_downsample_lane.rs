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

//! Mip reduction for both downsample modes.
//!
//! Linear textures go through `image`'s triangle filter. sRGB colour has to
//! be averaged in linear light, which `image` does not do for 8-bit buffers,
//! so that mode keeps its own box filter over a decode table.

use anyhow::{ensure, Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba};
use khora_core::streaming::Downsampler;
use khora_core::texture::DownsampleMode;
use std::ops::Range;

/// Halves mip levels, in linear light for sRGB colour.
///
/// In [`DownsampleMode::SrgbBox`] every destination texel averages the source
/// texels it covers: the classic 2x2 average for a halving step, with odd
/// source edges folded into the last destination texel. Colour channels are
/// averaged in linear light and re-encoded, alpha is averaged as stored.
#[derive(Debug, Clone)]
pub struct MipDownsampler {
    to_linear: [f32; 256],
}

impl MipDownsampler {
    /// Creates a downsampler with its sRGB decode table filled in.
    pub fn new() -> Self {
        let mut to_linear = [0.0; 256];
        for (value, linear) in to_linear.iter_mut().enumerate() {
            *linear = srgb_to_linear(value as f32 / 255.0);
        }
        Self { to_linear }
    }

    fn resize_srgb(&self, src: &[u8], src_w: u32, src_h: u32, dst: &mut [u8], dst_w: u32, dst_h: u32) {
        for y in 0..dst_h {
            let rows = footprint(y, src_h, dst_h);
            for x in 0..dst_w {
                let columns = footprint(x, src_w, dst_w);
                let mut sum = [0.0f32; 4];
                let mut count = 0u32;
                for sy in rows.clone() {
                    let row = sy as usize * src_w as usize;
                    for sx in columns.clone() {
                        let texel = &src[(row + sx as usize) * 4..][..4];
                        for channel in 0..3 {
                            sum[channel] += self.to_linear[texel[channel] as usize];
                        }
                        sum[3] += texel[3] as f32;
                        count += 1;
                    }
                }

                let out = &mut dst[(y as usize * dst_w as usize + x as usize) * 4..][..4];
                for channel in 0..3 {
                    out[channel] = linear_to_srgb(sum[channel] / count as f32);
                }
                out[3] = (sum[3] / count as f32).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

impl Default for MipDownsampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Downsampler for MipDownsampler {
    fn resize(
        &self,
        src: &[u8],
        src_w: u32,
        src_h: u32,
        dst: &mut [u8],
        dst_w: u32,
        dst_h: u32,
        mode: DownsampleMode,
    ) -> Result<()> {
        ensure!(
            src.len() == src_w as usize * src_h as usize * 4,
            "Source holds {} bytes, expected {src_w}x{src_h} RGBA8",
            src.len()
        );
        ensure!(
            dst.len() == dst_w as usize * dst_h as usize * 4,
            "Destination holds {} bytes, expected {dst_w}x{dst_h} RGBA8",
            dst.len()
        );

        match mode {
            DownsampleMode::SrgbBox => self.resize_srgb(src, src_w, src_h, dst, dst_w, dst_h),
            DownsampleMode::Linear => {
                let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(src_w, src_h, src)
                    .context("Source texels do not form an image")?;
                let resized = imageops::resize(&view, dst_w, dst_h, FilterType::Triangle);
                dst.copy_from_slice(resized.as_raw());
            }
        }
        Ok(())
    }
}

/// The source texels covered by destination texel `index`.
fn footprint(index: u32, src: u32, dst: u32) -> Range<u32> {
    let start = (index as u64 * src as u64 / dst as u64) as u32;
    let end = ((index as u64 + 1) * src as u64 / dst as u64) as u32;
    start.min(src - 1)..end.clamp(start + 1, src)
}

fn srgb_to_linear(encoded: f32) -> f32 {
    if encoded <= 0.04045 {
        encoded / 12.92
    } else {
        ((encoded + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(linear: f32) -> u8 {
    let encoded = if linear <= 0.003_130_8 {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round().clamp(0.0, 255.0) as u8
}
