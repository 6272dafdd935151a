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

//! Image decoding backed by the `image` crate.

use anyhow::{ensure, Context, Result};
use image::{ColorType, DynamicImage, ImageDecoder as _, ImageReader};
use khora_core::streaming::{ImageDecoder, ImageHeader};
use std::path::Path;

/// Decodes any format the `image` crate recognizes (PNG, JPEG, BMP, TGA, ...)
/// into RGBA8.
///
/// The container format is sniffed from the file contents, so extensions do
/// not have to match. Eight-bit sources are decoded straight into the
/// caller's buffer and widened in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    /// Creates a new instance of `ImageCrateDecoder`.
    pub fn new() -> Self {
        Self
    }
}

fn open(path: &Path) -> Result<impl image::ImageDecoder> {
    ImageReader::open(path)
        .with_context(|| format!("Failed to open image file '{}'", path.display()))?
        .with_guessed_format()
        .context("Failed to detect image format")?
        .into_decoder()
        .context("Failed to read image header")
}

fn header(decoder: &impl image::ImageDecoder) -> Result<ImageHeader> {
    let (width, height) = decoder.dimensions();
    ensure!(width > 0 && height > 0, "Image has no texels");
    Ok(ImageHeader {
        width,
        height,
        source_channels: decoder.color_type().channel_count(),
    })
}

impl ImageDecoder for ImageCrateDecoder {
    fn probe(&self, path: &Path) -> Result<ImageHeader> {
        header(&open(path)?)
    }

    fn decode_into(&self, path: &Path, dst: &mut [u8]) -> Result<ImageHeader> {
        let decoder = open(path)?;
        let header = header(&decoder)?;
        ensure!(
            dst.len() == header.rgba_len(),
            "Destination holds {} bytes, a {}x{} image needs {}",
            dst.len(),
            header.width,
            header.height,
            header.rgba_len()
        );

        let color = decoder.color_type();
        match color {
            ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
                let native = decoder.total_bytes() as usize;
                ensure!(native <= dst.len(), "Decoder reports {native} bytes of texels");
                let start = dst.len() - native;
                decoder
                    .read_image(&mut dst[start..])
                    .context("Failed to decode image")?;
                expand_to_rgba(dst, start, color.channel_count() as usize);
            }
            _ => {
                // Wider than 8 bits per channel.
                let image = DynamicImage::from_decoder(decoder).context("Failed to decode image")?;
                dst.copy_from_slice(image.to_rgba8().as_raw());
            }
        }
        Ok(header)
    }
}

/// Widens the `channels`-byte texels stored at `dst[start..]` to RGBA8,
/// front to back.
///
/// Texel `i` is written to `dst[4i..4i + 4]`, which never reaches the source
/// bytes of texel `i + 1` or later.
fn expand_to_rgba(dst: &mut [u8], start: usize, channels: usize) {
    if channels == 4 {
        return;
    }
    let texels = (dst.len() - start) / channels;
    for i in 0..texels {
        let at = start + i * channels;
        let texel = match channels {
            1 => [dst[at], dst[at], dst[at], u8::MAX],
            2 => [dst[at], dst[at], dst[at], dst[at + 1]],
            _ => [dst[at], dst[at + 1], dst[at + 2], u8::MAX],
        };
        dst[i * 4..i * 4 + 4].copy_from_slice(&texel);
    }
}
