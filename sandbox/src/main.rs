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

// Khora Texture Streaming Sandbox
// Streams images through the worker while a second thread plays the GPU upload stage.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use khora_agents::streaming_agent::{TextureStreamer, UploadEntry, UploadStage};
use khora_core::streaming::{StreamingConfig, StreamingError};
use khora_core::texture::{TextureHandle, TextureKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Diffuse,
    Normal,
    MetallicRoughness,
}

impl From<KindArg> for TextureKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Diffuse => TextureKind::Diffuse,
            KindArg::Normal => TextureKind::Normal,
            KindArg::MetallicRoughness => TextureKind::MetallicRoughness,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Streams textures through the Khora texture streamer")]
struct Args {
    /// RON file overriding the streaming configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Material role applied to every image.
    #[arg(long, value_enum, default_value = "diffuse")]
    kind: KindArg,

    /// Keep the alpha channel of diffuse images.
    #[arg(long)]
    alpha: bool,

    /// Number of synthetic images to stream when no path is given.
    #[arg(long, default_value_t = 16)]
    generate: u32,

    /// Image files to stream.
    paths: Vec<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<StreamingConfig> {
    let Some(path) = path else {
        return Ok(StreamingConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config: StreamingConfig = ron::from_str(&text)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    log::info!("Loaded streaming config from '{}'", path.display());
    Ok(config)
}

/// Writes `count` checkerboards of growing size, some with alpha.
fn generate_images(dir: &Path, count: u32) -> Result<Vec<PathBuf>> {
    (0..count)
        .map(|i| {
            let size = 32 << (i % 5);
            let path = dir.join(format!("generated_{i:03}.png"));
            if i % 3 == 0 {
                RgbaImage::from_fn(size, size, |x, y| {
                    let on = ((x / 8) + (y / 8)) % 2 == 0;
                    Rgba([if on { 230 } else { 20 }, (i * 15) as u8, 90, (x % 256) as u8])
                })
                .save(&path)?;
            } else {
                RgbImage::from_fn(size, size, |x, y| {
                    let on = ((x / 8) + (y / 8)) % 2 == 0;
                    Rgb([if on { 200 } else { 40 }, (y % 256) as u8, (i * 15) as u8])
                })
                .save(&path)?;
            }
            Ok(path)
        })
        .collect()
}

/// Plays the GPU upload stage until `expected` entries have been completed.
fn run_upload_stage(mut upload: UploadStage, expected: usize) -> (usize, u64) {
    let mut completed = 0;
    let mut uploaded_bytes = 0u64;
    while completed < expected {
        completed += upload.drain_with(|entry| match entry {
            UploadEntry::Ready(texture) => {
                log::info!(
                    "Uploaded texture {:?}: {}x{} {:?}, {} mips, {} bytes",
                    texture.target,
                    texture.info.size.width,
                    texture.info.size.height,
                    texture.info.format,
                    texture.info.mip_level_count,
                    texture.bytes.len()
                );
                uploaded_bytes += texture.bytes.len() as u64;
            }
            UploadEntry::Failed(failed) => {
                log::warn!(
                    "Texture {:?} keeps its placeholder ('{}'): {}",
                    failed.target,
                    failed.path.display(),
                    failed.error
                );
            }
        });
        thread::sleep(Duration::from_millis(1));
    }
    (completed, uploaded_bytes)
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let generated_dir = tempfile::tempdir().context("Failed to create a temporary directory")?;
    let paths = if args.paths.is_empty() {
        log::info!("No image given, generating {} test images", args.generate);
        generate_images(generated_dir.path(), args.generate)?
    } else {
        args.paths.clone()
    };

    let started = Instant::now();
    let (mut streamer, upload) = TextureStreamer::new(&config)?;
    let expected = paths.len();
    let uploader = thread::Builder::new()
        .name("sandbox-upload".to_string())
        .spawn(move || run_upload_stage(upload, expected))
        .context("Failed to spawn the upload thread")?;

    let kind = TextureKind::from(args.kind);
    for (index, path) in paths.iter().enumerate() {
        let target = TextureHandle(index as u64);
        loop {
            match streamer.reserve_texture_load(target, kind, args.alpha, path) {
                Ok(_) => break,
                Err(err) if err.is_retryable() => thread::sleep(Duration::from_millis(10)),
                Err(StreamingError::PathTooLong { len, max }) => {
                    anyhow::bail!("'{}' is {len} bytes long, the limit is {max}", path.display())
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    let (completed, uploaded_bytes) = uploader
        .join()
        .map_err(|_| anyhow::anyhow!("The upload thread panicked"))?;
    streamer.shutdown();

    let stats = streamer.stats();
    log::info!(
        "Streamed {completed} textures in {:?}: {} compressed, {} failed, {} rejected at reservation, \
         {uploaded_bytes} bytes uploaded, {:?} spent waiting for ring space",
        started.elapsed(),
        stats.compressed,
        stats.failed,
        stats.rejected,
        stats.ring_wait,
    );
    Ok(())
}
