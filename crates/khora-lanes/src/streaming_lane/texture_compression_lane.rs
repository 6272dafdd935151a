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

//! The per-entry pipeline: decode, size, stage, reduce and compress.

use super::{DdsBlockCompressor, ImageCrateDecoder, MipDownsampler};
use khora_core::math::Extent2D;
use khora_core::streaming::{
    BlockCompressor, CancelToken, Downsampler, ImageDecoder, StreamingError, StreamingResult,
};
use khora_core::texture::{BlockCodec, TextureInfo};
use khora_data::allocators::{ScratchArena, ScratchSpan};
use khora_data::streaming::{RingSpan, RingWriter, TextureRequest};
use std::time::{Duration, Instant};

/// A compressed mip chain staged in the ring, ready to be published.
#[derive(Debug, Clone, Copy)]
pub struct CompressedTexture {
    /// Layout of the chain.
    pub info: TextureInfo,
    /// The committed ring span holding the chain.
    pub span: RingSpan,
    /// Time spent waiting for ring space.
    pub ring_wait: Duration,
}

/// Scratch buffers of one entry: the decoded source and two mip buffers.
#[derive(Clone, Copy)]
struct EntryBuffers {
    source: ScratchSpan,
    ping: ScratchSpan,
    pong: ScratchSpan,
}

/// Turns one texture request into a compressed, committed mip chain.
///
/// The lane owns the three external capabilities and is driven by the
/// streaming worker, which lends it the ring writer and its scratch arena for
/// the duration of one entry.
pub struct TextureCompressionLane {
    decoder: Box<dyn ImageDecoder>,
    downsampler: Box<dyn Downsampler>,
    compressor: Box<dyn BlockCompressor>,
    ring_wait_timeout: Duration,
    shutdown: CancelToken,
}

impl TextureCompressionLane {
    /// Creates a lane from explicit capabilities.
    pub fn new(
        decoder: Box<dyn ImageDecoder>,
        downsampler: Box<dyn Downsampler>,
        compressor: Box<dyn BlockCompressor>,
        ring_wait_timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            downsampler,
            compressor,
            ring_wait_timeout,
            shutdown: CancelToken::new(),
        }
    }

    /// Creates a lane with the `image` decoder, the mip downsampler and the
    /// `image_dds` block compressor.
    pub fn with_defaults(ring_wait_timeout: Duration) -> Self {
        Self::new(
            Box::new(ImageCrateDecoder::new()),
            Box::new(MipDownsampler::new()),
            Box::new(DdsBlockCompressor::new()),
            ring_wait_timeout,
        )
    }

    /// Makes `shutdown` interrupt any wait for ring space, failing the entry
    /// with [`StreamingError::WorkerStopped`].
    pub fn with_shutdown_token(mut self, shutdown: CancelToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Processes one request.
    ///
    /// On success the chain is committed in the ring and its span returned.
    /// On failure nothing is left behind: the ring span, if one was taken, is
    /// rolled back and the scratch arena is back at its entry checkpoint.
    pub fn process(
        &self,
        request: &TextureRequest,
        ring: &mut RingWriter,
        scratch: &mut ScratchArena,
    ) -> StreamingResult<CompressedTexture> {
        let format = request.format();
        if request.cancel.is_cancelled() {
            return Err(StreamingError::Cancelled);
        }

        let decode_failure = |err: anyhow::Error| StreamingError::DecodeFailure {
            path: request.path.clone(),
            reason: format!("{err:#}"),
        };
        let header = self.decoder.probe(&request.path).map_err(decode_failure)?;
        let info = TextureInfo::new(header.width, header.height, format);
        let base = info.size.xy();

        let mut scope = scratch.scope();
        let buffers = EntryBuffers {
            source: scope.push(header.rgba_len(), 16)?,
            ping: scope.push(rgba_len(base.mip(1)), 16)?,
            pong: scope.push(rgba_len(base.mip(2)), 16)?,
        };

        let pixels = scope.get_mut(buffers.source);
        let decoded = self
            .decoder
            .decode_into(&request.path, pixels)
            .map_err(decode_failure)?;
        if decoded != header {
            return Err(decode_failure(anyhow::anyhow!(
                "image changed between header read ({}x{}) and decode ({}x{})",
                header.width,
                header.height,
                decoded.width,
                decoded.height
            )));
        }
        // An RGB source must read as opaque whatever the decoder put in alpha.
        if header.source_channels == 3 {
            for texel in pixels.chunks_exact_mut(4) {
                texel[3] = u8::MAX;
            }
        }

        let started = Instant::now();
        let span = ring
            .allocate(
                info.byte_size(),
                self.ring_wait_timeout,
                &[&request.cancel, &self.shutdown],
            )
            .map_err(|err| match err {
                StreamingError::Cancelled if self.shutdown.is_cancelled() => {
                    StreamingError::WorkerStopped
                }
                other => other,
            })?;
        let ring_wait = started.elapsed();

        match self.encode_chain(request, &info, buffers, ring.span_mut(&span), &mut scope) {
            Ok(()) => {
                ring.commit(&span);
                log::trace!(
                    "Staged {} mips of '{}' at ring offset {}",
                    info.mip_level_count,
                    request.path.display(),
                    span.offset()
                );
                Ok(CompressedTexture {
                    info,
                    span,
                    ring_wait,
                })
            }
            Err(err) => {
                ring.abandon(&span);
                Err(err)
            }
        }
    }

    fn encode_chain(
        &self,
        request: &TextureRequest,
        info: &TextureInfo,
        buffers: EntryBuffers,
        out: &mut [u8],
        scratch: &mut ScratchArena,
    ) -> StreamingResult<()> {
        let encode_failure = |err: anyhow::Error| StreamingError::EncodeFailure {
            path: request.path.clone(),
            reason: format!("{err:#}"),
        };
        let codec = info.format.codec();
        let mode = request.kind.downsample_mode();

        // Mip 1 reads the source; from then on odd levels land in `ping`,
        // even levels in `pong`.
        let (mut ping, mut pong) = (buffers.ping, buffers.pong);
        let mut previous = info.size.xy();

        for level in info.mip_levels() {
            if request.cancel.is_cancelled() {
                return Err(StreamingError::Cancelled);
            }
            let extent = level.extent;
            let len = rgba_len(extent);
            let texels: &[u8] = match level.level {
                0 => scratch.get(buffers.source),
                _ => {
                    let src_span = if level.level == 1 { buffers.source } else { ping };
                    let dst_span = if level.level == 1 { ping } else { pong };
                    let (src, dst) = scratch.split_pair(src_span, dst_span);
                    self.downsampler
                        .resize(
                            &src[..rgba_len(previous)],
                            previous.width,
                            previous.height,
                            &mut dst[..len],
                            extent.width,
                            extent.height,
                            mode,
                        )
                        .map_err(encode_failure)?;
                    if level.level > 1 {
                        std::mem::swap(&mut ping, &mut pong);
                    }
                    &scratch.get(ping)[..len]
                }
            };

            let start = level.offset as usize;
            let end = start + level.size as usize;
            compress_level(
                self.compressor.as_ref(),
                texels,
                extent,
                codec,
                &mut out[start..end],
            )
            .map_err(encode_failure)?;
            previous = extent;
        }
        Ok(())
    }
}

fn rgba_len(extent: Extent2D) -> usize {
    extent.texel_count() as usize * 4
}

/// Compresses one mip level, 4x4 blocks in raster order.
///
/// Blocks overhanging the right or bottom edge repeat the edge texels.
fn compress_level(
    compressor: &dyn BlockCompressor,
    texels: &[u8],
    extent: Extent2D,
    codec: BlockCodec,
    out: &mut [u8],
) -> anyhow::Result<()> {
    let dim = BlockCodec::BLOCK_DIM;
    let blocks_x = extent.width.div_ceil(dim);
    let blocks_y = extent.height.div_ceil(dim);
    let block_bytes = codec.block_bytes();
    debug_assert_eq!(out.len(), (blocks_x * blocks_y) as usize * block_bytes);

    let mut gathered = [0u8; 64];
    let source = &mut gathered[..codec.source_bytes()];
    for (index, dst) in out.chunks_exact_mut(block_bytes).enumerate() {
        let bx = index as u32 % blocks_x;
        let by = index as u32 / blocks_x;
        gather_block(texels, extent, bx * dim, by * dim, codec, source);
        compressor.compress_block(dst, source, codec)?;
    }
    Ok(())
}

fn gather_block(
    texels: &[u8],
    extent: Extent2D,
    x0: u32,
    y0: u32,
    codec: BlockCodec,
    block: &mut [u8],
) {
    let dim = BlockCodec::BLOCK_DIM;
    for ty in 0..dim {
        let y = (y0 + ty).min(extent.height - 1);
        for tx in 0..dim {
            let x = (x0 + tx).min(extent.width - 1);
            let at = (y as usize * extent.width as usize + x as usize) * 4;
            let i = (ty * dim + tx) as usize;
            match codec {
                // Two-channel source: R and G only.
                BlockCodec::Bc5 => block[i * 2..i * 2 + 2].copy_from_slice(&texels[at..at + 2]),
                BlockCodec::Bc1 | BlockCodec::Bc3 => {
                    block[i * 4..i * 4 + 4].copy_from_slice(&texels[at..at + 4])
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use khora_core::streaming::ImageHeader;
    use khora_core::texture::{DownsampleMode, TextureFormat, TextureHandle, TextureKind};
    use khora_data::streaming::texture_ring;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Serves a solid image of the size encoded in the file name, e.g. `64x32.rgb`.
    struct SyntheticDecoder;

    impl ImageDecoder for SyntheticDecoder {
        fn probe(&self, path: &Path) -> Result<ImageHeader> {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                bail!("no file name");
            };
            let Some((w, h)) = stem.split_once('x') else {
                bail!("unreadable image '{}'", path.display());
            };
            let channels = if path.extension().is_some_and(|e| e == "rgb") { 3 } else { 4 };
            Ok(ImageHeader {
                width: w.parse()?,
                height: h.parse()?,
                source_channels: channels,
            })
        }

        fn decode_into(&self, path: &Path, dst: &mut [u8]) -> Result<ImageHeader> {
            let header = self.probe(path)?;
            for texel in dst.chunks_exact_mut(4) {
                texel.copy_from_slice(&[90, 60, 30, 0]);
            }
            Ok(header)
        }
    }

    /// Writes the first gathered texel into every output byte and records the
    /// source blocks it saw.
    #[derive(Default, Clone)]
    struct RecordingCompressor {
        blocks: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl BlockCompressor for RecordingCompressor {
        fn compress_block(&self, dst: &mut [u8], src: &[u8], _codec: BlockCodec) -> Result<()> {
            dst.fill(src[0]);
            self.blocks.lock().unwrap().push(src.to_vec());
            Ok(())
        }
    }

    /// Fills every destination texel with its coordinates.
    struct CoordinateDownsampler;

    impl Downsampler for CoordinateDownsampler {
        fn resize(
            &self,
            _src: &[u8],
            _src_w: u32,
            _src_h: u32,
            dst: &mut [u8],
            dst_w: u32,
            _dst_h: u32,
            _mode: DownsampleMode,
        ) -> Result<()> {
            for (i, texel) in dst.chunks_exact_mut(4).enumerate() {
                let (x, y) = (i as u32 % dst_w, i as u32 / dst_w);
                texel.copy_from_slice(&[x as u8, y as u8, 7, 255]);
            }
            Ok(())
        }
    }

    /// Rejects every block after the first `budget`.
    struct FailingCompressor {
        budget: Mutex<usize>,
    }

    impl BlockCompressor for FailingCompressor {
        fn compress_block(&self, dst: &mut [u8], _src: &[u8], _codec: BlockCodec) -> Result<()> {
            let mut budget = self.budget.lock().unwrap();
            if *budget == 0 {
                bail!("encoder out of budget");
            }
            *budget -= 1;
            dst.fill(0);
            Ok(())
        }
    }

    fn lane(compressor: RecordingCompressor) -> TextureCompressionLane {
        TextureCompressionLane::new(
            Box::new(SyntheticDecoder),
            Box::new(CoordinateDownsampler),
            Box::new(compressor),
            Duration::from_millis(50),
        )
    }

    fn request(kind: TextureKind, path: &str) -> TextureRequest {
        TextureRequest::new(TextureHandle(1), kind, path)
    }

    #[test]
    fn test_64x64_diffuse_chain() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, reader) = texture_ring(4096);
        let mut scratch = ScratchArena::new(64 * 1024);

        let texture = lane
            .process(&request(TextureKind::Diffuse, "64x64.rgb"), &mut ring, &mut scratch)
            .unwrap();

        assert_eq!(texture.info.format, TextureFormat::Bc1RgbUnormSrgb);
        assert_eq!(texture.info.mip_level_count, 7);
        // 256 + 64 + 16 + 4 + 1 + 1 + 1 blocks of 8 bytes.
        assert_eq!(texture.span.len(), 2744);
        assert_eq!(reader.write_at(), 2744, "The span is committed");
        assert_eq!(scratch.used(), 0, "Scratch is released after the entry");
        assert_eq!(compressor.blocks.lock().unwrap().len(), 343);
    }

    #[test]
    fn test_rgb_source_is_forced_opaque() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        lane.process(&request(TextureKind::Diffuse, "4x4.rgb"), &mut ring, &mut scratch)
            .unwrap();
        let blocks = compressor.blocks.lock().unwrap();
        assert_eq!(&blocks[0][..4], &[90, 60, 30, 255]);
    }

    #[test]
    fn test_rgba_source_keeps_alpha() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        let req = request(TextureKind::Diffuse, "4x4.rgba").with_alpha(true);
        let texture = lane.process(&req, &mut ring, &mut scratch).unwrap();
        assert_eq!(texture.info.format, TextureFormat::Bc3RgbaUnormSrgb);
        assert_eq!(compressor.blocks.lock().unwrap()[0][3], 0);
    }

    #[test]
    fn test_blocks_follow_raster_order_per_mip() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, reader) = texture_ring(4096);
        let mut scratch = ScratchArena::new(64 * 1024);

        let texture = lane
            .process(&request(TextureKind::Diffuse, "32x16.rgb"), &mut ring, &mut scratch)
            .unwrap();

        // Mip 1 is 16x8: 4x2 blocks whose first texel is (bx * 4, by * 4).
        let mip1 = texture.info.mip_levels().nth(1).unwrap();
        let bytes = reader.span(&texture.span);
        let mip1_bytes = &bytes[mip1.offset as usize..][..mip1.size as usize];
        let blocks = compressor.blocks.lock().unwrap();
        let first_mip1_block = 8 * 4;
        for (i, block) in blocks[first_mip1_block..first_mip1_block + 8].iter().enumerate() {
            let (bx, by) = (i % 4, i / 4);
            assert_eq!(&block[..2], &[(bx * 4) as u8, (by * 4) as u8], "block {i}");
            assert_eq!(mip1_bytes[i * 8], (bx * 4) as u8);
        }
    }

    #[test]
    fn test_normal_maps_gather_red_green_pairs() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        let texture = lane
            .process(&request(TextureKind::Normal, "8x8.rgb"), &mut ring, &mut scratch)
            .unwrap();
        assert_eq!(texture.info.format, TextureFormat::Bc5RgUnorm);

        let blocks = compressor.blocks.lock().unwrap();
        assert_eq!(blocks[0].len(), 32);
        assert!(blocks[0].chunks_exact(2).all(|rg| rg == [90, 60]));
        // Mip 1 (4x4) comes from the downsampler: texel (1, 0) is [1, 0].
        assert_eq!(&blocks[4][2..4], &[1, 0]);
    }

    #[test]
    fn test_partial_blocks_repeat_edges() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        lane.process(&request(TextureKind::MetallicRoughness, "6x6.rgb"), &mut ring, &mut scratch)
            .unwrap();
        // Mip 1 is 3x3; its single block clamps column 3 and row 3 to 2.
        let blocks = compressor.blocks.lock().unwrap();
        let mip1 = &blocks[4];
        let texel = |x: usize, y: usize| &mip1[(y * 4 + x) * 4..][..2];
        assert_eq!(texel(3, 0), &[2, 0]);
        assert_eq!(texel(0, 3), &[0, 2]);
        assert_eq!(texel(3, 3), &[2, 2]);
    }

    #[test]
    fn test_decode_failure_leaves_ring_untouched() {
        let lane = lane(RecordingCompressor::default());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        let err = lane
            .process(&request(TextureKind::Diffuse, "broken.png"), &mut ring, &mut scratch)
            .unwrap_err();
        match err {
            StreamingError::DecodeFailure { path, reason } => {
                assert_eq!(path, Path::new("broken.png"));
                assert!(reason.contains("unreadable image"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.write_at(), 0);
    }

    #[test]
    fn test_cancelled_request_is_skipped() {
        let compressor = RecordingCompressor::default();
        let lane = lane(compressor.clone());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);
        let token = CancelToken::new();
        token.cancel();

        let req = request(TextureKind::Diffuse, "4x4.rgb").with_cancel_token(token);
        assert!(matches!(
            lane.process(&req, &mut ring, &mut scratch),
            Err(StreamingError::Cancelled)
        ));
        assert!(compressor.blocks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stalled_ring_times_out() {
        let lane = lane(RecordingCompressor::default());
        let (mut ring, _reader) = texture_ring(1024);
        let mut scratch = ScratchArena::new(4096);

        // 16x16 BC1: 128 + 32 + 8 + 8 + 8 = 184 bytes. Five fit, the sixth waits.
        for _ in 0..5 {
            lane.process(&request(TextureKind::Diffuse, "16x16.rgb"), &mut ring, &mut scratch)
                .unwrap();
        }
        let head = ring.head();
        let err = lane
            .process(&request(TextureKind::Diffuse, "16x16.rgb"), &mut ring, &mut scratch)
            .unwrap_err();
        assert!(matches!(err, StreamingError::RingTimeout { requested: 184, .. }));
        assert_eq!(ring.head(), head, "A timed out allocation moves nothing");
    }

    #[test]
    fn test_oversized_chain_is_rejected() {
        let lane = lane(RecordingCompressor::default());
        let (mut ring, _reader) = texture_ring(256);
        let mut scratch = ScratchArena::new(64 * 1024);

        let err = lane
            .process(&request(TextureKind::Diffuse, "64x64.rgb"), &mut ring, &mut scratch)
            .unwrap_err();
        assert!(matches!(
            err,
            StreamingError::SpanTooLarge {
                requested: 2744,
                capacity: 256
            }
        ));
    }

    #[test]
    fn test_scratch_exhaustion_leaves_ring_untouched() {
        let lane = lane(RecordingCompressor::default());
        let (mut ring, _reader) = texture_ring(4096);
        // Holds the 64x64 source (16 KiB) but not its mip buffers.
        let mut scratch = ScratchArena::new(16 * 1024 + 64);

        let err = lane
            .process(&request(TextureKind::Diffuse, "64x64.rgb"), &mut ring, &mut scratch)
            .unwrap_err();
        assert!(matches!(err, StreamingError::ScratchExhausted { .. }));
        assert_eq!(ring.head(), 0, "No span is taken before scratch is secured");
        assert_eq!(scratch.used(), 0);
    }

    #[test]
    fn test_encode_failure_rolls_back_span() {
        let lane = TextureCompressionLane::new(
            Box::new(SyntheticDecoder),
            Box::new(CoordinateDownsampler),
            Box::new(FailingCompressor {
                budget: Mutex::new(3),
            }),
            Duration::from_millis(50),
        );
        let (mut ring, reader) = texture_ring(4096);
        let mut scratch = ScratchArena::new(64 * 1024);

        let err = lane
            .process(&request(TextureKind::Diffuse, "16x16.rgb"), &mut ring, &mut scratch)
            .unwrap_err();
        match err {
            StreamingError::EncodeFailure { path, reason } => {
                assert_eq!(path, Path::new("16x16.rgb"));
                assert!(reason.contains("out of budget"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ring.head(), 0, "The span is abandoned");
        assert_eq!(reader.write_at(), 0);
        assert_eq!(scratch.used(), 0);
    }

    #[test]
    fn test_shutdown_interrupts_ring_wait() {
        let shutdown = CancelToken::new();
        let lane = TextureCompressionLane::new(
            Box::new(SyntheticDecoder),
            Box::new(CoordinateDownsampler),
            Box::new(RecordingCompressor::default()),
            Duration::from_secs(30),
        )
        .with_shutdown_token(shutdown.clone());
        let (mut ring, _reader) = texture_ring(184);
        let mut scratch = ScratchArena::new(4096);

        lane.process(&request(TextureKind::Diffuse, "16x16.rgb"), &mut ring, &mut scratch)
            .unwrap();
        shutdown.cancel();
        let started = Instant::now();
        let err = lane
            .process(&request(TextureKind::Diffuse, "16x16.rgb"), &mut ring, &mut scratch)
            .unwrap_err();
        assert!(matches!(err, StreamingError::WorkerStopped), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ring.head(), 184);
    }

    #[test]
    fn test_default_capabilities_encode_a_real_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.png");
        image::RgbImage::from_fn(20, 12, |x, y| image::Rgb([(x * 12) as u8, (y * 20) as u8, 0]))
            .save(&path)
            .unwrap();

        let lane = TextureCompressionLane::with_defaults(Duration::from_millis(50));
        let (mut ring, reader) = texture_ring(4096);
        let mut scratch = ScratchArena::new(64 * 1024);
        let req = TextureRequest::new(TextureHandle(3), TextureKind::Diffuse, path);
        let texture = lane.process(&req, &mut ring, &mut scratch).unwrap();

        assert_eq!(texture.info.mip_level_count, 5);
        assert_eq!(texture.span.len() as u64, texture.info.byte_size());
        assert_eq!(reader.span(&texture.span).len(), texture.span.len());
    }
}
