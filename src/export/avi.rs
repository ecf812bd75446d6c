// src/export/avi.rs

use std::io::{Seek, SeekFrom, Write};

use anyhow::{Result, bail};

/// Layout of an export: uncompressed 24-bit video plus 16-bit PCM audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AviSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AviSpec {
    fn row_stride(&self) -> usize {
        (self.width as usize * 3 + 3) & !3
    }

    pub fn video_frame_bytes(&self) -> usize {
        self.row_stride() * self.height as usize
    }

    fn block_align(&self) -> u32 {
        self.channels as u32 * 2
    }
}

const AVIF_HASINDEX: u32 = 0x10;
const AVIF_ISINTERLEAVED: u32 = 0x100;
const AVIIF_KEYFRAME: u32 = 0x10;

/// RIFF + hdrl list + movi list header. Constant for a given spec.
pub const HEADER_LEN: u64 = 326;
/// Position of the `movi` fourcc; index offsets are relative to it.
const MOVI_FOURCC_POS: u64 = 322;
const MOVI_LIST_POS: u64 = 314;

struct IndexEntry {
    id: [u8; 4],
    offset: u32,
    size: u32,
}

/// Streaming AVI 1.0 writer. Chunks are appended as they arrive; counts and
/// sizes are patched into the header on `finalize`.
pub struct AviWriter<W: Write + Seek> {
    out: W,
    spec: AviSpec,
    index: Vec<IndexEntry>,
    pos: u64,
    video_frames: u32,
    audio_frames: u64,
    max_chunk: u32,
}

impl<W: Write + Seek> AviWriter<W> {
    pub fn new(mut out: W, spec: AviSpec) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 || spec.fps == 0 || spec.channels == 0 {
            bail!("invalid export layout: {:?}", spec);
        }
        out.write_all(&header(&spec, 0, 0, 0, 0, 0))?;
        Ok(Self {
            out,
            spec,
            index: Vec::new(),
            pos: HEADER_LEN,
            video_frames: 0,
            audio_frames: 0,
            max_chunk: 0,
        })
    }

    pub fn spec(&self) -> &AviSpec {
        &self.spec
    }

    pub fn video_frames(&self) -> u32 {
        self.video_frames
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames
    }

    /// Appends one frame of top-down packed RGB (`width * height * 3` bytes).
    pub fn write_video_frame(&mut self, rgb: &[u8]) -> Result<()> {
        let (w, h) = (self.spec.width as usize, self.spec.height as usize);
        if rgb.len() != w * h * 3 {
            bail!("video frame has {} bytes, expected {}", rgb.len(), w * h * 3);
        }
        let stride = self.spec.row_stride();
        // DIBs are bottom-up BGR with 4-byte aligned rows.
        let mut dib = vec![0u8; stride * h];
        for (y, row) in rgb.chunks_exact(w * 3).enumerate() {
            let dst = &mut dib[(h - 1 - y) * stride..][..w * 3];
            for (d, s) in dst.chunks_exact_mut(3).zip(row.chunks_exact(3)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
            }
        }
        self.write_chunk(*b"00db", &dib)?;
        self.video_frames += 1;
        Ok(())
    }

    /// Appends interleaved audio. Samples are soft clipped into 16-bit PCM.
    pub fn write_audio(&mut self, interleaved: &[f32]) -> Result<()> {
        let channels = self.spec.channels as usize;
        let frames = interleaved.len() / channels;
        if frames == 0 {
            return Ok(());
        }
        let mut pcm = Vec::with_capacity(frames * channels * 2);
        for &s in &interleaved[..frames * channels] {
            let v = if s.is_finite() { s.tanh() } else { 0.0 };
            pcm.extend_from_slice(&((v * i16::MAX as f32) as i16).to_le_bytes());
        }
        self.write_chunk(*b"01wb", &pcm)?;
        self.audio_frames += frames as u64;
        Ok(())
    }

    fn write_chunk(&mut self, id: [u8; 4], data: &[u8]) -> Result<()> {
        let size = u32::try_from(data.len())?;
        self.index.push(IndexEntry {
            id,
            offset: u32::try_from(self.pos - MOVI_FOURCC_POS)?,
            size,
        });
        self.out.write_all(&id)?;
        self.out.write_all(&size.to_le_bytes())?;
        self.out.write_all(data)?;
        let mut written = 8 + data.len() as u64;
        if data.len() % 2 == 1 {
            self.out.write_all(&[0])?;
            written += 1;
        }
        self.pos += written;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    /// Writes the index, patches the header and returns the inner writer.
    pub fn finalize(mut self) -> Result<W> {
        let movi_size = u32::try_from(self.pos - MOVI_LIST_POS - 8)?;

        let mut idx = Vec::with_capacity(8 + self.index.len() * 16);
        idx.extend_from_slice(b"idx1");
        put_u32(&mut idx, u32::try_from(self.index.len() * 16)?);
        for e in &self.index {
            idx.extend_from_slice(&e.id);
            put_u32(&mut idx, AVIIF_KEYFRAME);
            put_u32(&mut idx, e.offset);
            put_u32(&mut idx, e.size);
        }
        self.out.write_all(&idx)?;
        let end = self.pos + idx.len() as u64;
        let riff_size = u32::try_from(end - 8)?;

        let audio_frames = u32::try_from(self.audio_frames)?;
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header(
            &self.spec,
            riff_size,
            movi_size,
            self.video_frames,
            audio_frames,
            self.max_chunk,
        ))?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn header(
    spec: &AviSpec,
    riff_size: u32,
    movi_size: u32,
    video_frames: u32,
    audio_frames: u32,
    max_chunk: u32,
) -> Vec<u8> {
    let frame_bytes = spec.video_frame_bytes() as u32;
    let byte_rate = spec.sample_rate * spec.block_align();
    let mut h = Vec::with_capacity(HEADER_LEN as usize);

    h.extend_from_slice(b"RIFF");
    put_u32(&mut h, riff_size);
    h.extend_from_slice(b"AVI ");

    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 294);
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    put_u32(&mut h, 56);
    put_u32(&mut h, 1_000_000 / spec.fps);
    put_u32(&mut h, frame_bytes * spec.fps + byte_rate);
    put_u32(&mut h, 0);
    put_u32(&mut h, AVIF_HASINDEX | AVIF_ISINTERLEAVED);
    put_u32(&mut h, video_frames);
    put_u32(&mut h, 0);
    put_u32(&mut h, 2);
    put_u32(&mut h, max_chunk);
    put_u32(&mut h, spec.width);
    put_u32(&mut h, spec.height);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }

    // Video stream.
    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 116);
    h.extend_from_slice(b"strl");
    stream_header(&mut h, *b"vids", *b"DIB ", 1, spec.fps, video_frames, frame_bytes, 0, spec);
    h.extend_from_slice(b"strf");
    put_u32(&mut h, 40);
    put_u32(&mut h, 40);
    put_u32(&mut h, spec.width);
    put_u32(&mut h, spec.height);
    put_u16(&mut h, 1);
    put_u16(&mut h, 24);
    put_u32(&mut h, 0);
    put_u32(&mut h, frame_bytes);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }

    // Audio stream.
    h.extend_from_slice(b"LIST");
    put_u32(&mut h, 94);
    h.extend_from_slice(b"strl");
    stream_header(
        &mut h,
        *b"auds",
        [0; 4],
        spec.block_align(),
        byte_rate,
        audio_frames,
        byte_rate,
        spec.block_align(),
        spec,
    );
    h.extend_from_slice(b"strf");
    put_u32(&mut h, 18);
    put_u16(&mut h, 1);
    put_u16(&mut h, spec.channels);
    put_u32(&mut h, spec.sample_rate);
    put_u32(&mut h, byte_rate);
    put_u16(&mut h, spec.block_align() as u16);
    put_u16(&mut h, 16);
    put_u16(&mut h, 0);

    h.extend_from_slice(b"LIST");
    put_u32(&mut h, movi_size);
    h.extend_from_slice(b"movi");
    h
}

#[allow(clippy::too_many_arguments)]
fn stream_header(
    h: &mut Vec<u8>,
    kind: [u8; 4],
    handler: [u8; 4],
    scale: u32,
    rate: u32,
    length: u32,
    buffer: u32,
    sample_size: u32,
    spec: &AviSpec,
) {
    h.extend_from_slice(b"strh");
    put_u32(h, 56);
    h.extend_from_slice(&kind);
    h.extend_from_slice(&handler);
    put_u32(h, 0);
    put_u16(h, 0);
    put_u16(h, 0);
    put_u32(h, 0);
    put_u32(h, scale);
    put_u32(h, rate);
    put_u32(h, 0);
    put_u32(h, length);
    put_u32(h, buffer);
    put_u32(h, u32::MAX);
    put_u32(h, sample_size);
    let (w, hgt) = if &kind == b"vids" {
        (spec.width as u16, spec.height as u16)
    } else {
        (0, 0)
    };
    put_u16(h, 0);
    put_u16(h, 0);
    put_u16(h, w);
    put_u16(h, hgt);
}
