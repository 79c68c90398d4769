//! Chunked frame container codec.
//!
//! Cached video chunks arrive as a concatenation of independently encoded
//! pictures. Each picture is a block-transform image: 8x8 macroblocks of
//! quantized DCT coefficients (zigzag order, zero-run coded) for a luma plane
//! and two 2x2-subsampled chroma planes, converted to RGBA for canvas blit.
//!
//! Decoding is a pure per-chunk transform: all state lives in an explicit
//! [`DecodeContext`], nothing leaks between chunks, and the same chunk always
//! decodes to bit-identical output. A malformed chunk fails the whole request;
//! no partially decoded frame is ever returned.

use crate::error::{CanvasError, CanvasResult};

const MAGIC: [u8; 4] = *b"TCF1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 2 + 2 + 1 + 4;

/// A decoded frame ready for canvas blit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub number: u64,
    pub width: u32,
    pub height: u32,
    /// Straight-alpha RGBA, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

/// Which color channel to keep in decoded output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorChannel {
    #[default]
    All,
    Red,
    Green,
    Blue,
}

/// Explicit per-invocation decode state.
///
/// Channel isolation is part of the context instead of module-level state, so
/// concurrent decodes of unrelated chunks cannot observe each other.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeContext {
    /// Frame number assigned to the first picture of the chunk.
    pub base_frame: u64,
    pub channel: ColorChannel,
}

impl DecodeContext {
    pub fn new(base_frame: u64) -> Self {
        Self {
            base_frame,
            channel: ColorChannel::All,
        }
    }

    pub fn with_channel(mut self, channel: ColorChannel) -> Self {
        self.channel = channel;
        self
    }
}

/// Decode every picture of a chunk, in order.
pub fn decode_chunk(ctx: &DecodeContext, chunk: &[u8]) -> CanvasResult<Vec<RawFrame>> {
    if chunk.is_empty() {
        return Err(CanvasError::decode("empty chunk"));
    }
    let tables = CosTables::new();
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset < chunk.len() {
        let (frame, consumed) = decode_picture(
            ctx,
            &tables,
            &chunk[offset..],
            ctx.base_frame + frames.len() as u64,
        )?;
        frames.push(frame);
        offset += consumed;
    }
    Ok(frames)
}

/// Encode frames into a chunk. Inverse of [`decode_chunk`], used by the
/// chunk-cache collaborator and test fixtures.
pub fn encode_chunk(frames: &[RawFrame], quality: u8) -> CanvasResult<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(CanvasError::validation("quality must be in 1..=100"));
    }
    let tables = CosTables::new();
    let mut out = Vec::new();
    for frame in frames {
        encode_picture(&tables, frame, quality, &mut out)?;
    }
    Ok(out)
}

fn decode_picture(
    ctx: &DecodeContext,
    tables: &CosTables,
    data: &[u8],
    number: u64,
) -> CanvasResult<(RawFrame, usize)> {
    if data.len() < HEADER_LEN {
        return Err(CanvasError::decode("truncated picture header"));
    }
    if data[..4] != MAGIC {
        return Err(CanvasError::decode("bad picture magic"));
    }
    if data[4] != VERSION {
        return Err(CanvasError::decode(format!(
            "unsupported container version {}",
            data[4]
        )));
    }
    let width = u16::from_le_bytes([data[5], data[6]]) as usize;
    let height = u16::from_le_bytes([data[7], data[8]]) as usize;
    let quality = data[9];
    let payload_len = u32::from_le_bytes([data[10], data[11], data[12], data[13]]) as usize;

    if width == 0 || height == 0 {
        return Err(CanvasError::decode("zero picture dimensions"));
    }
    if !(1..=100).contains(&quality) {
        return Err(CanvasError::decode("quality out of range"));
    }
    let Some(payload) = data.get(HEADER_LEN..HEADER_LEN + payload_len) else {
        return Err(CanvasError::decode("truncated picture payload"));
    };

    let luma_q = quant_table(&LUMA_BASE, quality);
    let chroma_q = quant_table(&CHROMA_BASE, quality);

    let cw = width.div_ceil(2);
    let ch = height.div_ceil(2);

    let mut cursor = 0usize;
    let y_plane = decode_plane(tables, payload, &mut cursor, width, height, &luma_q)?;
    let cb_plane = decode_plane(tables, payload, &mut cursor, cw, ch, &chroma_q)?;
    let cr_plane = decode_plane(tables, payload, &mut cursor, cw, ch, &chroma_q)?;
    if cursor != payload.len() {
        return Err(CanvasError::decode("trailing bytes in picture payload"));
    }

    let mut rgba = vec![0u8; width * height * 4];
    for y in 0..height {
        for x in 0..width {
            let luma = y_plane[y * width + x];
            let cb = cb_plane[(y / 2) * cw + x / 2];
            let cr = cr_plane[(y / 2) * cw + x / 2];
            let (r, g, b) = ycbcr_to_rgb(luma, cb, cr);
            let px = &mut rgba[(y * width + x) * 4..(y * width + x) * 4 + 4];
            match ctx.channel {
                ColorChannel::All => {
                    px[0] = r;
                    px[1] = g;
                    px[2] = b;
                }
                ColorChannel::Red => px[0] = r,
                ColorChannel::Green => px[1] = g,
                ColorChannel::Blue => px[2] = b,
            }
            px[3] = 255;
        }
    }

    Ok((
        RawFrame {
            number,
            width: width as u32,
            height: height as u32,
            rgba,
        },
        HEADER_LEN + payload_len,
    ))
}

fn encode_picture(
    tables: &CosTables,
    frame: &RawFrame,
    quality: u8,
    out: &mut Vec<u8>,
) -> CanvasResult<()> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if width == 0 || height == 0 || width > u16::MAX as usize || height > u16::MAX as usize {
        return Err(CanvasError::validation("picture dimensions out of range"));
    }
    if frame.rgba.len() != width * height * 4 {
        return Err(CanvasError::validation("rgba buffer does not match dimensions"));
    }

    // RGB -> YCbCr planes, chroma averaged over 2x2 neighborhoods.
    let mut y_plane = vec![0.0f64; width * height];
    let mut cb_full = vec![0.0f64; width * height];
    let mut cr_full = vec![0.0f64; width * height];
    for i in 0..width * height {
        let r = f64::from(frame.rgba[i * 4]);
        let g = f64::from(frame.rgba[i * 4 + 1]);
        let b = f64::from(frame.rgba[i * 4 + 2]);
        y_plane[i] = 0.299 * r + 0.587 * g + 0.114 * b;
        cb_full[i] = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        cr_full[i] = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    }
    let cw = width.div_ceil(2);
    let ch = height.div_ceil(2);
    let mut cb_plane = vec![0.0f64; cw * ch];
    let mut cr_plane = vec![0.0f64; cw * ch];
    for cy in 0..ch {
        for cx in 0..cw {
            let mut cb_sum = 0.0;
            let mut cr_sum = 0.0;
            let mut n = 0.0;
            for dy in 0..2 {
                for dx in 0..2 {
                    let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                    if x < width && y < height {
                        cb_sum += cb_full[y * width + x];
                        cr_sum += cr_full[y * width + x];
                        n += 1.0;
                    }
                }
            }
            cb_plane[cy * cw + cx] = cb_sum / n;
            cr_plane[cy * cw + cx] = cr_sum / n;
        }
    }

    let luma_q = quant_table(&LUMA_BASE, quality);
    let chroma_q = quant_table(&CHROMA_BASE, quality);

    let mut payload = Vec::new();
    encode_plane(tables, &y_plane, width, height, &luma_q, &mut payload);
    encode_plane(tables, &cb_plane, cw, ch, &chroma_q, &mut payload);
    encode_plane(tables, &cr_plane, cw, ch, &chroma_q, &mut payload);

    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    out.push(quality);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn decode_plane(
    tables: &CosTables,
    payload: &[u8],
    cursor: &mut usize,
    width: usize,
    height: usize,
    quant: &[u16; 64],
) -> CanvasResult<Vec<u8>> {
    let blocks_w = width.div_ceil(8);
    let blocks_h = height.div_ceil(8);
    let mut plane = vec![0u8; width * height];

    for by in 0..blocks_h {
        for bx in 0..blocks_w {
            let coeffs = read_block(payload, cursor, quant)?;
            let pixels = tables.idct(&coeffs);
            for (i, &value) in pixels.iter().enumerate() {
                let x = bx * 8 + i % 8;
                let y = by * 8 + i / 8;
                if x < width && y < height {
                    plane[y * width + x] = value;
                }
            }
        }
    }
    Ok(plane)
}

fn encode_plane(
    tables: &CosTables,
    plane: &[f64],
    width: usize,
    height: usize,
    quant: &[u16; 64],
    out: &mut Vec<u8>,
) {
    let blocks_w = width.div_ceil(8);
    let blocks_h = height.div_ceil(8);
    for by in 0..blocks_h {
        for bx in 0..blocks_w {
            let mut block = [0.0f64; 64];
            for (i, value) in block.iter_mut().enumerate() {
                // Edge-replicate padding keeps partial blocks smooth.
                let x = (bx * 8 + i % 8).min(width - 1);
                let y = (by * 8 + i / 8).min(height - 1);
                *value = plane[y * width + x] - 128.0;
            }
            let coeffs = tables.fdct(&block);
            write_block(&coeffs, quant, out);
        }
    }
}

/// Read one zero-run coded block and dequantize it.
fn read_block(payload: &[u8], cursor: &mut usize, quant: &[u16; 64]) -> CanvasResult<[f64; 64]> {
    let Some(&pair_count) = payload.get(*cursor) else {
        return Err(CanvasError::decode("truncated block header"));
    };
    *cursor += 1;

    let mut coeffs = [0.0f64; 64];
    let mut pos = 0usize;
    for _ in 0..pair_count {
        let Some(bytes) = payload.get(*cursor..*cursor + 3) else {
            return Err(CanvasError::decode("truncated coefficient pair"));
        };
        *cursor += 3;
        let run = bytes[0] as usize;
        let value = i16::from_le_bytes([bytes[1], bytes[2]]);
        pos += run;
        if pos >= 64 {
            return Err(CanvasError::decode("coefficient run overflows block"));
        }
        coeffs[ZIGZAG[pos]] = f64::from(value) * f64::from(quant[ZIGZAG[pos]]);
        pos += 1;
    }
    Ok(coeffs)
}

fn write_block(coeffs: &[f64; 64], quant: &[u16; 64], out: &mut Vec<u8>) {
    let mut pairs: Vec<(u8, i16)> = Vec::new();
    let mut run = 0usize;
    for &zz in &ZIGZAG {
        let q = (coeffs[zz] / f64::from(quant[zz])).round();
        let q = q.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        if q == 0 {
            run += 1;
        } else {
            pairs.push((run as u8, q));
            run = 0;
        }
    }
    out.push(pairs.len() as u8);
    for (run, value) in pairs {
        out.push(run);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Scale a base quantization table by the quality setting (JPEG-style curve),
/// clamping entries to `1..=255`.
fn quant_table(base: &[u16; 64], quality: u8) -> [u16; 64] {
    let q = u32::from(quality);
    let scale = if q < 50 { 5000 / q } else { 200 - 2 * q };
    let mut table = [0u16; 64];
    for (slot, &b) in table.iter_mut().zip(base) {
        *slot = ((u32::from(b) * scale + 50) / 100).clamp(1, 255) as u16;
    }
    table
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let y = f64::from(y);
    let cb = f64::from(cb) - 128.0;
    let cr = f64::from(cr) - 128.0;
    let clamp = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    (
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    )
}

/// Precomputed DCT basis cosines; built once per chunk, never shared.
struct CosTables {
    cos: [[f64; 8]; 8],
}

impl CosTables {
    fn new() -> Self {
        let mut cos = [[0.0f64; 8]; 8];
        for (x, row) in cos.iter_mut().enumerate() {
            for (u, value) in row.iter_mut().enumerate() {
                *value = (((2 * x + 1) as f64) * (u as f64) * std::f64::consts::PI / 16.0).cos();
            }
        }
        Self { cos }
    }

    fn fdct(&self, block: &[f64; 64]) -> [f64; 64] {
        let mut out = [0.0f64; 64];
        for v in 0..8 {
            for u in 0..8 {
                let mut sum = 0.0;
                for y in 0..8 {
                    for x in 0..8 {
                        sum += block[y * 8 + x] * self.cos[x][u] * self.cos[y][v];
                    }
                }
                out[v * 8 + u] = 0.25 * norm(u) * norm(v) * sum;
            }
        }
        out
    }

    fn idct(&self, coeffs: &[f64; 64]) -> [u8; 64] {
        let mut out = [0u8; 64];
        for y in 0..8 {
            for x in 0..8 {
                let mut sum = 0.0;
                for v in 0..8 {
                    for u in 0..8 {
                        sum += norm(u) * norm(v) * coeffs[v * 8 + u] * self.cos[x][u] * self.cos[y][v];
                    }
                }
                out[y * 8 + x] = (0.25 * sum + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

fn norm(i: usize) -> f64 {
    if i == 0 { std::f64::consts::FRAC_1_SQRT_2 } else { 1.0 }
}

#[rustfmt::skip]
const ZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

#[rustfmt::skip]
const LUMA_BASE: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61,
    12, 12, 14, 19, 26, 58, 60, 55,
    14, 13, 16, 24, 40, 57, 69, 56,
    14, 17, 22, 29, 51, 87, 80, 62,
    18, 22, 37, 56, 68, 109, 103, 77,
    24, 35, 55, 64, 81, 104, 113, 92,
    49, 64, 78, 87, 103, 121, 120, 101,
    72, 92, 95, 98, 112, 100, 103, 99,
];

#[rustfmt::skip]
const CHROMA_BASE: [u16; 64] = [
    17, 18, 24, 47, 99, 99, 99, 99,
    18, 21, 26, 66, 99, 99, 99, 99,
    24, 26, 56, 99, 99, 99, 99, 99,
    47, 66, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(number: u64, width: u32, height: u32, rgb: [u8; 3]) -> RawFrame {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        RawFrame {
            number,
            width,
            height,
            rgba,
        }
    }

    fn assert_close(actual: &[u8], expected: [u8; 3], tolerance: i16) {
        for px in actual.chunks_exact(4) {
            for c in 0..3 {
                let diff = (i16::from(px[c]) - i16::from(expected[c])).abs();
                assert!(diff <= tolerance, "channel {c}: {} vs {}", px[c], expected[c]);
            }
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn solid_color_round_trips_within_quant_error() {
        let frame = solid_frame(0, 16, 16, [200, 60, 30]);
        let chunk = encode_chunk(std::slice::from_ref(&frame), 90).unwrap();
        let decoded = decode_chunk(&DecodeContext::new(0), &chunk).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].width, 16);
        assert_eq!(decoded[0].height, 16);
        assert_close(&decoded[0].rgba, [200, 60, 30], 6);
    }

    #[test]
    fn multi_picture_chunk_numbers_frames_from_base() {
        let frames = vec![
            solid_frame(0, 8, 8, [10, 20, 30]),
            solid_frame(0, 8, 8, [240, 230, 220]),
        ];
        let chunk = encode_chunk(&frames, 75).unwrap();
        let decoded = decode_chunk(&DecodeContext::new(100), &chunk).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].number, 100);
        assert_eq!(decoded[1].number, 101);
    }

    #[test]
    fn non_multiple_of_8_dimensions_decode() {
        let frame = solid_frame(0, 13, 5, [90, 90, 90]);
        let chunk = encode_chunk(std::slice::from_ref(&frame), 85).unwrap();
        let decoded = decode_chunk(&DecodeContext::new(0), &chunk).unwrap();
        assert_eq!(decoded[0].width, 13);
        assert_eq!(decoded[0].height, 5);
        assert_eq!(decoded[0].rgba.len(), 13 * 5 * 4);
        assert_close(&decoded[0].rgba, [90, 90, 90], 6);
    }

    #[test]
    fn decode_is_deterministic() {
        let frame = solid_frame(0, 24, 16, [5, 128, 250]);
        let chunk = encode_chunk(std::slice::from_ref(&frame), 60).unwrap();
        let a = decode_chunk(&DecodeContext::new(0), &chunk).unwrap();
        let b = decode_chunk(&DecodeContext::new(0), &chunk).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn channel_isolation_does_not_leak_between_decodes() {
        let frame = solid_frame(0, 8, 8, [200, 150, 100]);
        let chunk = encode_chunk(std::slice::from_ref(&frame), 90).unwrap();

        let red = decode_chunk(&DecodeContext::new(0).with_channel(ColorChannel::Red), &chunk)
            .unwrap();
        for px in red[0].rgba.chunks_exact(4) {
            assert_eq!((px[1], px[2]), (0, 0));
            assert!(px[0] > 0);
        }

        // A later full decode of the same chunk is unaffected.
        let full = decode_chunk(&DecodeContext::new(0), &chunk).unwrap();
        assert_close(&full[0].rgba, [200, 150, 100], 6);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let frame = solid_frame(0, 8, 8, [1, 2, 3]);
        let mut chunk = encode_chunk(std::slice::from_ref(&frame), 90).unwrap();
        chunk[0] = b'X';
        assert!(matches!(
            decode_chunk(&DecodeContext::new(0), &chunk),
            Err(CanvasError::Decode(_))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let frame = solid_frame(0, 16, 16, [1, 2, 3]);
        let chunk = encode_chunk(std::slice::from_ref(&frame), 90).unwrap();
        let truncated = &chunk[..chunk.len() - 3];
        assert!(decode_chunk(&DecodeContext::new(0), truncated).is_err());
    }

    #[test]
    fn empty_chunk_is_rejected() {
        assert!(decode_chunk(&DecodeContext::new(0), &[]).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let frame = solid_frame(0, 8, 8, [1, 2, 3]);
        let mut chunk = encode_chunk(std::slice::from_ref(&frame), 90).unwrap();
        chunk.push(0xAB);
        assert!(decode_chunk(&DecodeContext::new(0), &chunk).is_err());
    }
}
