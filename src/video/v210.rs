//! v210 packing of 10-bit 4:2:2 pictures
//!
//! Components run Cb Y Cr Y ... three to a little-endian 32-bit word; rows
//! are padded to whole 128-byte blocks (48 pixels).

use crate::error::VideoError;
use crate::video::picture::{Picture, PictureData};

/// Row size of a v210 picture `width` pixels wide
pub fn row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(48) * 128
}

fn clip(v: u16) -> u32 {
    v.clamp(4, 1019) as u32
}

/// Pack one row. Bytes of `dst` past the packed data are zeroed.
pub fn pack_line(y: &[u16], u: &[u16], v: &[u16], width: usize, dst: &mut [u8]) {
    let pairs = width.div_ceil(2);
    let mut components = Vec::with_capacity(pairs * 4);
    for p in 0..pairs {
        let luma1 = if 2 * p + 1 < width { y.get(2 * p + 1) } else { None };
        components.push(u.get(p).map_or(0, |&c| clip(c)));
        components.push(y.get(2 * p).map_or(0, |&c| clip(c)));
        components.push(v.get(p).map_or(0, |&c| clip(c)));
        if let Some(&c) = luma1 {
            components.push(clip(c));
        }
    }

    let mut written = 0;
    for (chunk, out) in components.chunks(3).zip(dst.chunks_exact_mut(4)) {
        let word = chunk
            .iter()
            .enumerate()
            .fold(0u32, |w, (i, &c)| w | (c << (10 * i)));
        out.copy_from_slice(&word.to_le_bytes());
        written += 4;
    }
    dst[written..].fill(0);
}

/// Pack a planar 10-bit picture into `dst` using rows of `stride` bytes
pub fn pack_picture(picture: &Picture, dst: &mut [u8], stride: usize) -> Result<(), VideoError> {
    let PictureData::Yuv422p10 { y, u, v } = &picture.data else {
        return Err(VideoError::FormatMismatch("v210 needs a 10-bit picture".into()));
    };
    picture.validate()?;

    let width = picture.width as usize;
    let chroma_width = width.div_ceil(2);
    if stride < width.div_ceil(6) * 16 {
        return Err(VideoError::FormatMismatch(format!(
            "stride {} too small for width {}",
            stride, width
        )));
    }

    for (row, line) in dst.chunks_mut(stride).take(picture.height as usize).enumerate() {
        pack_line(
            &y[row * width..(row + 1) * width],
            &u[row * chroma_width..(row + 1) * chroma_width],
            &v[row * chroma_width..(row + 1) * chroma_width],
            width,
            line,
        );
    }
    Ok(())
}
