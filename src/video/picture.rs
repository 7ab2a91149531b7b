//! Decoded pictures handed to the output

use crate::clock::ClockTick;
use crate::error::VideoError;

/// Picture layouts the output accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit 4:2:2, Cb Y Cr Y
    Uyvy,
    /// Planar 10-bit 4:2:2, output as v210
    Yuv422p10,
}

impl PixelFormat {
    pub fn for_depth(ten_bits: bool) -> Self {
        if ten_bits {
            Self::Yuv422p10
        } else {
            Self::Uyvy
        }
    }
}

/// Pixel storage, tightly packed rows
#[derive(Debug, Clone, PartialEq)]
pub enum PictureData {
    Uyvy(Vec<u8>),
    Yuv422p10 {
        y: Vec<u16>,
        u: Vec<u16>,
        v: Vec<u16>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub timestamp: ClockTick,
    pub width: u32,
    pub height: u32,
    pub data: PictureData,
}

impl Picture {
    /// Black picture of the given layout
    pub fn blank(format: PixelFormat, width: u32, height: u32, timestamp: ClockTick) -> Self {
        let pixels = width as usize * height as usize;
        let chroma = width.div_ceil(2) as usize * height as usize;
        let data = match format {
            PixelFormat::Uyvy => PictureData::Uyvy(vec![0; 2 * chroma * 2]),
            PixelFormat::Yuv422p10 => PictureData::Yuv422p10 {
                y: vec![0; pixels],
                u: vec![0; chroma],
                v: vec![0; chroma],
            },
        };
        let mut picture = Self {
            timestamp,
            width,
            height,
            data,
        };
        picture.black_out();
        picture
    }

    pub fn format(&self) -> PixelFormat {
        match self.data {
            PictureData::Uyvy(_) => PixelFormat::Uyvy,
            PictureData::Yuv422p10 { .. } => PixelFormat::Yuv422p10,
        }
    }

    /// Overwrite every pixel with legal-range black
    pub fn black_out(&mut self) {
        match &mut self.data {
            PictureData::Uyvy(bytes) => {
                for pair in bytes.chunks_exact_mut(2) {
                    pair[0] = 0x80;
                    pair[1] = 0x10;
                }
            }
            PictureData::Yuv422p10 { y, u, v } => {
                y.fill(0x040);
                u.fill(0x200);
                v.fill(0x200);
            }
        }
    }

    /// Check the planes hold `width x height` pixels
    pub fn validate(&self) -> Result<(), VideoError> {
        let pixels = self.width as usize * self.height as usize;
        let chroma = self.width.div_ceil(2) as usize * self.height as usize;
        let ok = match &self.data {
            PictureData::Uyvy(bytes) => bytes.len() >= 4 * chroma,
            PictureData::Yuv422p10 { y, u, v } => {
                y.len() >= pixels && u.len() >= chroma && v.len() >= chroma
            }
        };
        if ok {
            Ok(())
        } else {
            Err(VideoError::FormatMismatch(format!(
                "planes too small for {}x{}",
                self.width, self.height
            )))
        }
    }
}
