/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Stream format values the protocol consumes: NV12 only.

use core::fmt;

/// Build a little-endian four character code.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    u32::from_le_bytes([a, b, c, d])
}

/// Y/CbCr 4:2:0, one luma plane followed by an interleaved chroma plane.
pub const PIX_FMT_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');

/// Bits per pixel of NV12.
pub const NV12_BPP: u32 = 12;

pub const MIN_WIDTH: u32 = 8;
pub const MAX_WIDTH: u32 = 3840;
pub const MIN_HEIGHT: u32 = 8;
pub const MAX_HEIGHT: u32 = 1080;

/// Printable four character code.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FourCc(pub u32);

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            let c = if byte.is_ascii_graphic() { byte as char } else { '.' };
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({:#010x})", self, self.0)
    }
}

/// Single plane pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
}

impl PixFormat {
    /// Adjust a requested format to what the device can output.
    ///
    /// `None` if the pixel format is not NV12. Width and height are clamped, line length and
    /// image size follow from them.
    pub fn try_format(pixelformat: u32, width: u32, height: u32) -> Option<Self> {
        if pixelformat != PIX_FMT_NV12 {
            return None;
        }
        Some(Self::nv12(width, height))
    }

    /// NV12 format of the given size, clamped.
    pub fn nv12(width: u32, height: u32) -> Self {
        let width = width.clamp(MIN_WIDTH, MAX_WIDTH);
        let height = height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        let bytesperline = width;
        Self {
            width,
            height,
            pixelformat: PIX_FMT_NV12,
            bytesperline,
            sizeimage: height * bytesperline * NV12_BPP / 8,
        }
    }
}

/// Frames per second as a fraction, as published in the control page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Rate of a frame interval of `numerator / denominator` seconds.
    ///
    /// `None` for an interval with a zero part.
    pub const fn from_interval(numerator: u32, denominator: u32) -> Option<Self> {
        if numerator == 0 || denominator == 0 {
            return None;
        }
        Some(Self::new(denominator, numerator))
    }
}

impl Default for FrameRate {
    /// Frame interval of 1/30 s.
    fn default() -> Self {
        Self::new(30, 1)
    }
}
