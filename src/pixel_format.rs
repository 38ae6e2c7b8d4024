use serde::{Deserialize, Serialize};

/// Decoded pixel color. `w` stays 0 for 3-channel layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, w: 0 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, w: 0 }
    }

    pub fn rgbw(r: u8, g: u8, b: u8, w: u8) -> Self {
        Color { r, g, b, w }
    }
}

/// Number of channels carried per pixel on the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Rgb,
    /// White channel derived through the calibration tables
    Rgbw,
}

impl ChannelLayout {
    pub fn stride(self) -> usize {
        match self {
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgbw => 4,
        }
    }
}

/// Byte order the strip chip expects on its data line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelOrder {
    Rgb,
    Grb,
    Bgr,
    Rbg,
    Grbw,
    Rgbw,
}

impl ChannelOrder {
    pub fn layout(self) -> ChannelLayout {
        match self {
            ChannelOrder::Grbw | ChannelOrder::Rgbw => ChannelLayout::Rgbw,
            _ => ChannelLayout::Rgb,
        }
    }

    pub fn stride(self) -> usize {
        self.layout().stride()
    }

    /// Write one pixel into `out` in wire order. `out` must hold `stride()` bytes.
    pub fn pack(self, color: Color, out: &mut [u8]) {
        let Color { r, g, b, w } = color;
        match self {
            ChannelOrder::Rgb => out[..3].copy_from_slice(&[r, g, b]),
            ChannelOrder::Grb => out[..3].copy_from_slice(&[g, r, b]),
            ChannelOrder::Bgr => out[..3].copy_from_slice(&[b, g, r]),
            ChannelOrder::Rbg => out[..3].copy_from_slice(&[r, b, g]),
            ChannelOrder::Grbw => out[..4].copy_from_slice(&[g, r, b, w]),
            ChannelOrder::Rgbw => out[..4].copy_from_slice(&[r, g, b, w]),
        }
    }

    /// Inverse of `pack`
    #[allow(dead_code)]
    pub fn unpack(self, data: &[u8]) -> Color {
        match self {
            ChannelOrder::Rgb => Color::rgb(data[0], data[1], data[2]),
            ChannelOrder::Grb => Color::rgb(data[1], data[0], data[2]),
            ChannelOrder::Bgr => Color::rgb(data[2], data[1], data[0]),
            ChannelOrder::Rbg => Color::rgb(data[0], data[2], data[1]),
            ChannelOrder::Grbw => Color::rgbw(data[1], data[0], data[2], data[3]),
            ChannelOrder::Rgbw => Color::rgbw(data[0], data[1], data[2], data[3]),
        }
    }
}
