use crate::calibration::CalibrationParams;
use crate::pixel_format::Color;
use crate::protocol::checksum::{header_checksum, Fletcher};

/// Largest pixel count the 16-bit count field can declare
pub const MAX_PIXELS: usize = 0x10000;

/// Build an AWA frame (HyperSerialESP32 format).
///
/// With `calibration` set the frame is protocol v2 ('AwA' marker and four
/// trailing calibration bytes). Only R, G and B are sent; `w` is ignored.
///
/// Panics if `pixels` is empty or longer than `MAX_PIXELS`.
pub fn encode_frame(pixels: &[Color], calibration: Option<CalibrationParams>) -> Vec<u8> {
    assert!(
        !pixels.is_empty() && pixels.len() <= MAX_PIXELS,
        "AWA frames carry 1..={} pixels, got {}",
        MAX_PIXELS,
        pixels.len()
    );

    // AWA header: 'Aw' + 'a'/'A' + LED count high + LED count low + CRC
    let count = pixels.len() - 1;
    let count_hi = (count >> 8) as u8;
    let count_lo = count as u8;

    let mut frame = Vec::with_capacity(6 + pixels.len() * 3 + 4 + 2);
    frame.extend_from_slice(b"Aw");
    frame.push(if calibration.is_some() { b'A' } else { b'a' });
    frame.push(count_hi);
    frame.push(count_lo);
    frame.push(header_checksum(count_hi, count_lo));

    let payload_start = frame.len();
    for color in pixels {
        frame.extend_from_slice(&[color.r, color.g, color.b]);
    }
    if let Some(c) = calibration {
        frame.extend_from_slice(&[c.gain, c.red, c.green, c.blue]);
    }

    let fletcher = Fletcher::over(&frame[payload_start..]);
    frame.push(fletcher.sum1());
    frame.push(fletcher.sum2());

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_layout() {
        let frame = encode_frame(&[Color::rgb(1, 2, 3), Color::rgb(4, 5, 6)], None);
        assert_eq!(&frame[..6], &[0x41, 0x77, 0x61, 0x00, 0x01, 0x54]);
        assert_eq!(&frame[6..12], &[1, 2, 3, 4, 5, 6]);

        let f = Fletcher::over(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(&frame[12..], &[f.sum1(), f.sum2()]);
        assert_eq!(&frame[12..], &[21, 56]);
    }

    #[test]
    fn test_v2_layout() {
        let calib = CalibrationParams::new(0xFF, 0xB0, 0xB0, 0x70);
        let frame = encode_frame(&[Color::rgb(0, 0, 0)], Some(calib));
        assert_eq!(&frame[..6], &[b'A', b'w', b'A', 0x00, 0x00, 0x55]);
        assert_eq!(&frame[9..13], &[0xFF, 0xB0, 0xB0, 0x70]);
        assert_eq!(frame.len(), 6 + 3 + 4 + 2);

        // Calibration bytes are covered by the trailer
        let f = Fletcher::over(&frame[6..13]);
        assert_eq!(&frame[13..], &[f.sum1(), f.sum2()]);
    }

    #[test]
    fn test_white_channel_not_sent() {
        let a = encode_frame(&[Color::rgbw(1, 2, 3, 200)], None);
        let b = encode_frame(&[Color::rgb(1, 2, 3)], None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_max_count_header() {
        let pixels = vec![Color::BLACK; MAX_PIXELS];
        let frame = encode_frame(&pixels, None);
        assert_eq!(&frame[3..6], &[0xFF, 0xFF, 0x55]);
    }

    #[test]
    #[should_panic]
    fn test_empty_frame_rejected() {
        encode_frame(&[], None);
    }
}
