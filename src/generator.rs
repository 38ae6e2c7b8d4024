use anyhow::{Context, Result};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::calibration::CalibrationParams;
use crate::pixel_format::Color;
use crate::protocol::encode_frame;
use crate::source::open_port;

/// Line noise inserted between frames; contains no marker byte
const NOISE: &[u8] = b"noise\x00\xff\x13";

/// What the generated stream looks like
#[derive(Debug, Clone)]
pub struct PatternOptions {
    pub leds: usize,
    pub frames: usize,
    /// Send v2 frames carrying this calibration
    pub calibration: Option<CalibrationParams>,
    /// Flip one payload bit in every n-th frame
    pub corrupt_every: Option<usize>,
    /// Put line noise before every frame
    pub garbage: bool,
}

/// Rotating hue wheel across the strip
pub fn rainbow(leds: usize, frame: usize) -> Vec<Color> {
    (0..leds)
        .map(|i| {
            let pos = ((i * 256 / leds.max(1)) + frame * 4) % 256;
            wheel(pos as u8)
        })
        .collect()
}

fn wheel(pos: u8) -> Color {
    let pos = 255 - pos;
    match pos {
        0..=84 => Color::rgb(255 - pos * 3, 0, pos * 3),
        85..=169 => {
            let p = pos - 85;
            Color::rgb(0, p * 3, 255 - p * 3)
        }
        _ => {
            let p = pos - 170;
            Color::rgb(p * 3, 255 - p * 3, 0)
        }
    }
}

/// Encode frame `n` of the pattern, corrupted if requested
pub fn pattern_frame(opts: &PatternOptions, n: usize) -> Vec<u8> {
    let mut frame = encode_frame(&rainbow(opts.leds, n), opts.calibration);

    if let Some(every) = opts.corrupt_every {
        if every > 0 && (n + 1) % every == 0 {
            // XOR 1 never turns 0x00 into 0xFF, so the trailer always catches it
            frame[6] ^= 0x01;
        }
    }
    frame
}

/// Whole capture as one byte stream
pub fn build_capture(opts: &PatternOptions) -> Vec<u8> {
    let mut stream = Vec::new();
    for n in 0..opts.frames {
        if opts.garbage {
            stream.extend_from_slice(NOISE);
        }
        stream.extend(pattern_frame(opts, n));
    }
    stream
}

/// Stream the pattern to a serial port at a fixed frame rate.
/// Returns the number of frames written.
pub fn send_frames(
    port_name: &str,
    baud_rate: u32,
    opts: &PatternOptions,
    fps: u32,
    running: &AtomicBool,
) -> Result<u64> {
    let mut port = open_port(port_name, baud_rate, Duration::from_millis(1000))?;
    let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let mut frames_sent = 0u64;
    let mut n = 0usize;

    info!("Sending {} LEDs @ {} fps to {}", opts.leds, fps, port_name);

    while running.load(Ordering::Relaxed) && (opts.frames == 0 || n < opts.frames) {
        let started = Instant::now();

        let mut frame = Vec::new();
        if opts.garbage {
            frame.extend_from_slice(NOISE);
        }
        frame.extend(pattern_frame(opts, n));

        port.write_all(&frame)
            .with_context(|| format!("Serial error on {}", port_name))?;
        port.flush()
            .with_context(|| format!("Failed to flush {}", port_name))?;
        frames_sent += 1;
        n += 1;
        trace!("Frame {} sent: {} bytes", n, frame.len());

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    // Best effort: leave the strip dark
    let blank = encode_frame(&vec![Color::BLACK; opts.leds], opts.calibration);
    if port.write_all(&blank).and_then(|_| port.flush()).is_err() {
        debug!("Failed to send blank frame to {}", port_name);
    }

    Ok(frames_sent)
}
