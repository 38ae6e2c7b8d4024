use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::calibration::CalibrationModel;
use crate::config::Config;
use crate::pixel_format::{ChannelLayout, Color};
use crate::protocol::{ColorMode, FrameParser, ParseEvent};
use crate::render::RenderGate;
use crate::source::ByteSource;
use crate::stats::{StatsReport, StatsTracker};
use crate::strip::{PixelSink, StripDriver};

/// How long shutdown waits for the strip to accept the blank frame
const SHUTDOWN_WAIT: Duration = Duration::from_millis(100);

/// Pick the pixel strategy for the configured strip
pub fn color_mode(config: &Config) -> ColorMode {
    match config.strip.layout() {
        ChannelLayout::Rgb => ColorMode::Rgb,
        ChannelLayout::Rgbw => {
            let params = config.strip.white_tone.default_params();
            ColorMode::Rgbw(Box::new(CalibrationModel::new(params)))
        }
    }
}

/// Single-threaded loop: byte source -> parser -> pixel sink -> render gate
pub struct Receiver<S: ByteSource, D: StripDriver> {
    source: S,
    parser: FrameParser,
    sink: PixelSink<D>,
    gate: RenderGate,
    stats: StatsTracker,
    read_buf: Vec<u8>,
    bytes_received: u64,
    frames_started: u64,
    frames_completed: u64,
    running: Arc<AtomicBool>,
}

impl<S: ByteSource, D: StripDriver> Receiver<S, D> {
    pub fn new(source: S, driver: D, mode: ColorMode, read_buffer_size: usize, stats: StatsTracker) -> Self {
        Receiver {
            source,
            parser: FrameParser::new(mode),
            sink: PixelSink::new(driver),
            gate: RenderGate::new(),
            stats,
            read_buf: vec![0u8; read_buffer_size.max(1)],
            bytes_received: 0,
            frames_started: 0,
            frames_completed: 0,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Build from a validated configuration
    pub fn from_config(source: S, driver: D, config: &Config) -> Self {
        let stats = StatsTracker::new(config.stats.window_ms, config.stats.report_ms);
        Self::new(source, driver, color_mode(config), config.serial.read_buffer_size, stats)
    }

    /// Get a clone of the running flag for signal handlers
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    #[allow(dead_code)]
    pub fn parser(&self) -> &FrameParser {
        &self.parser
    }

    pub fn sink(&self) -> &PixelSink<D> {
        &self.sink
    }

    #[allow(dead_code)]
    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    #[allow(dead_code)]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn frames_started(&self) -> u64 {
        self.frames_started
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// One loop iteration. Returns the number of bytes consumed.
    pub fn poll(&mut self, now_ms: u64) -> Result<usize> {
        let available = self
            .source
            .available_count()
            .context("Failed to query byte source")?
            .min(self.read_buf.len());

        let read = if available > 0 {
            self.source
                .read_up_to(&mut self.read_buf, available)
                .context("Failed to read from byte source")?
        } else {
            0
        };

        if let Some(report) = self.stats.observe(now_ms, read) {
            self.log_report(report);
        }

        // Only between frames, so a half-received frame is never pushed out
        if self.parser.is_idle() {
            self.gate.tick(&mut self.sink, &mut self.stats);
        }

        if read > 0 {
            self.bytes_received += read as u64;
            trace!("Read {} bytes: {}", read, hex_preview(&self.read_buf[..read]));
        }

        for i in 0..read {
            let byte = self.read_buf[i];
            if let Some(event) = self.parser.advance(byte) {
                self.handle_event(event);
            }
        }

        Ok(read)
    }

    fn handle_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::FrameStarted => {
                self.frames_started += 1;
                self.stats.frame_started();
            }

            ParseEvent::Header { pixel_count, is_version2 } => {
                if self.sink.resize(pixel_count) {
                    info!("LED strip resized to {} pixels", pixel_count);
                }
                trace!("Header: {} pixels, v2={}", pixel_count, is_version2);
            }

            ParseEvent::Pixel { index, color } => self.sink.write(index, color),

            ParseEvent::FrameComplete { is_version2, pending_calibration } => {
                self.frames_completed += 1;
                self.gate.on_frame_complete();
                self.gate.tick(&mut self.sink, &mut self.stats);

                if let Some(params) = pending_calibration {
                    if self.parser.apply_calibration(params) {
                        info!("Calibration updated: {}", params);
                    }
                }
                trace!("Frame complete (v2={})", is_version2);
            }

            ParseEvent::Discarded(reason) => debug!("Frame dropped: {}", reason),
        }
    }

    fn log_report(&self, report: StatsReport) {
        match self.parser.calibration() {
            Some(calibration) => info!("Last stats. {} RGBW => {}", report, calibration),
            None => info!("Last stats. {}", report),
        }
    }

    /// Run until the running flag is cleared or a finite source is drained
    pub fn run(&mut self) -> Result<()> {
        let start = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            let now_ms = start.elapsed().as_millis() as u64;
            let read = self.poll(now_ms)?;

            if self.source.is_finished() {
                // A truncated last frame keeps the parser out of marker scan
                self.gate.tick(&mut self.sink, &mut self.stats);
                if !self.gate.is_pending() {
                    break;
                }
            }

            if read == 0 {
                // Small sleep to avoid busy-looping
                thread::sleep(Duration::from_millis(1));
            }
        }

        Ok(())
    }

    /// Turn the LEDs off and log the final counters
    pub fn shutdown(&mut self) {
        let count = self.sink.pixel_count();
        for index in 0..count {
            self.sink.write(index, Color::BLACK);
        }

        let deadline = Instant::now() + SHUTDOWN_WAIT;
        while count > 0 && !self.sink.can_show() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if count > 0 && self.sink.can_show() {
            self.sink.show();
        }

        info!(
            "Stopped. {} bytes, {} frames started, {} completed",
            self.bytes_received, self.frames_started, self.frames_completed
        );
    }
}

/// First 30 bytes as hex, for trace output
fn hex_preview(data: &[u8]) -> String {
    data.iter()
        .take(30)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationParams, WhiteTone};
    use crate::protocol::encode_frame;
    use crate::source::ReplaySource;
    use crate::strip::mock::MockStrip;

    fn receiver(stream: Vec<u8>, mode: ColorMode) -> Receiver<ReplaySource, MockStrip> {
        Receiver::new(
            ReplaySource::new(stream, 4096),
            MockStrip::with_pixels(0),
            mode,
            4096,
            StatsTracker::default(),
        )
    }

    fn drain<S: ByteSource, D: StripDriver>(rx: &mut Receiver<S, D>, now_ms: u64) {
        while rx.poll(now_ms).unwrap() > 0 {}
    }

    fn solid(count: usize, color: Color) -> Vec<Color> {
        vec![color; count]
    }

    #[test]
    fn test_valid_frame_is_rendered() {
        let frame = encode_frame(&solid(5, Color::rgb(1, 2, 3)), None);
        let mut rx = receiver(frame, ColorMode::Rgb);
        drain(&mut rx, 10);

        let strip = rx.sink().driver();
        assert_eq!(strip.reinits, vec![5]);
        assert_eq!(strip.shown, vec![solid(5, Color::rgb(1, 2, 3))]);
        assert_eq!(rx.stats().current(), StatsReport { total_frames: 1, good_frames: 1 });
        assert_eq!(rx.frames_completed(), 1);
    }

    #[test]
    fn test_corrupt_header_counts_attempt_only() {
        let mut frame = encode_frame(&solid(5, Color::rgb(1, 2, 3)), None);
        frame[5] ^= 0xFF;
        let mut rx = receiver(frame, ColorMode::Rgb);
        drain(&mut rx, 10);

        let strip = rx.sink().driver();
        assert!(strip.reinits.is_empty());
        assert!(strip.shown.is_empty());
        assert_eq!(rx.stats().current(), StatsReport { total_frames: 1, good_frames: 0 });
        assert!(rx.parser().is_idle());
    }

    #[test]
    fn test_identical_frames_do_not_reallocate() {
        let frame = encode_frame(&solid(8, Color::rgb(5, 5, 5)), None);
        let mut stream = frame.clone();
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(&frame);

        let mut rx = receiver(stream, ColorMode::Rgb);
        drain(&mut rx, 10);

        assert_eq!(rx.sink().reallocations(), 1);
        assert_eq!(rx.sink().driver().shown.len(), 3);
    }

    #[test]
    fn test_count_change_reallocates() {
        let mut stream = encode_frame(&solid(8, Color::rgb(5, 5, 5)), None);
        stream.extend(encode_frame(&solid(3, Color::rgb(6, 6, 6)), None));

        let mut rx = receiver(stream, ColorMode::Rgb);
        drain(&mut rx, 10);

        assert_eq!(rx.sink().driver().reinits, vec![8, 3]);
        assert_eq!(rx.sink().driver().shown.last(), Some(&solid(3, Color::rgb(6, 6, 6))));
    }

    #[test]
    fn test_frames_coalesce_until_hardware_ready() {
        let first = encode_frame(&solid(4, Color::rgb(0xAA, 0, 0)), None);
        let second = encode_frame(&solid(4, Color::rgb(0, 0xBB, 0)), None);

        // Allocate the strip, then hold it busy for a while
        let mut rx = receiver(first.clone(), ColorMode::Rgb);
        drain(&mut rx, 0);
        assert_eq!(rx.sink().driver().shown.len(), 1);

        let mut stream = first;
        stream.extend_from_slice(&second);
        rx.source = ReplaySource::new(stream, 4096);
        rx.sink.driver().busy_for(5);

        // Both frames complete inside one poll; strip says not ready
        drain(&mut rx, 1);
        assert_eq!(rx.frames_completed(), 3);
        assert_eq!(rx.sink().driver().shown.len(), 1);

        // Hardware becomes ready on later idle iterations
        for now in 2..10 {
            rx.poll(now).unwrap();
        }
        let shown = &rx.sink().driver().shown;
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[1], solid(4, Color::rgb(0, 0xBB, 0)));
    }

    #[test]
    fn test_failed_trailer_leaves_partial_image_unshown() {
        let good = encode_frame(&solid(3, Color::rgb(1, 1, 1)), None);
        let mut bad = encode_frame(&solid(3, Color::rgb(9, 9, 9)), None);
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);

        let mut stream = good;
        stream.extend_from_slice(&bad);
        let mut rx = receiver(stream, ColorMode::Rgb);
        drain(&mut rx, 10);

        let strip = rx.sink().driver();
        assert_eq!(strip.shown, vec![solid(3, Color::rgb(1, 1, 1))]);
        // Buffer holds the unvalidated pixels of the rejected frame
        assert_eq!(strip.buffer, solid(3, Color::rgb(9, 9, 9)));
        assert_eq!(rx.stats().current(), StatsReport { total_frames: 2, good_frames: 1 });
        assert_eq!(rx.frames_started(), 2);
        assert_eq!(rx.frames_completed(), 1);
    }

    #[test]
    fn test_calibration_updates_only_on_changed_v2() {
        let defaults = WhiteTone::Neutral.default_params();
        let mode = ColorMode::Rgbw(Box::new(CalibrationModel::new(defaults)));
        let pixels = solid(2, Color::rgb(100, 100, 100));
        let changed = CalibrationParams::new(0x80, 0xFF, 0xFF, 0xFF);

        let mut stream = encode_frame(&pixels, None);
        stream.extend(encode_frame(&pixels, Some(defaults)));
        let mut rx = receiver(stream, mode);
        drain(&mut rx, 10);
        assert_eq!(rx.parser().calibration(), Some(defaults));

        rx.source = ReplaySource::new(encode_frame(&pixels, Some(changed)), 4096);
        drain(&mut rx, 20);
        assert_eq!(rx.parser().calibration(), Some(changed));

        // The new tables apply to the next frame
        rx.source = ReplaySource::new(encode_frame(&pixels, None), 4096);
        drain(&mut rx, 30);
        // pre-white 100 -> gain 0x80 gives round(128 * 100 / 255) = 50
        assert_eq!(rx.sink().driver().shown.last(), Some(&solid(2, Color::rgbw(0, 0, 0, 50))));
    }

    #[test]
    fn test_rgb_mode_ignores_v2_calibration() {
        let pixels = solid(1, Color::rgb(7, 7, 7));
        let frame = encode_frame(&pixels, Some(CalibrationParams::new(1, 2, 3, 4)));
        let mut rx = receiver(frame, ColorMode::Rgb);
        drain(&mut rx, 10);

        assert_eq!(rx.parser().calibration(), None);
        assert_eq!(rx.sink().driver().shown, vec![pixels]);
    }

    #[test]
    fn test_split_reads_across_polls() {
        let frame = encode_frame(&solid(10, Color::rgb(3, 2, 1)), None);
        let mut rx = Receiver::new(
            ReplaySource::new(frame, 7),
            MockStrip::with_pixels(0),
            ColorMode::Rgb,
            5,
            StatsTracker::default(),
        );
        let mut polls = 0;
        while rx.poll(polls).unwrap() > 0 {
            polls += 1;
        }
        // 6 + 30 + 2 bytes in reads of at most 5
        assert_eq!(polls, 8);
        assert_eq!(rx.bytes_received(), 38);
        assert_eq!(rx.sink().driver().shown.len(), 1);
    }

    #[test]
    fn test_run_stops_when_replay_drained() {
        let mut stream = b"garbage".to_vec();
        stream.extend(encode_frame(&solid(2, Color::rgb(1, 1, 1)), None));
        let mut rx = receiver(stream, ColorMode::Rgb);
        rx.run().unwrap();
        assert_eq!(rx.sink().driver().shown.len(), 1);
    }

    #[test]
    fn test_run_renders_before_truncated_tail() {
        let mut stream = encode_frame(&solid(2, Color::rgb(4, 4, 4)), None);
        stream.extend_from_slice(b"Awa\x00");
        let mut rx = receiver(stream, ColorMode::Rgb);
        rx.sink.driver().busy_for(3);
        rx.run().unwrap();
        assert!(!rx.parser().is_idle());
        assert_eq!(rx.sink().driver().shown, vec![solid(2, Color::rgb(4, 4, 4))]);
    }

    #[test]
    fn test_shutdown_blanks_strip() {
        let frame = encode_frame(&solid(3, Color::rgb(50, 50, 50)), None);
        let mut rx = receiver(frame, ColorMode::Rgb);
        drain(&mut rx, 10);
        rx.shutdown();
        assert_eq!(rx.sink().driver().shown.last(), Some(&solid(3, Color::BLACK)));
    }

    #[test]
    fn test_idle_report_after_traffic() {
        let frame = encode_frame(&solid(1, Color::rgb(1, 1, 1)), None);
        let mut rx = receiver(frame, ColorMode::Rgb);
        drain(&mut rx, 1001);
        // Next window roll requires traffic; idle iterations only report
        rx.poll(1500).unwrap();
        assert_eq!(rx.stats().current().total_frames, 1);
        rx.poll(7000).unwrap();
        assert_eq!(rx.stats().current(), StatsReport::default());
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0x41, 0x77, 0x0a]), "41 77 0a");
        assert_eq!(hex_preview(&[0u8; 40]).split(' ').count(), 30);
    }
}
