use std::fmt;

/// Window length after which counters are rolled while data flows
pub const DEFAULT_WINDOW_MS: u64 = 1000;
/// Silence after which the last window is reported
pub const DEFAULT_REPORT_MS: u64 = 5000;

/// Frame counters of the last completed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsReport {
    pub total_frames: u32,
    pub good_frames: u32,
}

impl StatsReport {
    /// Frames that started but were never rendered
    pub fn incomplete(&self) -> u32 {
        self.total_frames.saturating_sub(self.good_frames)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames: {}, good: {} (FPS), incompl.: {}",
            self.total_frames,
            self.good_frames,
            self.incomplete()
        )
    }
}

/// Attempted vs rendered frames per time window
#[derive(Debug)]
pub struct StatsTracker {
    window_ms: u64,
    report_ms: u64,
    start: u64,
    good_frames: u32,
    total_frames: u32,
    last: StatsReport,
}

impl StatsTracker {
    pub fn new(window_ms: u64, report_ms: u64) -> Self {
        StatsTracker {
            window_ms,
            report_ms,
            start: 0,
            good_frames: 0,
            total_frames: 0,
            last: StatsReport::default(),
        }
    }

    pub fn frame_started(&mut self) {
        self.total_frames = self.total_frames.wrapping_add(1);
    }

    pub fn frame_rendered(&mut self) {
        self.good_frames = self.good_frames.wrapping_add(1);
    }

    /// Counters of the window in progress
    pub fn current(&self) -> StatsReport {
        StatsReport {
            total_frames: self.total_frames,
            good_frames: self.good_frames,
        }
    }

    /// Counters of the last rolled window
    #[allow(dead_code)]
    pub fn last(&self) -> StatsReport {
        self.last
    }

    fn restart(&mut self, now_ms: u64) {
        self.start = now_ms;
        self.good_frames = 0;
        self.total_frames = 0;
    }

    /// Called once per loop iteration before the read bytes are parsed.
    /// Returns a report when the link has been idle long enough.
    pub fn observe(&mut self, now_ms: u64, bytes_read: usize) -> Option<StatsReport> {
        let elapsed = now_ms.saturating_sub(self.start);

        if bytes_read > 0 && elapsed > self.window_ms {
            if self.total_frames > 0 && self.total_frames >= self.good_frames {
                self.last = self.current();
            }
            self.restart(now_ms);
            None
        } else if elapsed > self.report_ms {
            self.restart(now_ms);
            Some(self.last)
        } else {
            None
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        StatsTracker::new(DEFAULT_WINDOW_MS, DEFAULT_REPORT_MS)
    }
}
