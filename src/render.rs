use crate::stats::StatsTracker;
use crate::strip::{PixelSink, StripDriver};

/// Holds "a validated frame is waiting" until the strip can take it.
///
/// Frames completing while the strip is busy are not queued: they overwrite
/// the pixel buffer and the next render shows whatever it holds by then.
#[derive(Debug, Default)]
pub struct RenderGate {
    want_show: bool,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame_complete(&mut self) {
        self.want_show = true;
    }

    pub fn is_pending(&self) -> bool {
        self.want_show
    }

    /// Render if a frame is waiting and the hardware is ready.
    /// Returns true when a render was issued.
    pub fn tick<D: StripDriver>(&mut self, sink: &mut PixelSink<D>, stats: &mut StatsTracker) -> bool {
        if !self.want_show || !sink.can_show() {
            return false;
        }
        stats.frame_rendered();
        self.want_show = false;
        sink.show();
        true
    }
}
