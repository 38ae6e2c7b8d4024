use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::pixel_format::{ChannelOrder, Color};

/// Addressable strip backend
pub trait StripDriver {
    /// Drop the current pixel buffer and allocate one for `pixel_count` pixels
    fn reinitialize(&mut self, pixel_count: usize);

    fn pixel_count(&self) -> usize;

    /// Caller guarantees `index < pixel_count()`
    fn set_pixel(&mut self, index: usize, color: Color);

    /// Hardware can accept a new render
    fn can_show(&self) -> bool;

    /// Start pushing the buffer out; completes asynchronously
    fn show(&mut self);
}

/// LED chip family driven by the strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StripKind {
    #[default]
    Ws281x,
    Sk6812,
    Apa102,
    Ws2801,
}

impl StripKind {
    pub fn default_order(self) -> ChannelOrder {
        match self {
            StripKind::Ws281x => ChannelOrder::Grb,
            StripKind::Sk6812 => ChannelOrder::Grbw,
            StripKind::Apa102 => ChannelOrder::Bgr,
            StripKind::Ws2801 => ChannelOrder::Rbg,
        }
    }

    /// Data line rate in bits per second
    pub fn default_bit_rate(self) -> u32 {
        match self {
            StripKind::Ws281x | StripKind::Sk6812 => 800_000,
            StripKind::Apa102 => 10_000_000,
            StripKind::Ws2801 => 2_000_000,
        }
    }

    /// Idle time after the data before the next frame may start
    pub fn latch(self) -> Duration {
        match self {
            StripKind::Ws281x | StripKind::Sk6812 => Duration::from_micros(80),
            StripKind::Apa102 => Duration::ZERO,
            StripKind::Ws2801 => Duration::from_micros(500),
        }
    }

    /// Per-frame framing bits outside the pixel data
    fn frame_overhead_bits(self, pixel_count: usize) -> u64 {
        match self {
            // 32-bit start frame, one brightness byte per pixel, end frame of n/2 bits
            StripKind::Apa102 => 32 + 8 * pixel_count as u64 + (pixel_count as u64).div_ceil(2),
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StripKind::Ws281x => "ws281x",
            StripKind::Sk6812 => "SK6812",
            StripKind::Apa102 => "SPI APA102",
            StripKind::Ws2801 => "SPI WS2801",
        }
    }
}

/// In-memory strip that models the time the hardware spends on each render
pub struct SimulatedStrip {
    kind: StripKind,
    order: ChannelOrder,
    bit_rate: u32,
    buffer: Vec<u8>,
    shown: Vec<u8>,
    busy_until: Option<Instant>,
    frames_shown: u64,
}

impl SimulatedStrip {
    pub fn new(kind: StripKind, order: ChannelOrder, bit_rate: u32, pixel_count: usize) -> Self {
        let stride = order.stride();
        SimulatedStrip {
            kind,
            order,
            bit_rate,
            buffer: vec![0u8; pixel_count * stride],
            shown: vec![0u8; pixel_count * stride],
            busy_until: None,
            frames_shown: 0,
        }
    }

    /// Time the data line is occupied by one render
    pub fn render_time(&self) -> Duration {
        let pixels = self.pixel_count();
        let bits = (self.buffer.len() as u64) * 8 + self.kind.frame_overhead_bits(pixels);
        let micros = bits * 1_000_000 / self.bit_rate.max(1) as u64;
        Duration::from_micros(micros) + self.kind.latch()
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    /// Color last pushed out by `show()`
    #[allow(dead_code)]
    pub fn shown_pixel(&self, index: usize) -> Option<Color> {
        let stride = self.order.stride();
        self.shown
            .get(index * stride..(index + 1) * stride)
            .map(|data| self.order.unpack(data))
    }

    /// Raw bytes last pushed out, in wire order
    #[allow(dead_code)]
    pub fn shown_bytes(&self) -> &[u8] {
        &self.shown
    }
}

impl StripDriver for SimulatedStrip {
    fn reinitialize(&mut self, pixel_count: usize) {
        let len = pixel_count * self.order.stride();
        // Old buffers are released before the new ones are allocated
        self.buffer = Vec::new();
        self.shown = Vec::new();
        self.buffer = vec![0u8; len];
        self.shown = vec![0u8; len];
        self.busy_until = None;
        debug!(
            "Strip reinitialized: {} pixels, render time {:?}",
            pixel_count,
            self.render_time()
        );
    }

    fn pixel_count(&self) -> usize {
        self.buffer.len() / self.order.stride()
    }

    fn set_pixel(&mut self, index: usize, color: Color) {
        let stride = self.order.stride();
        let start = index * stride;
        self.order.pack(color, &mut self.buffer[start..start + stride]);
    }

    fn can_show(&self) -> bool {
        match self.busy_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    fn show(&mut self) {
        self.shown.copy_from_slice(&self.buffer);
        self.busy_until = Some(Instant::now() + self.render_time());
        self.frames_shown += 1;
        trace!("Render #{} started ({} bytes)", self.frames_shown, self.shown.len());
    }
}

/// Bounds-checked writer in front of the strip buffer
pub struct PixelSink<D: StripDriver> {
    driver: D,
    reallocations: u64,
    dropped_writes: u64,
}

impl<D: StripDriver> PixelSink<D> {
    pub fn new(driver: D) -> Self {
        PixelSink {
            driver,
            reallocations: 0,
            dropped_writes: 0,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.driver.pixel_count()
    }

    /// Reallocate when `pixel_count` differs from the current size.
    /// Returns true when a reallocation happened.
    pub fn resize(&mut self, pixel_count: usize) -> bool {
        if pixel_count == self.driver.pixel_count() {
            return false;
        }
        self.driver.reinitialize(pixel_count);
        self.reallocations += 1;
        true
    }

    /// Out-of-range writes are dropped
    pub fn write(&mut self, index: usize, color: Color) {
        if index < self.driver.pixel_count() {
            self.driver.set_pixel(index, color);
        } else {
            self.dropped_writes += 1;
        }
    }

    pub fn can_show(&self) -> bool {
        self.driver.pixel_count() > 0 && self.driver.can_show()
    }

    pub fn show(&mut self) {
        self.driver.show();
    }

    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
