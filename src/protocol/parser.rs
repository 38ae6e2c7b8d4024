use thiserror::Error;

use crate::calibration::{CalibrationModel, CalibrationParams};
use crate::pixel_format::Color;
use crate::protocol::checksum::{Fletcher, HEADER_XOR};

/// Parser position inside an AWA frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitMarkerA,
    AwaitMarkerW,
    AwaitMarkerA2,
    HeaderCountHigh,
    HeaderCountLow,
    HeaderChecksum,
    ColorRed,
    ColorGreen,
    ColorBlue,
    CalibGain,
    CalibRed,
    CalibGreen,
    CalibBlue,
    Checksum1,
    Checksum2,
}

/// Why an in-progress frame was dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("header checksum mismatch: expected {expected:#04x}, got {found:#04x}")]
    HeaderChecksum { expected: u8, found: u8 },

    #[error("fletcher1 mismatch: expected {expected:#04x}, got {found:#04x}")]
    Fletcher1 { expected: u8, found: u8 },

    #[error("fletcher2 mismatch: expected {expected:#04x}, got {found:#04x}")]
    Fletcher2 { expected: u8, found: u8 },
}

/// Output of a single `advance` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseEvent {
    /// Marker matched and the first count byte arrived
    FrameStarted,
    /// Header checksum passed; the sink must hold `pixel_count` pixels
    /// before the first `Pixel` of this frame is written
    Header { pixel_count: usize, is_version2: bool },
    Pixel { index: usize, color: Color },
    FrameComplete {
        is_version2: bool,
        pending_calibration: Option<CalibrationParams>,
    },
    /// Advisory only; the parser has already restarted marker scan
    Discarded(FrameError),
}

/// How decoded RGB triples become strip colors
pub enum ColorMode {
    Rgb,
    Rgbw(Box<CalibrationModel>),
}

/// Byte-at-a-time AWA frame decoder
pub struct FrameParser {
    state: ProtocolState,
    is_version2: bool,
    header_crc: u8,
    /// Pixel count minus one, counted down while colors arrive
    remaining: u16,
    current_led: usize,
    color: Color,
    fletcher: Fletcher,
    incoming: CalibrationParams,
    mode: ColorMode,
}

impl FrameParser {
    pub fn new(mode: ColorMode) -> Self {
        FrameParser {
            state: ProtocolState::AwaitMarkerA,
            is_version2: false,
            header_crc: 0,
            remaining: 0,
            current_led: 0,
            color: Color::BLACK,
            fletcher: Fletcher::new(),
            incoming: CalibrationParams::default(),
            mode,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// True while scanning for the next marker, i.e. between frames
    pub fn is_idle(&self) -> bool {
        self.state == ProtocolState::AwaitMarkerA
    }

    /// Current calibration, `None` for 3-channel output
    pub fn calibration(&self) -> Option<CalibrationParams> {
        match &self.mode {
            ColorMode::Rgb => None,
            ColorMode::Rgbw(model) => Some(model.params()),
        }
    }

    /// Apply calibration received in a validated v2 frame.
    /// Returns true when the tables were rebuilt.
    pub fn apply_calibration(&mut self, params: CalibrationParams) -> bool {
        match &mut self.mode {
            ColorMode::Rgb => false,
            ColorMode::Rgbw(model) => model.update(params),
        }
    }

    fn start_frame(&mut self, count_hi: u8) {
        self.current_led = 0;
        self.remaining = (count_hi as u16) << 8;
        self.header_crc = count_hi;
        self.fletcher.reset();
    }

    fn finish_color(&self) -> Color {
        match &self.mode {
            ColorMode::Rgb => self.color,
            ColorMode::Rgbw(model) => {
                let Color { r, g, b, .. } = self.color;
                let (w, r, g, b) = model.derive_white(r, g, b);
                Color::rgbw(r, g, b, w)
            }
        }
    }

    fn abort(&mut self, error: FrameError) -> Option<ParseEvent> {
        self.state = ProtocolState::AwaitMarkerA;
        Some(ParseEvent::Discarded(error))
    }

    /// Feed one byte from the link
    pub fn advance(&mut self, input: u8) -> Option<ParseEvent> {
        use ProtocolState::*;

        match self.state {
            AwaitMarkerA => {
                self.is_version2 = false;
                if input == b'A' {
                    self.state = AwaitMarkerW;
                }
                None
            }

            AwaitMarkerW => {
                if input == b'w' {
                    self.state = AwaitMarkerA2;
                    None
                } else {
                    // A broken marker may itself start the next one
                    self.state = AwaitMarkerA;
                    self.advance(input)
                }
            }

            AwaitMarkerA2 => match input {
                b'a' => {
                    self.state = HeaderCountHigh;
                    None
                }
                b'A' => {
                    self.is_version2 = true;
                    self.state = HeaderCountHigh;
                    None
                }
                _ => {
                    self.state = AwaitMarkerA;
                    self.advance(input)
                }
            },

            HeaderCountHigh => {
                self.start_frame(input);
                self.state = HeaderCountLow;
                Some(ParseEvent::FrameStarted)
            }

            HeaderCountLow => {
                self.remaining += input as u16;
                self.header_crc = self.header_crc ^ input ^ HEADER_XOR;
                self.state = HeaderChecksum;
                None
            }

            HeaderChecksum => {
                if input == self.header_crc {
                    self.state = ColorRed;
                    Some(ParseEvent::Header {
                        pixel_count: self.remaining as usize + 1,
                        is_version2: self.is_version2,
                    })
                } else {
                    let expected = self.header_crc;
                    self.abort(FrameError::HeaderChecksum { expected, found: input })
                }
            }

            ColorRed => {
                self.color.r = input;
                self.fletcher.add(input);
                self.state = ColorGreen;
                None
            }

            ColorGreen => {
                self.color.g = input;
                self.fletcher.add(input);
                self.state = ColorBlue;
                None
            }

            ColorBlue => {
                self.color.b = input;
                self.fletcher.add(input);

                let color = self.finish_color();
                let index = self.current_led;
                self.current_led += 1;

                if self.remaining > 0 {
                    self.remaining -= 1;
                    self.state = ColorRed;
                } else if self.is_version2 {
                    self.state = CalibGain;
                } else {
                    self.state = Checksum1;
                }

                Some(ParseEvent::Pixel { index, color })
            }

            CalibGain => {
                self.incoming.gain = input;
                self.fletcher.add(input);
                self.state = CalibRed;
                None
            }

            CalibRed => {
                self.incoming.red = input;
                self.fletcher.add(input);
                self.state = CalibGreen;
                None
            }

            CalibGreen => {
                self.incoming.green = input;
                self.fletcher.add(input);
                self.state = CalibBlue;
                None
            }

            CalibBlue => {
                self.incoming.blue = input;
                self.fletcher.add(input);
                self.state = Checksum1;
                None
            }

            Checksum1 => {
                let expected = self.fletcher.sum1();
                if input != expected {
                    return self.abort(FrameError::Fletcher1 { expected, found: input });
                }
                self.state = Checksum2;
                None
            }

            Checksum2 => {
                let expected = self.fletcher.sum2();
                if input != expected {
                    return self.abort(FrameError::Fletcher2 { expected, found: input });
                }
                self.state = AwaitMarkerA;
                Some(ParseEvent::FrameComplete {
                    is_version2: self.is_version2,
                    pending_calibration: self.is_version2.then_some(self.incoming),
                })
            }
        }
    }
}
