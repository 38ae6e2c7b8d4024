use serde::{Deserialize, Serialize};
use std::fmt;

/// Calibration values carried in the trailer of a v2 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationParams {
    pub gain: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl CalibrationParams {
    pub fn new(gain: u8, red: u8, green: u8, blue: u8) -> Self {
        CalibrationParams { gain, red, green, blue }
    }
}

impl fmt::Display for CalibrationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gain: {}/255, red: {}, green: {}, blue: {}",
            self.gain, self.red, self.green, self.blue
        )
    }
}

/// White LED tint of the strip, selects the startup calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteTone {
    #[default]
    Neutral,
    Cold,
}

impl WhiteTone {
    pub fn default_params(self) -> CalibrationParams {
        match self {
            WhiteTone::Neutral => CalibrationParams::new(0xFF, 0xB0, 0xB0, 0x70),
            WhiteTone::Cold => CalibrationParams::new(0xFF, 0xA0, 0xA0, 0xA0),
        }
    }
}

/// RGB to RGBW conversion with per-channel correction tables
pub struct CalibrationModel {
    params: CalibrationParams,
    white: [u8; 256],
    red: [u8; 256],
    green: [u8; 256],
    blue: [u8; 256],
}

/// `round(scale * i / 255)`, clamped to a byte
fn scale_table(scale: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let scaled = (scale as u32 * i as u32 + 127) / 255;
        *entry = scaled.min(0xFF) as u8;
    }
    table
}

impl CalibrationModel {
    pub fn new(params: CalibrationParams) -> Self {
        let mut model = CalibrationModel {
            params,
            white: [0; 256],
            red: [0; 256],
            green: [0; 256],
            blue: [0; 256],
        };
        model.prepare();
        model
    }

    pub fn params(&self) -> CalibrationParams {
        self.params
    }

    /// Recompute all four tables from the current parameters
    fn prepare(&mut self) {
        self.white = scale_table(self.params.gain);
        self.red = scale_table(self.params.red);
        self.green = scale_table(self.params.green);
        self.blue = scale_table(self.params.blue);
    }

    /// Replace the parameters. Tables are rebuilt only when something changed.
    pub fn update(&mut self, params: CalibrationParams) -> bool {
        if params == self.params {
            return false;
        }
        self.params = params;
        self.prepare();
        true
    }

    /// Split the shared white part out of an RGB triple
    pub fn derive_white(&self, r: u8, g: u8, b: u8) -> (u8, u8, u8, u8) {
        let pre_white = self.red[r as usize]
            .min(self.green[g as usize])
            .min(self.blue[b as usize]);

        // table[x] <= x and pre_white <= table[channel] <= channel, so no underflow
        let r = r - self.red[pre_white as usize];
        let g = g - self.green[pre_white as usize];
        let b = b - self.blue[pre_white as usize];

        (self.white[pre_white as usize], r, g, b)
    }
}
