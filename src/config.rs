use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::calibration::WhiteTone;
use crate::pixel_format::{ChannelLayout, ChannelOrder};
use crate::protocol::awa::MAX_PIXELS;
use crate::stats::{DEFAULT_REPORT_MS, DEFAULT_WINDOW_MS};
use crate::strip::StripKind;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub strip: StripConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device, required by `listen` unless given on the command line
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Upper bound on a single blocking read
    pub timeout_ms: u64,
    /// Bytes pulled from the source per loop iteration at most
    pub read_buffer_size: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: None,
            baud_rate: 2_000_000,
            timeout_ms: 50,
            read_buffer_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StripConfig {
    pub kind: StripKind,
    /// Wire channel order; defaults to the usual order of `kind`
    pub channel_order: Option<ChannelOrder>,
    /// Startup calibration for RGBW strips
    pub white_tone: WhiteTone,
    /// Pixels allocated before the first header arrives
    pub initial_led_count: usize,
    /// Data line rate; defaults to the usual rate of `kind`
    pub bit_rate: Option<u32>,
}

impl StripConfig {
    pub fn channel_order(&self) -> ChannelOrder {
        self.channel_order.unwrap_or_else(|| self.kind.default_order())
    }

    pub fn layout(&self) -> ChannelLayout {
        self.channel_order().layout()
    }

    pub fn bit_rate(&self) -> u32 {
        self.bit_rate.unwrap_or_else(|| self.kind.default_bit_rate())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    pub window_ms: u64,
    pub report_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            window_ms: DEFAULT_WINDOW_MS,
            report_ms: DEFAULT_REPORT_MS,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("serial.{0} must be greater than zero")]
    Zero(&'static str),

    #[error("strip.bit_rate must be greater than zero")]
    ZeroBitRate,

    #[error("strip.initial_led_count {count} exceeds the protocol limit of {max}")]
    TooManyLeds { count: usize, max: usize },

    #[error("channel order {order:?} does not match {kind:?} strips")]
    OrderMismatch { kind: StripKind, order: ChannelOrder },

    #[error("stats.window_ms ({window_ms}) must be shorter than stats.report_ms ({report_ms})")]
    StatsIntervals { window_ms: u64, report_ms: u64 },
}

impl Config {
    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Zero("baud_rate"));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Zero("timeout_ms"));
        }
        if self.serial.read_buffer_size == 0 {
            return Err(ConfigError::Zero("read_buffer_size"));
        }
        if self.strip.bit_rate == Some(0) {
            return Err(ConfigError::ZeroBitRate);
        }
        if self.strip.initial_led_count > MAX_PIXELS {
            return Err(ConfigError::TooManyLeds {
                count: self.strip.initial_led_count,
                max: MAX_PIXELS,
            });
        }

        let kind = self.strip.kind;
        let order = self.strip.channel_order();
        if order.layout() != kind.default_order().layout() {
            return Err(ConfigError::OrderMismatch { kind, order });
        }

        if self.stats.window_ms >= self.stats.report_ms {
            return Err(ConfigError::StatsIntervals {
                window_ms: self.stats.window_ms,
                report_ms: self.stats.report_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.serial.baud_rate, 2_000_000);
        assert_eq!(config.serial.timeout_ms, 50);
        assert_eq!(config.serial.read_buffer_size, 4096);
        assert_eq!(config.strip.kind, StripKind::Ws281x);
        assert_eq!(config.strip.channel_order(), ChannelOrder::Grb);
        assert_eq!(config.strip.bit_rate(), 800_000);
        assert_eq!(config.stats.window_ms, 1000);
        assert_eq!(config.stats.report_ms, 5000);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "serial": { "port": "/dev/ttyUSB0", "baud_rate": 921600, "timeout_ms": 20 },
            "strip": { "kind": "sk6812", "white_tone": "cold", "initial_led_count": 120 },
            "stats": { "window_ms": 500, "report_ms": 3000 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.strip.white_tone, WhiteTone::Cold);
        assert_eq!(config.strip.layout(), ChannelLayout::Rgbw);
        assert_eq!(config.strip.initial_led_count, 120);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_order_must_match_kind() {
        let json = r#"{ "strip": { "kind": "ws281x", "channel_order": "GRBW" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::OrderMismatch { kind: StripKind::Ws281x, order: ChannelOrder::Grbw })
        );

        let json = r#"{ "strip": { "kind": "apa102", "channel_order": "RGB" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = Config::default();
        config.serial.read_buffer_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("read_buffer_size")));

        let mut config = Config::default();
        config.strip.bit_rate = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBitRate));
    }

    #[test]
    fn test_rejects_oversized_strip() {
        let mut config = Config::default();
        config.strip.initial_led_count = MAX_PIXELS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::TooManyLeds { .. })));
    }

    #[test]
    fn test_rejects_inverted_stats_intervals() {
        let mut config = Config::default();
        config.stats.window_ms = 6000;
        assert!(matches!(config.validate(), Err(ConfigError::StatsIntervals { .. })));
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let json = r#"{ "strip": { "kind": "neon" } }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
