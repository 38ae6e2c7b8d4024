use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod calibration;
mod config;
mod generator;
mod pixel_format;
mod protocol;
mod receiver;
mod render;
mod source;
mod stats;
mod strip;

use calibration::CalibrationParams;
use config::Config;
use generator::PatternOptions;
use pixel_format::ChannelLayout;
use receiver::Receiver;
use source::{ReplaySource, SerialSource};
use strip::SimulatedStrip;

#[derive(Parser)]
#[command(name = "awa_receiver")]
#[command(about = "AWA serial LED receiver\n\nDecodes the AWA (HyperSerial) byte stream and drives an LED strip.", long_about = None)]
struct Cli {
    /// Enable debug output (resizes, dropped frames)
    #[arg(long, global = true)]
    debug: bool,

    /// Enable detailed debug (hex dumps of every read)
    #[arg(long, global = true)]
    ddebug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive frames from a serial port
    Listen {
        /// Path to configuration file (JSON)
        config: PathBuf,

        /// Serial port, overrides serial.port
        #[arg(long)]
        port: Option<String>,

        /// Baud rate, overrides serial.baud_rate
        #[arg(long)]
        baud: Option<u32>,
    },

    /// Feed a recorded byte stream through the receiver
    Replay {
        /// Capture file with raw serial bytes
        capture: PathBuf,

        /// Path to configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bytes handed to the receiver per read
        #[arg(long, default_value_t = 512)]
        chunk: usize,
    },

    /// Write a capture of test-pattern frames
    Generate {
        /// Output file
        output: PathBuf,

        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// Stream test-pattern frames to a serial port
    Send {
        /// Serial port
        port: String,

        #[arg(long, default_value_t = 2_000_000)]
        baud: u32,

        /// Frames per second
        #[arg(long, default_value_t = 60)]
        fps: u32,

        #[command(flatten)]
        pattern: PatternArgs,
    },
}

#[derive(clap::Args)]
struct PatternArgs {
    /// Number of LEDs per frame
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=65536))]
    leds: u32,

    /// Number of frames (0 = until Ctrl-C, send only)
    #[arg(long, default_value_t = 60)]
    frames: usize,

    /// Send protocol v2 frames with calibration "gain,red,green,blue"
    #[arg(long, value_parser = parse_calibration)]
    v2: Option<CalibrationParams>,

    /// Corrupt every n-th frame
    #[arg(long)]
    corrupt_every: Option<usize>,

    /// Insert line noise before every frame
    #[arg(long)]
    garbage: bool,
}

impl PatternArgs {
    fn options(&self) -> PatternOptions {
        PatternOptions {
            leds: self.leds as usize,
            frames: self.frames,
            calibration: self.v2,
            corrupt_every: self.corrupt_every,
            garbage: self.garbage,
        }
    }
}

fn parse_calibration(s: &str) -> Result<CalibrationParams, String> {
    let values: Vec<u8> = s
        .split(',')
        .map(|v| v.trim().parse::<u8>().map_err(|e| format!("{}: {}", v, e)))
        .collect::<Result<_, _>>()?;
    match values[..] {
        [gain, red, green, blue] => Ok(CalibrationParams::new(gain, red, green, blue)),
        _ => Err(format!("expected 4 values, got {}", values.len())),
    }
}

fn init_logging(debug: bool, ddebug: bool) -> Result<()> {
    let level = if ddebug {
        Level::TRACE
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn simulated_strip(config: &Config) -> SimulatedStrip {
    SimulatedStrip::new(
        config.strip.kind,
        config.strip.channel_order(),
        config.strip.bit_rate(),
        config.strip.initial_led_count,
    )
}

fn banner(config: &Config) {
    info!("Welcome! Awa driver, receiver v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Strip: {} {:?} @ {} bit/s (simulated)",
        config.strip.kind.name(),
        config.strip.channel_order(),
        config.strip.bit_rate()
    );
    if config.strip.layout() == ChannelLayout::Rgbw {
        let params = config.strip.white_tone.default_params();
        info!("RGBW ({:?} white) => {}", config.strip.white_tone, params);
    }
}

/// Stop flag wired to Ctrl-C
fn install_ctrlc(running: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        info!("Shutting down...");
        running.store(false, Ordering::Relaxed);
    });

    if let Err(e) = result {
        warn!("Could not set Ctrl-C handler: {}", e);
    }
}

fn listen(config_path: PathBuf, port: Option<String>, baud: Option<u32>) -> Result<()> {
    let mut config = Config::load(&config_path)?;
    if let Some(port) = port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = baud;
    }
    config.validate()?;

    let port = config
        .serial
        .port
        .clone()
        .context("No serial port given (serial.port or --port)")?;

    banner(&config);
    let source = SerialSource::open(
        &port,
        config.serial.baud_rate,
        Duration::from_millis(config.serial.timeout_ms),
    )?;
    info!("✓ Listening on {} @ {} baud (Ctrl-C to stop)", port, config.serial.baud_rate);

    let mut receiver = Receiver::from_config(source, simulated_strip(&config), &config);
    install_ctrlc(receiver.get_running_flag());

    receiver.run()?;
    receiver.shutdown();
    Ok(())
}

fn replay(capture: PathBuf, config_path: Option<PathBuf>, chunk: usize) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    banner(&config);
    let source = ReplaySource::from_file(&capture, chunk)?;
    info!("Replaying {} bytes from {}", source.total_bytes(), capture.display());

    let mut receiver = Receiver::from_config(source, simulated_strip(&config), &config);
    install_ctrlc(receiver.get_running_flag());
    receiver.run()?;

    let sink = receiver.sink();
    info!(
        "Replay done: {} frames started, {} completed, {} rendered, {} resizes, {} dropped writes",
        receiver.frames_started(),
        receiver.frames_completed(),
        sink.driver().frames_shown(),
        sink.reallocations(),
        sink.dropped_writes()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ddebug implies debug
    init_logging(cli.debug || cli.ddebug, cli.ddebug)?;

    match cli.command {
        Command::Listen { config, port, baud } => listen(config, port, baud),
        Command::Replay { capture, config, chunk } => replay(capture, config, chunk),
        Command::Generate { output, pattern } => {
            let opts = pattern.options();
            let stream = generator::build_capture(&opts);
            fs::write(&output, &stream)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("✓ Wrote {} frames ({} bytes) to {}", opts.frames, stream.len(), output.display());
            Ok(())
        }
        Command::Send { port, baud, fps, pattern } => {
            let running = Arc::new(AtomicBool::new(true));
            install_ctrlc(Arc::clone(&running));
            let sent = generator::send_frames(&port, baud, &pattern.options(), fps, &running)?;
            info!("✓ Sent {} frames", sent);
            Ok(())
        }
    }
}
