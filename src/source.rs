use anyhow::{Context, Result};
use serialport::SerialPort;
use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Where the AWA byte stream comes from
pub trait ByteSource {
    /// Bytes that can be read right now without waiting
    fn available_count(&mut self) -> io::Result<usize>;

    /// Read at most `max` bytes into `buf`; returns the count actually read
    fn read_up_to(&mut self, buf: &mut [u8], max: usize) -> io::Result<usize>;

    /// True once no more bytes will ever arrive
    fn is_finished(&self) -> bool {
        false
    }
}

/// Open a serial port 8N1 without flow control
pub fn open_port(name: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .context(format!("Failed to open serial port {}", name))?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!("Failed to set DTR on {}: {}", name, e);
    }

    // Allow device to initialize
    thread::sleep(Duration::from_millis(100));

    Ok(port)
}

/// Live serial link
pub struct SerialSource {
    port: Box<dyn SerialPort>,
}

impl SerialSource {
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = open_port(name, baud_rate, timeout)?;
        // Stale bytes from before we opened would only cost a resync
        port.clear(serialport::ClearBuffer::Input).ok();
        Ok(SerialSource { port })
    }
}

impl ByteSource for SerialSource {
    fn available_count(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_up_to(&mut self, buf: &mut [u8], max: usize) -> io::Result<usize> {
        let max = max.min(buf.len());
        if max == 0 {
            return Ok(0);
        }
        loop {
            match self.port.read(&mut buf[..max]) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Recorded byte stream, handed out in chunks of at most `chunk_size`
pub struct ReplaySource {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl ReplaySource {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        ReplaySource {
            data,
            pos: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_file(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("Failed to read capture {}", path.display()))?;
        Ok(ReplaySource::new(data, chunk_size))
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteSource for ReplaySource {
    fn available_count(&mut self) -> io::Result<usize> {
        Ok(self.remaining().min(self.chunk_size))
    }

    fn read_up_to(&mut self, buf: &mut [u8], max: usize) -> io::Result<usize> {
        let n = max.min(buf.len()).min(self.remaining()).min(self.chunk_size);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn is_finished(&self) -> bool {
        self.pos == self.data.len()
    }
}
