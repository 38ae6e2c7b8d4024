/// XOR constant mixed into the header checksum
pub const HEADER_XOR: u8 = 0x55;

/// Header checksum over the two pixel count bytes
pub fn header_checksum(count_hi: u8, count_lo: u8) -> u8 {
    count_hi ^ count_lo ^ HEADER_XOR
}

/// Two-accumulator Fletcher checksum, both sums held modulo 255
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fletcher {
    sum1: u16,
    sum2: u16,
}

impl Fletcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.sum1 = 0;
        self.sum2 = 0;
    }

    #[inline]
    pub fn add(&mut self, byte: u8) {
        self.sum1 = (self.sum1 + byte as u16) % 255;
        self.sum2 = (self.sum2 + self.sum1) % 255;
    }

    pub fn sum1(&self) -> u8 {
        self.sum1 as u8
    }

    pub fn sum2(&self) -> u8 {
        self.sum2 as u8
    }

    /// Checksum of a complete payload slice
    pub fn over(payload: &[u8]) -> Self {
        let mut fletcher = Self::new();
        for &byte in payload {
            fletcher.add(byte);
        }
        fletcher
    }
}
