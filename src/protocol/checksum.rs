/// Incremental 16-bit checksum matching the acquisition firmware.
///
/// Byte-wise rotate/xor recurrence with a zero initial state. It shares the
/// 0x1021 polynomial with CRC-16/CCITT but a table-driven CRC-16 does not
/// produce the same values; frames must be checked with this engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumEngine {
    value: u16,
}

impl ChecksumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn write_byte(&mut self, byte: u8) {
        let mut crc = self.value.rotate_right(8);
        crc ^= byte as u16;
        crc ^= (crc & 0x00ff) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0x00ff) << 5;
        self.value = crc;
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    /// Checksum of `bytes` from a zero state.
    pub fn checksum(bytes: &[u8]) -> u16 {
        let mut engine = Self::new();
        engine.write(bytes);
        engine.value()
    }
}
