use crate::error::{Result, TsError};

/// A bit-level reader for parsing big-endian bit-packed headers.
///
/// Example:
/// ```
/// use tsio::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);    // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    ///
    /// Returns error if end of data is reached.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(TsError::ProtocolViolation("unexpected end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits and returns them as a number.
    ///
    /// Returns error if n > 32 or end of data is reached.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(TsError::FieldRange(format!("cannot read {} bits at once", n)));
        }
        if (n as usize) > self.available_bits() {
            return Err(TsError::ProtocolViolation("unexpected end of data".into()));
        }

        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if (n as usize) > self.available_bits() {
            return Err(TsError::ProtocolViolation("unexpected end of data".into()));
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// Takes `len` whole bytes. The reader must be byte aligned.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bit_offset != 0 {
            return Err(TsError::ProtocolViolation("byte read on unaligned reader".into()));
        }
        if self.byte_offset + len > self.data.len() {
            return Err(TsError::ProtocolViolation(format!(
                "need {} bytes, {} left",
                len,
                self.data.len() - self.byte_offset
            )));
        }
        let bytes = &self.data[self.byte_offset..self.byte_offset + len];
        self.byte_offset += len;
        Ok(bytes)
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }

    /// Bytes consumed so far, counting a partially read byte as consumed.
    pub fn position(&self) -> usize {
        self.byte_offset + (self.bit_offset != 0) as usize
    }
}

/// The writing counterpart of [`BitReader`]: packs fields MSB first.
#[derive(Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_offset: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_offset == 0 {
            self.data.push(0);
        }
        if bit {
            if let Some(last) = self.data.last_mut() {
                *last |= 1 << (7 - self.bit_offset);
            }
        }
        self.bit_offset = (self.bit_offset + 1) % 8;
    }

    /// Writes the low `n` bits of `value`. Fails if `value` does not fit.
    pub fn write_bits(&mut self, n: u32, value: u32) -> Result<()> {
        if n > 32 || (n < 32 && value >> n != 0) {
            return Err(TsError::FieldRange(format!(
                "value {:#x} does not fit in {} bits",
                value, n
            )));
        }
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Appends whole bytes. The writer must be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.bit_offset != 0 {
            return Err(TsError::ProtocolViolation("byte write on unaligned writer".into()));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        // Simple pattern within a byte
        let data = [0b10110011];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10011);

        // Cross-byte boundary
        let data = [0b10110011, 0b01011010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 0b10011010);

        // Reading zero bits
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(0).unwrap(), 0);

        // Too many bits
        let mut reader = BitReader::new(&data);
        assert!(reader.read_bits(33).is_err());

        // Cross multiple byte boundaries
        let data = [0b10110011, 0b11001100, 0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(20).unwrap(), 0b10110011110011001010);
    }

    #[test]
    fn test_read_past_end() {
        let data = [0xAB];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_bits(9).is_err());
        // a failed read consumes nothing
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert!(reader.read_bit().is_err());
    }

    #[test]
    fn test_skip_and_bytes() {
        let data = [0xF0, 0x01, 0x02, 0x03];
        let mut reader = BitReader::new(&data);
        reader.skip_bits(4).unwrap();
        assert!(reader.read_bytes(1).is_err());
        reader.skip_bits(4).unwrap();
        assert_eq!(reader.read_bytes(2).unwrap(), &[0x01, 0x02]);
        assert_eq!(reader.position(), 3);
        assert!(reader.read_bytes(2).is_err());
    }

    #[test]
    fn test_write_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(1, 1).unwrap();
        writer.write_bits(3, 0b011).unwrap();
        writer.write_bits(12, 0xABC).unwrap();
        assert_eq!(writer.into_bytes(), vec![0b1011_1010, 0xBC]);

        let mut writer = BitWriter::new();
        assert!(writer.write_bits(4, 0x10).is_err());
        writer.write_bit(true);
        assert!(writer.write_bytes(&[1]).is_err());
    }

    #[quickcheck]
    fn prop_write_then_read(fields: Vec<(u8, u32)>) -> bool {
        let fields: Vec<(u32, u32)> = fields
            .into_iter()
            .map(|(width, value)| {
                let width = (width % 32) as u32 + 1;
                let value = if width == 32 { value } else { value & ((1 << width) - 1) };
                (width, value)
            })
            .collect();

        let mut writer = BitWriter::new();
        for &(width, value) in &fields {
            writer.write_bits(width, value).unwrap();
        }
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        fields
            .iter()
            .all(|&(width, value)| reader.read_bits(width).unwrap() == value)
    }
}
