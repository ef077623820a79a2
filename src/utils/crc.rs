//! CRC-32/MPEG-2 as used by PSI section trailers (ISO/IEC 13818-1 Annex A).
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final xor.

const CRC32_MPEG2: u32 = 0x04C11DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// MPEG-2 CRC32 calculator.
///
/// ```
/// use tsio::utils::Crc32Mpeg2;
///
/// assert_eq!(Crc32Mpeg2::calculate(b"123456789"), 0x0376E6E7);
/// ```
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    pub fn calculate(data: &[u8]) -> u32 {
        data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
            let index = ((crc >> 24) ^ byte as u32) & 0xFF;
            (crc << 8) ^ TABLE[index as usize]
        })
    }

    /// A section followed by its own correct CRC checksums to zero.
    pub fn is_valid(section_with_crc: &[u8]) -> bool {
        section_with_crc.len() >= 4 && Self::calculate(section_with_crc) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_crc32_mpeg2() {
        assert_eq!(Crc32Mpeg2::calculate(b"123456789"), 0x0376E6E7);
        assert_eq!(Crc32Mpeg2::calculate(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn test_self_check() {
        // PAT with one program, ts id 1
        let mut pat = vec![
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xE1, 0x00,
        ];
        let crc = Crc32Mpeg2::calculate(&pat);
        pat.extend_from_slice(&crc.to_be_bytes());
        assert!(Crc32Mpeg2::is_valid(&pat));

        pat[9] ^= 0x01;
        assert!(!Crc32Mpeg2::is_valid(&pat));
    }
}
