use super::types::PCR_HZ;
use crate::error::{Result, TsError};
use bytes::{BufMut, BytesMut};
use std::time::{Duration, Instant};

pub const PCR_SIZE: usize = 6;
pub const PCR_BASE_MAX: u64 = (1 << 33) - 1;
pub const PCR_EXTENSION_MAX: u16 = (1 << 9) - 1;

/// Program Clock Reference: 33-bit base at 90 kHz plus 9-bit extension at 27 MHz.
///
/// Wire layout is 48 bits, `base(33) | reserved(6) | extension(9)`. The
/// reserved bits are written as zero and ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Pcr {
    pub base: u64,
    pub extension: u16,
}

impl Pcr {
    pub fn new(base: u64, extension: u16) -> Result<Self> {
        let pcr = Self { base, extension };
        pcr.validate()?;
        Ok(pcr)
    }

    fn validate(&self) -> Result<()> {
        if self.base > PCR_BASE_MAX {
            return Err(TsError::FieldRange(format!(
                "pcr base {:#x} exceeds 33 bits",
                self.base
            )));
        }
        if self.extension > PCR_EXTENSION_MAX {
            return Err(TsError::FieldRange(format!(
                "pcr extension {:#x} exceeds 9 bits",
                self.extension
            )));
        }
        Ok(())
    }

    /// Decodes the first six bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PCR_SIZE {
            return Err(TsError::ProtocolViolation(format!(
                "pcr needs {} bytes, got {}",
                PCR_SIZE,
                data.len()
            )));
        }
        let value = data[..PCR_SIZE]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        Ok(Self {
            base: value >> 15,
            extension: (value & 0x1FF) as u16,
        })
    }

    pub fn encode(&self) -> Result<[u8; PCR_SIZE]> {
        self.validate()?;
        let value = (self.base << 15) | self.extension as u64;
        let mut out = [0u8; PCR_SIZE];
        out.copy_from_slice(&value.to_be_bytes()[2..]);
        Ok(out)
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&self.encode()?);
        Ok(())
    }

    /// Full clock value in 27 MHz ticks.
    pub fn as_27mhz(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    /// Builds a PCR from 27 MHz ticks; the base wraps at 33 bits.
    pub fn from_27mhz(ticks: u64) -> Self {
        Self {
            base: (ticks / 300) & PCR_BASE_MAX,
            extension: (ticks % 300) as u16,
        }
    }

    pub fn from_duration(time: Duration) -> Self {
        let ticks = time.as_nanos() * PCR_HZ as u128 / 1_000_000_000;
        Self::from_27mhz(ticks as u64)
    }

    pub fn to_duration(&self) -> Duration {
        let nanos = self.as_27mhz() as u128 * 1_000_000_000 / PCR_HZ as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// Produces PCR values from wall-clock time elapsed since construction.
#[derive(Debug, Clone)]
pub struct PcrSource {
    start: Instant,
}

impl Default for PcrSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PcrSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Samples the clock. Values never decrease until the 33-bit base wraps
    /// (roughly 26.5 hours).
    pub fn now(&self) -> Pcr {
        Self::at(self.start.elapsed())
    }

    fn at(elapsed: Duration) -> Pcr {
        let micros = elapsed.as_micros() as u64;
        // 27 ticks per microsecond
        Pcr::from_27mhz(micros.wrapping_mul(27))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_encode_known_values() {
        let pcr = Pcr::new(PCR_BASE_MAX, 0x1FF).unwrap();
        assert_eq!(pcr.encode().unwrap(), [0xFF, 0xFF, 0xFF, 0xFF, 0x81, 0xFF]);

        let pcr = Pcr::new(0x1F3B795D1, 0x15B).unwrap();
        assert_eq!(pcr.encode().unwrap(), [0xF9, 0xDB, 0xCA, 0xE8, 0x81, 0x5B]);

        let pcr = Pcr::new(0, 0).unwrap();
        assert_eq!(pcr.encode().unwrap(), [0; 6]);
    }

    #[test]
    fn test_decode_known_values() {
        let pcr = Pcr::decode(&[0xF9, 0xDB, 0xCA, 0xE8, 0x81, 0x5B]).unwrap();
        assert_eq!(pcr, Pcr { base: 0x1F3B795D1, extension: 0x15B });

        // reserved bits set by other muxers are ignored
        let pcr = Pcr::decode(&[0x00, 0x00, 0x00, 0x00, 0x7E, 0x05]).unwrap();
        assert_eq!(pcr, Pcr { base: 0, extension: 5 });

        assert!(Pcr::decode(&[0; 5]).is_err());
    }

    #[test]
    fn test_out_of_range() {
        assert!(Pcr::new(PCR_BASE_MAX + 1, 0).is_err());
        assert!(Pcr::new(0, 0x200).is_err());
        let pcr = Pcr { base: 0, extension: 0x200 };
        assert!(pcr.encode().is_err());
    }

    #[quickcheck]
    fn prop_round_trip(base: u64, extension: u16) -> bool {
        let pcr = Pcr {
            base: base & PCR_BASE_MAX,
            extension: extension & PCR_EXTENSION_MAX,
        };
        Pcr::decode(&pcr.encode().unwrap()).unwrap() == pcr
    }

    #[test]
    fn test_duration_conversion() {
        let pcr = Pcr::from_duration(Duration::from_secs(1));
        assert_eq!(pcr, Pcr { base: 90_000, extension: 0 });
        assert_eq!(pcr.to_duration(), Duration::from_secs(1));

        let pcr = Pcr::from_duration(Duration::from_micros(1));
        assert_eq!(pcr.as_27mhz(), 27);
        assert_eq!(pcr.to_duration(), Duration::from_micros(1));
    }

    #[test]
    fn test_source_scaling() {
        assert_eq!(PcrSource::at(Duration::ZERO), Pcr::default());
        assert_eq!(
            PcrSource::at(Duration::from_millis(10)),
            Pcr { base: 900, extension: 0 }
        );
        assert_eq!(
            PcrSource::at(Duration::from_micros(15)),
            Pcr { base: 1, extension: 105 }
        );
    }

    #[test]
    fn test_source_monotonic() {
        let source = PcrSource::new();
        let first = source.now();
        std::thread::sleep(Duration::from_millis(2));
        let second = source.now();
        assert!(second.as_27mhz() > first.as_27mhz());
    }
}
