//! # Utility Functions and Types
//!
//! Bit-level field packing and the MPEG-2 CRC32 used by PSI sections.
//!
//! ```rust
//! use tsio::utils::{BitReader, BitWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = BitWriter::new();
//! writer.write_bits(3, 0b101)?;
//! writer.write_bits(13, 0x1FFF)?;
//! let bytes = writer.into_bytes();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bits(3)?, 0b101);
//! assert_eq!(reader.read_bits(13)?, 0x1FFF);
//! # Ok(())
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

pub use bits::{BitReader, BitWriter};
pub use crc::Crc32Mpeg2;
