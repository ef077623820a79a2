//! PSI section envelope shared by every table, and the table-id registry.
//!
//! ```text
//! table_id(8) syntax_indicator(1) private(1) reserved(2) section_length(12)
//! [table_id_extension(16) reserved(2) version(5) current_next(1)
//!  section_number(8) last_section_number(8)]
//! data ...
//! [CRC_32(32)]
//! ```
//!
//! The bracketed parts are present only when the syntax indicator is set.
//! Pointer fields and TS packet framing are handled by the callers.

use super::pat::Pat;
use super::pmt::Pmt;
use super::sdt::Sdt;
use super::types::*;
use crate::config::CrcMode;
use crate::error::{Result, TsError};
use crate::utils::{BitReader, BitWriter, Crc32Mpeg2};
use bytes::{Bytes, BytesMut};

pub const SECTION_HEADER_SIZE: usize = 3;
pub const SECTION_SYNTAX_SIZE: usize = 5;
pub const CRC_SIZE: usize = 4;
pub const PLACEHOLDER_CRC: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSyntax {
    pub table_id_extension: u16,
    /// 5-bit version number.
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl Default for SectionSyntax {
    fn default() -> Self {
        Self {
            table_id_extension: 0,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
        }
    }
}

impl SectionSyntax {
    pub fn new(table_id_extension: u16) -> Self {
        Self {
            table_id_extension,
            ..Default::default()
        }
    }
}

/// A section split into its envelope fields, borrowing the table data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionParts<'a> {
    pub table_id: u8,
    pub private: bool,
    pub syntax: Option<SectionSyntax>,
    pub data: &'a [u8],
    pub crc: Option<u32>,
    /// Bytes the whole section occupies, from table id through CRC.
    pub section_size: usize,
}

impl SectionParts<'_> {
    pub(crate) fn expect_table(&self, table_id: u8, name: &str) -> Result<SectionSyntax> {
        if self.table_id != table_id {
            return Err(TsError::ProtocolViolation(format!(
                "expected {} table id {:#04x}, found {:#04x}",
                name, table_id, self.table_id
            )));
        }
        self.syntax.ok_or_else(|| {
            TsError::ProtocolViolation(format!("{} section without section syntax", name))
        })
    }
}

/// Splits a section into header, optional syntax block, data and CRC.
pub fn common_unmarshal(data: &[u8]) -> Result<SectionParts<'_>> {
    let mut r = BitReader::new(data);
    let table_id = r.read_u8()?;
    let syntax_indicator = r.read_bit()?;
    let private = r.read_bit()?;
    r.skip_bits(2)?;
    let section_length = r.read_bits(12)? as usize;
    if section_length > MAX_SECTION_LENGTH {
        return Err(TsError::ProtocolViolation(format!(
            "section length {} exceeds {}",
            section_length, MAX_SECTION_LENGTH
        )));
    }
    let body = r.read_bytes(section_length)?;

    if !syntax_indicator {
        return Ok(SectionParts {
            table_id,
            private,
            syntax: None,
            data: body,
            crc: None,
            section_size: SECTION_HEADER_SIZE + section_length,
        });
    }

    if body.len() < SECTION_SYNTAX_SIZE + CRC_SIZE {
        return Err(TsError::ProtocolViolation(format!(
            "section length {} too short for syntax block and CRC",
            section_length
        )));
    }
    let mut r = BitReader::new(body);
    let table_id_extension = r.read_u16()?;
    r.skip_bits(2)?;
    let syntax = SectionSyntax {
        table_id_extension,
        version: r.read_bits(5)? as u8,
        current_next: r.read_bit()?,
        section_number: r.read_u8()?,
        last_section_number: r.read_u8()?,
    };
    let crc_at = body.len() - CRC_SIZE;
    let crc = u32::from_be_bytes([
        body[crc_at],
        body[crc_at + 1],
        body[crc_at + 2],
        body[crc_at + 3],
    ]);

    Ok(SectionParts {
        table_id,
        private,
        syntax: Some(syntax),
        data: &body[SECTION_SYNTAX_SIZE..crc_at],
        crc: Some(crc),
        section_size: SECTION_HEADER_SIZE + section_length,
    })
}

/// Builds a complete section around `data`. Sections with a syntax block end
/// with a CRC chosen by `crc_mode`.
pub fn common_marshal(
    table_id: u8,
    private: bool,
    syntax: Option<&SectionSyntax>,
    data: &[u8],
    crc_mode: CrcMode,
) -> Result<Bytes> {
    let crc = match crc_mode {
        CrcMode::Computed => None,
        CrcMode::Placeholder => Some(PLACEHOLDER_CRC),
    };
    marshal_with_crc(table_id, private, syntax, data, crc)
}

/// Like [`common_marshal`], writing `crc` verbatim when given and computing
/// it otherwise.
pub(crate) fn marshal_with_crc(
    table_id: u8,
    private: bool,
    syntax: Option<&SectionSyntax>,
    data: &[u8],
    crc: Option<u32>,
) -> Result<Bytes> {
    let section_length = data.len() + syntax.map_or(0, |_| SECTION_SYNTAX_SIZE + CRC_SIZE);
    if section_length > MAX_SECTION_LENGTH {
        return Err(TsError::FieldRange(format!(
            "section length {} exceeds {}",
            section_length, MAX_SECTION_LENGTH
        )));
    }

    let mut w = BitWriter::new();
    w.write_bits(8, table_id as u32)?;
    w.write_bit(syntax.is_some());
    w.write_bit(private);
    w.write_bits(2, 0b11)?;
    w.write_bits(12, section_length as u32)?;
    if let Some(syntax) = syntax {
        w.write_bits(16, syntax.table_id_extension as u32)?;
        w.write_bits(2, 0b11)?;
        w.write_bits(5, syntax.version as u32)?;
        w.write_bit(syntax.current_next);
        w.write_bits(8, syntax.section_number as u32)?;
        w.write_bits(8, syntax.last_section_number as u32)?;
    }
    w.write_bytes(data)?;

    let mut section = BytesMut::from(&w.into_bytes()[..]);
    if syntax.is_some() {
        let crc = crc.unwrap_or_else(|| Crc32Mpeg2::calculate(&section));
        section.extend_from_slice(&crc.to_be_bytes());
    }
    Ok(section.freeze())
}

/// Skips the pointer field at the start of a payload that begins a section.
pub fn skip_pointer_field(payload: &[u8]) -> Result<&[u8]> {
    let pointer = *payload
        .first()
        .ok_or_else(|| TsError::ProtocolViolation("missing pointer field".into()))?
        as usize;
    payload.get(1 + pointer..).ok_or_else(|| {
        TsError::ProtocolViolation(format!("pointer field {} overruns payload", pointer))
    })
}

/// A section whose table id has no registered decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub table_id: u8,
    pub private: bool,
    pub syntax: Option<SectionSyntax>,
    pub data: Bytes,
    pub crc: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Table {
    Pat(Pat),
    Pmt(Pmt),
    Sdt(Sdt),
    Raw(RawTable),
}

pub type TableDecoder = fn(&SectionParts<'_>) -> Result<Table>;

/// Registry lookup: the decoder for `table_id`, if the id is known.
pub fn decoder_for(table_id: u8) -> Option<TableDecoder> {
    match table_id {
        TABLE_ID_PAT => Some(decode_pat),
        TABLE_ID_PMT => Some(decode_pmt),
        TABLE_ID_SDT => Some(decode_sdt),
        _ => None,
    }
}

fn decode_pat(parts: &SectionParts<'_>) -> Result<Table> {
    Pat::from_section(parts).map(Table::Pat)
}

fn decode_pmt(parts: &SectionParts<'_>) -> Result<Table> {
    Pmt::from_section(parts).map(Table::Pmt)
}

fn decode_sdt(parts: &SectionParts<'_>) -> Result<Table> {
    Sdt::from_section(parts).map(Table::Sdt)
}

impl Table {
    pub fn table_id(&self) -> u8 {
        match self {
            Table::Pat(_) => TABLE_ID_PAT,
            Table::Pmt(_) => TABLE_ID_PMT,
            Table::Sdt(_) => TABLE_ID_SDT,
            Table::Raw(raw) => raw.table_id,
        }
    }

    /// Decodes the section at the start of `data`, returning the table and
    /// the number of bytes it occupied.
    pub fn unmarshal(data: &[u8]) -> Result<(Self, usize)> {
        let parts = common_unmarshal(data)?;
        let table = match decoder_for(parts.table_id) {
            Some(decode) => decode(&parts)?,
            None => Table::Raw(RawTable {
                table_id: parts.table_id,
                private: parts.private,
                syntax: parts.syntax,
                data: Bytes::copy_from_slice(parts.data),
                crc: parts.crc,
            }),
        };
        Ok((table, parts.section_size))
    }

    /// Encodes the table as one section. Raw tables keep the CRC they were
    /// decoded with.
    pub fn marshal(&self, crc_mode: CrcMode) -> Result<Bytes> {
        match self {
            Table::Pat(pat) => pat.marshal(crc_mode),
            Table::Pmt(pmt) => pmt.marshal(crc_mode),
            Table::Sdt(sdt) => sdt.marshal(crc_mode),
            Table::Raw(raw) => marshal_with_crc(
                raw.table_id,
                raw.private,
                raw.syntax.as_ref(),
                &raw.data,
                raw.crc,
            ),
        }
    }
}
