use super::section::{common_marshal, common_unmarshal, SectionParts, SectionSyntax};
use super::types::*;
use crate::config::CrcMode;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PATEntry {
    /// Program 0 points at the network PID instead of a PMT.
    pub program_number: u16,
    pub pid: u16,
}

/// Program Association Table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pat {
    /// `table_id_extension` holds the transport_stream_id.
    pub syntax: SectionSyntax,
    pub entries: Vec<PATEntry>,
    /// CRC read from the wire; recomputed on marshal.
    pub crc: u32,
}

impl Pat {
    pub fn new(transport_stream_id: u16) -> Self {
        Self {
            syntax: SectionSyntax::new(transport_stream_id),
            ..Default::default()
        }
    }

    pub fn with_program(mut self, program_number: u16, pmt_pid: u16) -> Self {
        self.entries.push(PATEntry {
            program_number,
            pid: pmt_pid,
        });
        self
    }

    pub fn transport_stream_id(&self) -> u16 {
        self.syntax.table_id_extension
    }

    /// Program number to PMT PID, skipping the network PID entry.
    pub fn programs(&self) -> BTreeMap<u16, u16> {
        self.entries
            .iter()
            .filter(|e| e.program_number != 0)
            .map(|e| (e.program_number, e.pid))
            .collect()
    }

    pub fn network_pid(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.program_number == 0)
            .map(|e| e.pid)
    }

    pub fn from_section(parts: &SectionParts<'_>) -> Result<Self> {
        let syntax = parts.expect_table(TABLE_ID_PAT, "PAT")?;
        if parts.data.len() % 4 != 0 {
            return Err(TsError::ProtocolViolation(format!(
                "PAT data of {} bytes is not a whole number of entries",
                parts.data.len()
            )));
        }

        let entries = parts
            .data
            .chunks_exact(4)
            .map(|chunk| PATEntry {
                program_number: u16::from_be_bytes([chunk[0], chunk[1]]),
                pid: u16::from_be_bytes([chunk[2], chunk[3]]) & PID_MAX,
            })
            .collect();

        Ok(Self {
            syntax,
            entries,
            crc: parts.crc.unwrap_or_default(),
        })
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        Self::from_section(&common_unmarshal(data)?)
    }

    pub fn marshal(&self, crc_mode: CrcMode) -> Result<Bytes> {
        let mut data = BytesMut::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            check_pid(entry.pid)?;
            data.put_u16(entry.program_number);
            data.put_u16(entry.pid | 0xE000);
        }
        common_marshal(TABLE_ID_PAT, false, Some(&self.syntax), &data, crc_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Crc32Mpeg2;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pat_bytes() {
        let pat = Pat::new(1).with_program(1, 0x1000);
        let bytes = pat.marshal(CrcMode::Computed).unwrap();
        assert_eq!(
            &bytes[..12],
            &[0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00]
        );
        assert!(Crc32Mpeg2::is_valid(&bytes));
    }

    #[test]
    fn test_parse_pat() {
        let pat = Pat::new(0x1234)
            .with_program(0, 0x0010)
            .with_program(1, 0x1000)
            .with_program(2, 0x1001);
        let bytes = pat.marshal(CrcMode::Computed).unwrap();

        let parsed = Pat::unmarshal(&bytes).unwrap();
        assert_eq!(parsed.entries, pat.entries);
        assert_eq!(parsed.syntax, pat.syntax);
        assert_eq!(parsed.transport_stream_id(), 0x1234);
        assert_eq!(parsed.network_pid(), Some(0x0010));
        assert_eq!(
            parsed.programs(),
            BTreeMap::from([(1, 0x1000), (2, 0x1001)])
        );
        assert_eq!(parsed.marshal(CrcMode::Computed).unwrap(), bytes);
    }

    #[test]
    fn test_wrong_table_id() {
        let bytes = Pat::new(1).marshal(CrcMode::Computed).unwrap();
        let mut bytes = bytes.to_vec();
        bytes[0] = TABLE_ID_PMT;
        assert!(matches!(
            Pat::unmarshal(&bytes),
            Err(TsError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_bad_pid() {
        let pat = Pat::new(1).with_program(1, 0x2000);
        assert!(matches!(
            pat.marshal(CrcMode::Computed),
            Err(TsError::FieldRange(_))
        ));
    }
}
