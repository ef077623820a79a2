use super::descriptor::{parse_descriptors, write_descriptor_loop, Descriptor};
use super::section::{common_marshal, common_unmarshal, SectionParts, SectionSyntax};
use super::types::*;
use crate::config::CrcMode;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};

/// Longest descriptor loop a 10-bit info length can declare.
const MAX_INFO_LENGTH: usize = 0x3FF;

/// One elementary stream of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PMTStream {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl PMTStream {
    pub fn new(stream_type: u8, pid: u16) -> Self {
        Self {
            stream_type,
            pid,
            descriptors: Vec::new(),
        }
    }
}

/// Program Map Table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pmt {
    /// `table_id_extension` holds the program_number.
    pub syntax: SectionSyntax,
    pub pcr_pid: u16,
    pub descriptors: Vec<Descriptor>,
    pub streams: Vec<PMTStream>,
    pub crc: u32,
}

fn truncated(what: &str) -> TsError {
    TsError::ProtocolViolation(format!("PMT {} truncated", what))
}

impl Pmt {
    pub fn new(program_number: u16, pcr_pid: u16) -> Self {
        Self {
            syntax: SectionSyntax::new(program_number),
            pcr_pid,
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, stream: PMTStream) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn program_number(&self) -> u16 {
        self.syntax.table_id_extension
    }

    pub fn from_section(parts: &SectionParts<'_>) -> Result<Self> {
        let syntax = parts.expect_table(TABLE_ID_PMT, "PMT")?;
        let data = parts.data;
        if data.len() < 4 {
            return Err(truncated("header"));
        }

        let pcr_pid = u16::from_be_bytes([data[0], data[1]]) & PID_MAX;
        let info_len = (u16::from_be_bytes([data[2], data[3]]) & 0x0FFF) as usize;
        let info = data.get(4..4 + info_len).ok_or_else(|| truncated("program info"))?;
        let descriptors = parse_descriptors(info)?;

        let mut streams = Vec::new();
        let mut rest = &data[4 + info_len..];
        while !rest.is_empty() {
            if rest.len() < 5 {
                return Err(truncated("stream entry"));
            }
            let es_info_len = (u16::from_be_bytes([rest[3], rest[4]]) & 0x0FFF) as usize;
            let es_info = rest
                .get(5..5 + es_info_len)
                .ok_or_else(|| truncated("ES info"))?;
            streams.push(PMTStream {
                stream_type: rest[0],
                pid: u16::from_be_bytes([rest[1], rest[2]]) & PID_MAX,
                descriptors: parse_descriptors(es_info)?,
            });
            rest = &rest[5 + es_info_len..];
        }

        Ok(Self {
            syntax,
            pcr_pid,
            descriptors,
            streams,
            crc: parts.crc.unwrap_or_default(),
        })
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        Self::from_section(&common_unmarshal(data)?)
    }

    pub fn marshal(&self, crc_mode: CrcMode) -> Result<Bytes> {
        let mut data = BytesMut::new();
        data.put_u16(check_pid(self.pcr_pid)? | 0xE000);
        write_descriptor_loop(&self.descriptors, 0xF, MAX_INFO_LENGTH, &mut data)?;
        for stream in &self.streams {
            data.put_u8(stream.stream_type);
            data.put_u16(check_pid(stream.pid)? | 0xE000);
            write_descriptor_loop(&stream.descriptors, 0xF, MAX_INFO_LENGTH, &mut data)?;
        }
        common_marshal(TABLE_ID_PMT, false, Some(&self.syntax), &data, crc_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::descriptor::{RawDescriptor, ServiceDescriptor};
    use crate::utils::Crc32Mpeg2;
    use pretty_assertions::assert_eq;

    fn sample() -> Pmt {
        let mut pmt = Pmt::new(1, 0x100)
            .with_stream(PMTStream::new(STREAM_TYPE_H264, 0x100))
            .with_stream(PMTStream {
                stream_type: STREAM_TYPE_AAC,
                pid: 0x101,
                descriptors: vec![Descriptor::Raw(RawDescriptor {
                    tag: 0x0A,
                    data: Bytes::from_static(b"eng\x00"),
                })],
            });
        pmt.syntax.version = 3;
        pmt.descriptors
            .push(Descriptor::Service(ServiceDescriptor::new(0x01, "ACME", "One")));
        pmt
    }

    #[test]
    fn test_pmt_round_trip() {
        let pmt = sample();
        let bytes = pmt.marshal(CrcMode::Computed).unwrap();
        assert!(Crc32Mpeg2::is_valid(&bytes));

        let parsed = Pmt::unmarshal(&bytes).unwrap();
        assert_eq!(parsed.program_number(), 1);
        assert_eq!(parsed.syntax, pmt.syntax);
        assert_eq!(parsed.pcr_pid, 0x100);
        assert_eq!(parsed.descriptors, pmt.descriptors);
        assert_eq!(parsed.streams, pmt.streams);
        assert_eq!(parsed.crc, Crc32Mpeg2::calculate(&bytes[..bytes.len() - 4]));
    }

    #[test]
    fn test_pmt_layout() {
        let pmt = Pmt::new(1, 0x100).with_stream(PMTStream::new(STREAM_TYPE_H264, 0x100));
        let bytes = pmt.marshal(CrcMode::Placeholder).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x02, 0xB0, 0x12, 0x00, 0x01, 0xC1, 0x00, 0x00, // envelope
                0xE1, 0x00, 0xF0, 0x00, // PCR PID, program info
                0x1B, 0xE1, 0x00, 0xF0, 0x00, // stream
                0xFF, 0xFF, 0xFF, 0xFF,
            ]
        );
    }

    #[test]
    fn test_truncated_stream_entry() {
        let pmt = Pmt::new(1, 0x100).with_stream(PMTStream::new(STREAM_TYPE_H264, 0x100));
        let mut bytes = pmt.marshal(CrcMode::Placeholder).unwrap().to_vec();
        // claim 4 bytes of ES info that are not there
        bytes[16] = 0x04;
        assert!(matches!(
            Pmt::unmarshal(&bytes),
            Err(TsError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_oversized_info_loop() {
        let mut pmt = Pmt::new(1, 0x100);
        for _ in 0..5 {
            pmt.descriptors.push(Descriptor::Raw(RawDescriptor {
                tag: 0x80,
                data: Bytes::from(vec![0u8; 250]),
            }));
        }
        assert!(matches!(
            pmt.marshal(CrcMode::Computed),
            Err(TsError::FieldRange(_))
        ));
    }
}
