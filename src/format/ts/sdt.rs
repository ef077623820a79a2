use super::descriptor::{parse_descriptors, write_descriptor_loop, Descriptor, ServiceDescriptor};
use super::section::{common_marshal, common_unmarshal, SectionParts, SectionSyntax};
use super::types::*;
use crate::config::CrcMode;
use crate::error::{Result, TsError};
use crate::utils::BitReader;
use bytes::{BufMut, Bytes, BytesMut};

const MAX_DESCRIPTORS_LOOP_LENGTH: usize = 0xFFF;

/// running_status values from ETSI EN 300 468.
pub mod running_status {
    pub const UNDEFINED: u8 = 0;
    pub const NOT_RUNNING: u8 = 1;
    pub const STARTS_SOON: u8 = 2;
    pub const PAUSING: u8 = 3;
    pub const RUNNING: u8 = 4;
    pub const OFF_AIR: u8 = 5;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SDTService {
    pub service_id: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    /// 3-bit running status.
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

impl SDTService {
    pub fn new(service_id: u16) -> Self {
        Self {
            service_id,
            running_status: running_status::RUNNING,
            ..Default::default()
        }
    }

    /// First service descriptor attached to this service.
    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::Service(service) => Some(service),
            _ => None,
        })
    }
}

/// DVB Service Description Table (actual transport stream).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sdt {
    /// `table_id_extension` holds the transport_stream_id.
    pub syntax: SectionSyntax,
    pub original_network_id: u16,
    pub services: Vec<SDTService>,
    pub crc: u32,
}

impl Sdt {
    pub fn new(transport_stream_id: u16, original_network_id: u16) -> Self {
        Self {
            syntax: SectionSyntax::new(transport_stream_id),
            original_network_id,
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: SDTService) -> Self {
        self.services.push(service);
        self
    }

    pub fn transport_stream_id(&self) -> u16 {
        self.syntax.table_id_extension
    }

    pub fn from_section(parts: &SectionParts<'_>) -> Result<Self> {
        let syntax = parts.expect_table(TABLE_ID_SDT, "SDT")?;
        let mut r = BitReader::new(parts.data);
        let original_network_id = r.read_u16()?;
        r.skip_bits(8)?;

        let mut services = Vec::new();
        while r.available_bits() > 0 {
            if r.available_bits() < 40 {
                return Err(TsError::ProtocolViolation(
                    "SDT service entry truncated".into(),
                ));
            }
            let service_id = r.read_u16()?;
            r.skip_bits(6)?;
            let eit_schedule = r.read_bit()?;
            let eit_present_following = r.read_bit()?;
            let running_status = r.read_bits(3)? as u8;
            let free_ca_mode = r.read_bit()?;
            let loop_len = r.read_bits(12)? as usize;
            let descriptors = parse_descriptors(r.read_bytes(loop_len)?)?;
            services.push(SDTService {
                service_id,
                eit_schedule,
                eit_present_following,
                running_status,
                free_ca_mode,
                descriptors,
            });
        }

        Ok(Self {
            syntax,
            original_network_id,
            services,
            crc: parts.crc.unwrap_or_default(),
        })
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        Self::from_section(&common_unmarshal(data)?)
    }

    pub fn marshal(&self, crc_mode: CrcMode) -> Result<Bytes> {
        let mut data = BytesMut::new();
        data.put_u16(self.original_network_id);
        data.put_u8(0xFF);
        for service in &self.services {
            if service.running_status > 0x07 {
                return Err(TsError::FieldRange(format!(
                    "running status {} exceeds 3 bits",
                    service.running_status
                )));
            }
            data.put_u16(service.service_id);
            let mut flags = 0xFC;
            if service.eit_schedule {
                flags |= 0x02;
            }
            if service.eit_present_following {
                flags |= 0x01;
            }
            data.put_u8(flags);
            let high_bits = (service.running_status << 1) | service.free_ca_mode as u8;
            write_descriptor_loop(
                &service.descriptors,
                high_bits,
                MAX_DESCRIPTORS_LOOP_LENGTH,
                &mut data,
            )?;
        }
        common_marshal(TABLE_ID_SDT, true, Some(&self.syntax), &data, crc_mode)
    }
}
