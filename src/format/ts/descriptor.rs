//! Tag-dispatched descriptor codec.
//!
//! Known tags decode into typed variants; anything else is kept as
//! [`RawDescriptor`] so unrecognised descriptors survive a decode/encode
//! cycle byte for byte.

use super::types::DESCRIPTOR_TAG_SERVICE;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Builds a typed descriptor from its payload (the bytes after tag and length).
pub type DescriptorDecoder = fn(&[u8]) -> Result<Descriptor>;

/// Registry lookup: the decoder for `tag`, if the tag is known.
pub fn decoder_for(tag: u8) -> Option<DescriptorDecoder> {
    match tag {
        DESCRIPTOR_TAG_SERVICE => Some(ServiceDescriptor::decode_descriptor),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    Raw(RawDescriptor),
}

/// DVB service descriptor (tag 0x48).
///
/// Names are kept as the raw broadcast bytes; DVB text may use a non-UTF-8
/// character table selected by its first byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider_name: Bytes,
    pub service_name: Bytes,
}

/// A descriptor with an unregistered tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub tag: u8,
    pub data: Bytes,
}

impl ServiceDescriptor {
    pub fn new(service_type: u8, provider_name: &str, service_name: &str) -> Self {
        Self {
            service_type,
            provider_name: Bytes::copy_from_slice(provider_name.as_bytes()),
            service_name: Bytes::copy_from_slice(service_name.as_bytes()),
        }
    }

    pub fn provider_name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.provider_name)
    }

    pub fn service_name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.service_name)
    }

    fn decode_descriptor(data: &[u8]) -> Result<Descriptor> {
        Self::decode(data).map(Descriptor::Service)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let truncated = || TsError::ProtocolViolation("service descriptor truncated".into());

        let service_type = *data.first().ok_or_else(truncated)?;
        let provider_len = *data.get(1).ok_or_else(truncated)? as usize;
        let provider_name = data.get(2..2 + provider_len).ok_or_else(truncated)?;
        let name_offset = 2 + provider_len;
        let name_len = *data.get(name_offset).ok_or_else(truncated)? as usize;
        let service_name = data
            .get(name_offset + 1..name_offset + 1 + name_len)
            .ok_or_else(truncated)?;
        if name_offset + 1 + name_len != data.len() {
            return Err(TsError::ProtocolViolation(format!(
                "service descriptor has {} trailing bytes",
                data.len() - (name_offset + 1 + name_len)
            )));
        }

        Ok(Self {
            service_type,
            provider_name: Bytes::copy_from_slice(provider_name),
            service_name: Bytes::copy_from_slice(service_name),
        })
    }

    fn payload_len(&self) -> usize {
        3 + self.provider_name.len() + self.service_name.len()
    }

    fn write_payload(&self, buf: &mut BytesMut) -> Result<()> {
        for name in [&self.provider_name, &self.service_name] {
            if name.len() > u8::MAX as usize {
                return Err(TsError::FieldRange(format!(
                    "service descriptor name of {} bytes exceeds 255",
                    name.len()
                )));
            }
        }
        buf.put_u8(self.service_type);
        buf.put_u8(self.provider_name.len() as u8);
        buf.put_slice(&self.provider_name);
        buf.put_u8(self.service_name.len() as u8);
        buf.put_slice(&self.service_name);
        Ok(())
    }
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Service(_) => DESCRIPTOR_TAG_SERVICE,
            Descriptor::Raw(raw) => raw.tag,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Descriptor::Service(service) => service.payload_len(),
            Descriptor::Raw(raw) => raw.data.len(),
        }
    }

    /// Size on the wire including tag and length bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.payload_len()
    }

    /// Parses one descriptor from the start of `data`, returning it and the
    /// number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(TsError::ProtocolViolation("descriptor header truncated".into()));
        }
        let tag = data[0];
        let length = data[1] as usize;
        let payload = data.get(2..2 + length).ok_or_else(|| {
            TsError::ProtocolViolation(format!(
                "descriptor {:#04x} length {} exceeds {} available bytes",
                tag,
                length,
                data.len() - 2
            ))
        })?;

        let descriptor = match decoder_for(tag) {
            Some(decode) => decode(payload)?,
            None => Descriptor::Raw(RawDescriptor {
                tag,
                data: Bytes::copy_from_slice(payload),
            }),
        };
        Ok((descriptor, 2 + length))
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let length = self.payload_len();
        if length > u8::MAX as usize {
            return Err(TsError::FieldRange(format!(
                "descriptor {:#04x} payload of {} bytes exceeds 255",
                self.tag(),
                length
            )));
        }
        buf.put_u8(self.tag());
        buf.put_u8(length as u8);
        match self {
            Descriptor::Service(service) => service.write_payload(buf),
            Descriptor::Raw(raw) => {
                buf.put_slice(&raw.data);
                Ok(())
            }
        }
    }
}

/// Parses a descriptor loop that fills `data` exactly.
pub fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (descriptor, consumed) = Descriptor::parse(&data[pos..])?;
        descriptors.push(descriptor);
        pos += consumed;
    }
    Ok(descriptors)
}

pub fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(Descriptor::encoded_len).sum()
}

/// Writes a descriptor loop preceded by its 12-bit length. `high_bits` are
/// the four bits that share the length's first byte.
pub fn write_descriptor_loop(
    descriptors: &[Descriptor],
    high_bits: u8,
    max_len: usize,
    buf: &mut BytesMut,
) -> Result<()> {
    let len = descriptors_len(descriptors);
    if len > max_len {
        return Err(TsError::FieldRange(format!(
            "descriptor loop of {} bytes exceeds {}",
            len, max_len
        )));
    }
    buf.put_u16(((high_bits as u16 & 0x0F) << 12) | len as u16);
    for descriptor in descriptors {
        descriptor.write_to(buf)?;
    }
    Ok(())
}
