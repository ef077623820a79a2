use super::pcr::{Pcr, PCR_SIZE};
use super::types::{STUFFING_BYTE, TS_BODY_SIZE};
use crate::error::{Result, TsError};
use crate::utils::{BitReader, BitWriter};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest value the adaptation_field_length byte may hold.
pub const MAX_ADAPTATION_FIELD_LENGTH: usize = TS_BODY_SIZE - 1;

/// Legal time window from the adaptation field extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegalTimeWindow {
    pub valid: bool,
    /// 15-bit offset.
    pub offset: u16,
}

/// Seamless splice parameters from the adaptation field extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeamlessSplice {
    /// 4-bit splice type.
    pub splice_type: u8,
    /// 33-bit decoding time of the next access unit.
    pub dts_next_access_unit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdaptationExtension {
    pub legal_time_window: Option<LegalTimeWindow>,
    /// 22-bit piecewise rate.
    pub piecewise_rate: Option<u32>,
    pub seamless_splice: Option<SeamlessSplice>,
}

impl AdaptationExtension {
    /// Encoded size including the extension length byte.
    pub fn encoded_len(&self) -> usize {
        2 + self.legal_time_window.map_or(0, |_| 2)
            + self.piecewise_rate.map_or(0, |_| 3)
            + self.seamless_splice.map_or(0, |_| 5)
    }

    fn parse(reader: &mut BitReader) -> Result<Self> {
        let length = reader.read_u8()? as usize;
        if length == 0 {
            return Err(TsError::ProtocolViolation(
                "adaptation field extension without a flags byte".into(),
            ));
        }
        let body = reader.read_bytes(length)?;
        let mut ext = AdaptationExtension::default();

        let mut r = BitReader::new(body);
        let ltw_flag = r.read_bit()?;
        let piecewise_rate_flag = r.read_bit()?;
        let seamless_splice_flag = r.read_bit()?;
        r.skip_bits(5)?;

        if ltw_flag {
            ext.legal_time_window = Some(LegalTimeWindow {
                valid: r.read_bit()?,
                offset: r.read_bits(15)? as u16,
            });
        }
        if piecewise_rate_flag {
            r.skip_bits(2)?;
            ext.piecewise_rate = Some(r.read_bits(22)?);
        }
        if seamless_splice_flag {
            let splice_type = r.read_bits(4)? as u8;
            let high = r.read_bits(3)? as u64;
            r.skip_bits(1)?;
            let mid = r.read_bits(15)? as u64;
            r.skip_bits(1)?;
            let low = r.read_bits(15)? as u64;
            r.skip_bits(1)?;
            ext.seamless_splice = Some(SeamlessSplice {
                splice_type,
                dts_next_access_unit: (high << 30) | (mid << 15) | low,
            });
        }
        // any trailing reserved bytes up to `length` are skipped
        Ok(ext)
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_bits(8, (self.encoded_len() - 1) as u32)?;
        w.write_bit(self.legal_time_window.is_some());
        w.write_bit(self.piecewise_rate.is_some());
        w.write_bit(self.seamless_splice.is_some());
        w.write_bits(5, 0x1F)?;

        if let Some(ltw) = self.legal_time_window {
            w.write_bit(ltw.valid);
            w.write_bits(15, ltw.offset as u32)?;
        }
        if let Some(rate) = self.piecewise_rate {
            w.write_bits(2, 0b11)?;
            w.write_bits(22, rate)?;
        }
        if let Some(splice) = self.seamless_splice {
            let dts = splice.dts_next_access_unit;
            if dts >> 33 != 0 {
                return Err(TsError::FieldRange(format!(
                    "DTS_next_AU {:#x} exceeds 33 bits",
                    dts
                )));
            }
            w.write_bits(4, splice.splice_type as u32)?;
            w.write_bits(3, (dts >> 30) as u32)?;
            w.write_bit(true);
            w.write_bits(15, ((dts >> 15) & 0x7FFF) as u32)?;
            w.write_bit(true);
            w.write_bits(15, (dts & 0x7FFF) as u32)?;
            w.write_bit(true);
        }
        Ok(())
    }
}

/// Optional per-packet extension between the TS header and the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdaptationField {
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    pub splice_countdown: Option<i8>,
    pub private_data: Option<Bytes>,
    pub extension: Option<AdaptationExtension>,
    /// Trailing stuffing bytes counted after every present field.
    pub stuffing: usize,
    /// Encodes as a lone zero length byte without a flags byte, the only
    /// way to pad a packet by exactly one byte.
    pub length_only: bool,
}

impl AdaptationField {
    /// An adaptation field carrying nothing but `stuffing` padding bytes.
    pub fn stuffing(stuffing: usize) -> Self {
        Self {
            stuffing,
            ..Default::default()
        }
    }

    /// Encoded size including the length byte.
    pub fn encoded_len(&self) -> usize {
        if self.length_only {
            return 1;
        }
        2 + self.pcr.map_or(0, |_| PCR_SIZE)
            + self.opcr.map_or(0, |_| PCR_SIZE)
            + self.splice_countdown.map_or(0, |_| 1)
            + self.private_data.as_ref().map_or(0, |d| 1 + d.len())
            + self.extension.as_ref().map_or(0, |e| e.encoded_len())
            + self.stuffing
    }

    /// Parses an adaptation field starting at its length byte. Returns the
    /// field and the number of bytes it occupies. Reads never go past the
    /// declared length.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let length = *data
            .first()
            .ok_or_else(|| TsError::Framing("missing adaptation field length".into()))?
            as usize;
        if length > MAX_ADAPTATION_FIELD_LENGTH || 1 + length > data.len() {
            return Err(TsError::Framing(format!(
                "adaptation field length {} exceeds packet",
                length
            )));
        }
        if length == 0 {
            return Ok((
                Self {
                    length_only: true,
                    ..Default::default()
                },
                1,
            ));
        }

        let mut r = BitReader::new(&data[1..1 + length]);
        let mut field = AdaptationField {
            discontinuity: r.read_bit()?,
            random_access: r.read_bit()?,
            es_priority: r.read_bit()?,
            ..Default::default()
        };
        let pcr_flag = r.read_bit()?;
        let opcr_flag = r.read_bit()?;
        let splicing_point_flag = r.read_bit()?;
        let private_data_flag = r.read_bit()?;
        let extension_flag = r.read_bit()?;

        if pcr_flag {
            field.pcr = Some(Pcr::decode(r.read_bytes(PCR_SIZE)?)?);
        }
        if opcr_flag {
            field.opcr = Some(Pcr::decode(r.read_bytes(PCR_SIZE)?)?);
        }
        if splicing_point_flag {
            field.splice_countdown = Some(r.read_u8()? as i8);
        }
        if private_data_flag {
            let len = r.read_u8()? as usize;
            field.private_data = Some(Bytes::copy_from_slice(r.read_bytes(len)?));
        }
        if extension_flag {
            field.extension = Some(AdaptationExtension::parse(&mut r)?);
        }
        field.stuffing = length - r.position();

        Ok((field, 1 + length))
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let length = self.encoded_len() - 1;
        if length > MAX_ADAPTATION_FIELD_LENGTH {
            return Err(TsError::FieldRange(format!(
                "adaptation field length {} exceeds {}",
                length, MAX_ADAPTATION_FIELD_LENGTH
            )));
        }
        if self.length_only {
            buf.put_u8(0);
            return Ok(());
        }
        if let Some(data) = &self.private_data {
            if data.len() > u8::MAX as usize {
                return Err(TsError::FieldRange(format!(
                    "private data of {} bytes exceeds 255",
                    data.len()
                )));
            }
        }

        let mut w = BitWriter::new();
        w.write_bits(8, length as u32)?;
        w.write_bit(self.discontinuity);
        w.write_bit(self.random_access);
        w.write_bit(self.es_priority);
        w.write_bit(self.pcr.is_some());
        w.write_bit(self.opcr.is_some());
        w.write_bit(self.splice_countdown.is_some());
        w.write_bit(self.private_data.is_some());
        w.write_bit(self.extension.is_some());

        if let Some(pcr) = self.pcr {
            w.write_bytes(&pcr.encode()?)?;
        }
        if let Some(opcr) = self.opcr {
            w.write_bytes(&opcr.encode()?)?;
        }
        if let Some(countdown) = self.splice_countdown {
            w.write_bits(8, countdown as u8 as u32)?;
        }
        if let Some(data) = &self.private_data {
            w.write_bits(8, data.len() as u32)?;
            w.write_bytes(data)?;
        }
        if let Some(ext) = &self.extension {
            ext.write(&mut w)?;
        }

        buf.put_slice(&w.into_bytes());
        buf.put_bytes(STUFFING_BYTE, self.stuffing);
        Ok(())
    }

    /// Grows (or creates) an adaptation field so that it plus `payload_len`
    /// bytes of payload fill the packet body exactly.
    pub fn fit(field: Option<Self>, payload_len: usize) -> Result<Option<Self>> {
        let used = field.as_ref().map_or(0, |f| f.encoded_len());
        if used + payload_len > TS_BODY_SIZE {
            return Err(TsError::FieldRange(format!(
                "adaptation field ({}) and payload ({}) exceed {} bytes",
                used, payload_len, TS_BODY_SIZE
            )));
        }
        let gap = TS_BODY_SIZE - used - payload_len;
        if gap == 0 {
            return Ok(field);
        }

        Ok(Some(match field {
            Some(mut f) if f.length_only => {
                f.length_only = false;
                f.stuffing = gap - 1;
                f
            }
            Some(mut f) => {
                f.stuffing += gap;
                f
            }
            None if gap == 1 => Self {
                length_only: true,
                ..Default::default()
            },
            None => Self::stuffing(gap - 2),
        }))
    }
}
