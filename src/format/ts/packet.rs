use super::adaptation::AdaptationField;
use super::types::*;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};

/// transport_scrambling_control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScramblingControl {
    #[default]
    None,
    Reserved,
    Even,
    Odd,
}

impl ScramblingControl {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ScramblingControl::None,
            1 => ScramblingControl::Reserved,
            2 => ScramblingControl::Even,
            _ => ScramblingControl::Odd,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            ScramblingControl::None => 0,
            ScramblingControl::Reserved => 1,
            ScramblingControl::Even => 2,
            ScramblingControl::Odd => 3,
        }
    }
}

/// One 188-byte transport packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub priority: bool,
    pub pid: u16,
    pub scrambling: ScramblingControl,
    pub continuity_counter: u8,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: Option<Bytes>,
}

impl Packet {
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_adaptation_field(mut self, field: AdaptationField) -> Self {
        self.adaptation_field = Some(field);
        self
    }

    /// Adds adaptation field stuffing so the payload ends exactly at the end
    /// of the packet instead of being followed by 0xFF padding.
    pub fn stuffed(mut self) -> Result<Self> {
        let len = self.payload.as_ref().map_or(0, |p| p.len());
        self.adaptation_field = AdaptationField::fit(self.adaptation_field.take(), len)?;
        Ok(self)
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Decodes exactly one packet.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(TsError::Framing(format!(
                "packet is {} bytes, expected {}",
                data.len(),
                TS_PACKET_SIZE
            )));
        }
        if data[0] != SYNC_BYTE {
            return Err(TsError::Framing(format!("invalid sync byte {:#04x}", data[0])));
        }

        let mut packet = Packet {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling: ScramblingControl::from_bits(data[3] >> 6),
            continuity_counter: data[3] & 0x0F,
            adaptation_field: None,
            payload: None,
        };
        let has_adaptation = (data[3] & 0x20) != 0;
        let has_payload = (data[3] & 0x10) != 0;

        let mut offset = TS_HEADER_SIZE;
        if has_adaptation {
            let (field, consumed) = AdaptationField::parse(&data[offset..])?;
            packet.adaptation_field = Some(field);
            offset += consumed;
        }
        if has_payload {
            packet.payload = Some(Bytes::copy_from_slice(&data[offset..]));
        }

        Ok(packet)
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        check_pid(self.pid)?;
        if self.continuity_counter > 0x0F {
            return Err(TsError::FieldRange(format!(
                "continuity counter {} exceeds 4 bits",
                self.continuity_counter
            )));
        }
        let af_len = self
            .adaptation_field
            .as_ref()
            .map_or(0, |f| f.encoded_len());
        let payload_len = self.payload.as_ref().map_or(0, |p| p.len());
        if af_len + payload_len > TS_BODY_SIZE {
            return Err(TsError::FieldRange(format!(
                "adaptation field ({}) and payload ({}) exceed {} bytes",
                af_len, payload_len, TS_BODY_SIZE
            )));
        }

        let start = buf.len();
        buf.put_u8(SYNC_BYTE);

        let mut b1 = ((self.pid >> 8) & 0x1F) as u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.priority {
            b1 |= 0x20;
        }
        buf.put_u8(b1);
        buf.put_u8((self.pid & 0xFF) as u8);

        let mut b3 = self.scrambling.bits() << 6;
        if self.adaptation_field.is_some() {
            b3 |= 0x20;
        }
        if self.payload.is_some() {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter;
        buf.put_u8(b3);

        if let Some(field) = &self.adaptation_field {
            field.write_to(buf)?;
        }
        if let Some(payload) = &self.payload {
            buf.put_slice(payload);
        }

        let written = buf.len() - start;
        buf.put_bytes(STUFFING_BYTE, TS_PACKET_SIZE - written);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::pcr::Pcr;
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    impl Arbitrary for Packet {
        fn arbitrary(g: &mut Gen) -> Self {
            let adaptation_field = if bool::arbitrary(g) {
                Some(AdaptationField {
                    discontinuity: bool::arbitrary(g),
                    random_access: bool::arbitrary(g),
                    pcr: if bool::arbitrary(g) {
                        Some(Pcr::from_27mhz(u64::arbitrary(g) >> 20))
                    } else {
                        None
                    },
                    splice_countdown: Option::<i8>::arbitrary(g),
                    stuffing: usize::arbitrary(g) % 16,
                    ..Default::default()
                })
            } else {
                None
            };
            let room = TS_BODY_SIZE - adaptation_field.as_ref().map_or(0, |f| f.encoded_len());
            let payload = if bool::arbitrary(g) {
                let mut bytes = Vec::<u8>::arbitrary(g);
                bytes.truncate(room);
                Some(Bytes::from(bytes))
            } else {
                None
            };
            Packet {
                transport_error: bool::arbitrary(g),
                payload_unit_start: bool::arbitrary(g),
                priority: bool::arbitrary(g),
                pid: u16::arbitrary(g) & PID_MAX,
                scrambling: ScramblingControl::from_bits(u8::arbitrary(g)),
                continuity_counter: u8::arbitrary(g) & 0x0F,
                adaptation_field,
                payload,
            }
        }
    }

    #[quickcheck]
    fn prop_encode_decode_encode(packet: Packet) -> bool {
        let first = packet.encode().unwrap();
        let second = Packet::decode(&first).unwrap().encode().unwrap();
        first.len() == TS_PACKET_SIZE && first == second
    }

    #[test]
    fn test_header_fields() {
        let data = {
            let mut d = vec![0xFFu8; TS_PACKET_SIZE];
            d[..4].copy_from_slice(&[0x47, 0x41, 0x00, 0x1A]);
            d
        };
        let packet = Packet::decode(&data).unwrap();
        assert!(packet.payload_unit_start);
        assert!(!packet.transport_error);
        assert_eq!(packet.pid, 0x100);
        assert_eq!(packet.continuity_counter, 0x0A);
        assert_eq!(packet.scrambling, ScramblingControl::None);
        assert_eq!(packet.payload.unwrap().len(), TS_BODY_SIZE);
        assert!(packet.adaptation_field.is_none());
    }

    #[test]
    fn test_framing_errors() {
        assert!(matches!(
            Packet::decode(&[0x47; 187]),
            Err(TsError::Framing(_))
        ));
        let mut data = vec![0u8; TS_PACKET_SIZE];
        data[0] = 0x48;
        assert!(matches!(Packet::decode(&data), Err(TsError::Framing(_))));
    }

    #[test]
    fn test_pid_out_of_range() {
        let packet = Packet::new(0x2000).with_payload(vec![1, 2, 3]);
        assert!(matches!(packet.encode(), Err(TsError::FieldRange(_))));
    }

    #[test]
    fn test_oversized_body() {
        let packet = Packet::new(0x100)
            .with_adaptation_field(AdaptationField::stuffing(0))
            .with_payload(vec![0u8; TS_BODY_SIZE - 1]);
        assert!(packet.encode().is_err());
    }

    #[test]
    fn test_short_payload_padded() {
        let bytes = Packet::new(0x42).with_payload(vec![1, 2, 3]).encode().unwrap();
        assert_eq!(bytes.len(), TS_PACKET_SIZE);
        assert_eq!(&bytes[4..7], &[1, 2, 3]);
        assert!(bytes[7..].iter().all(|&b| b == STUFFING_BYTE));
    }

    #[test]
    fn test_stuffed_payload_survives() {
        let payload = Bytes::from_static(b"hello transport stream");
        let bytes = Packet::new(0x100)
            .with_payload(payload.clone())
            .stuffed()
            .unwrap()
            .encode()
            .unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, Some(payload));
        assert_eq!(
            decoded.adaptation_field.unwrap().stuffing,
            TS_BODY_SIZE - 22 - 2
        );
    }

    #[test]
    fn test_adaptation_only() {
        let packet = Packet::new(0x100).with_adaptation_field(AdaptationField::stuffing(182));
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[3] & 0x30, 0x20);
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }
}
