use super::packet::ScramblingControl;
use super::types::*;
use crate::error::{Result, TsError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// start code (3) + stream id (1) + packet length (2)
pub const PES_PREFIX_SIZE: usize = 6;
/// Largest value of the 16-bit PES_packet_length field.
pub const MAX_PES_PACKET_LENGTH: usize = 0xFFFF;

/// Streams whose PES units carry no optional header.
pub fn has_optional_header(stream_id: u8) -> bool {
    stream_id != STREAM_ID_PADDING && stream_id != STREAM_ID_PRIVATE_2
}

/// Optional PES header.
///
/// Timestamp fields are not interpreted: whatever follows the two flag bytes
/// (PTS, DTS, ESCR, ...) is kept verbatim in `padding`, so `pts_dts_flags`
/// and the other field flags only describe what those raw bytes contain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PESHeader {
    pub scrambling_control: ScramblingControl,
    pub priority: bool,
    pub data_alignment: bool,
    pub copyright: bool,
    pub original: bool,
    /// Raw 2-bit PTS_DTS_flags.
    pub pts_dts_flags: u8,
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub crc_flag: bool,
    pub extension_flag: bool,
    /// Header data bytes following PES_header_data_length.
    pub padding: Bytes,
}

impl PESHeader {
    pub fn encoded_len(&self) -> usize {
        3 + self.padding.len()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        if self.padding.len() > u8::MAX as usize {
            return Err(TsError::FieldRange(format!(
                "PES header data of {} bytes exceeds 255",
                self.padding.len()
            )));
        }
        if self.pts_dts_flags > 0x03 {
            return Err(TsError::FieldRange(format!(
                "PTS_DTS_flags {:#x} exceeds 2 bits",
                self.pts_dts_flags
            )));
        }

        let mut flags = 0x80 | (self.scrambling_control.bits() << 4);
        if self.priority {
            flags |= 0x08;
        }
        if self.data_alignment {
            flags |= 0x04;
        }
        if self.copyright {
            flags |= 0x02;
        }
        if self.original {
            flags |= 0x01;
        }
        buf.put_u8(flags);

        let mut flags2 = self.pts_dts_flags << 6;
        if self.escr_flag {
            flags2 |= 0x20;
        }
        if self.es_rate_flag {
            flags2 |= 0x10;
        }
        if self.dsm_trick_mode_flag {
            flags2 |= 0x08;
        }
        if self.additional_copy_info_flag {
            flags2 |= 0x04;
        }
        if self.crc_flag {
            flags2 |= 0x02;
        }
        if self.extension_flag {
            flags2 |= 0x01;
        }
        buf.put_u8(flags2);

        buf.put_u8(self.padding.len() as u8);
        buf.put_slice(&self.padding);
        Ok(())
    }

    /// Parses the optional header at the start of `data`, returning it and
    /// the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 3 {
            return Err(TsError::ProtocolViolation("PES optional header truncated".into()));
        }
        if data[0] >> 6 != 0b10 {
            return Err(TsError::ProtocolViolation(format!(
                "PES optional header marker bits {:#04b}",
                data[0] >> 6
            )));
        }
        let header_data_length = data[2] as usize;
        if data.len() < 3 + header_data_length {
            return Err(TsError::ProtocolViolation(format!(
                "PES header data length {} exceeds unit",
                header_data_length
            )));
        }

        let header = PESHeader {
            scrambling_control: ScramblingControl::from_bits(data[0] >> 4),
            priority: (data[0] & 0x08) != 0,
            data_alignment: (data[0] & 0x04) != 0,
            copyright: (data[0] & 0x02) != 0,
            original: (data[0] & 0x01) != 0,
            pts_dts_flags: data[1] >> 6,
            escr_flag: (data[1] & 0x20) != 0,
            es_rate_flag: (data[1] & 0x10) != 0,
            dsm_trick_mode_flag: (data[1] & 0x08) != 0,
            additional_copy_info_flag: (data[1] & 0x04) != 0,
            crc_flag: (data[1] & 0x02) != 0,
            extension_flag: (data[1] & 0x01) != 0,
            padding: Bytes::copy_from_slice(&data[3..3 + header_data_length]),
        };
        Ok((header, 3 + header_data_length))
    }
}

/// One Packetized Elementary Stream unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PESPacket {
    pub stream_id: u8,
    /// Present unless the stream id is padding or private stream 2.
    pub header: Option<PESHeader>,
    pub payload: Bytes,
}

impl PESPacket {
    /// Creates a unit with a default optional header where the stream id
    /// calls for one.
    pub fn new(stream_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            header: has_optional_header(stream_id).then(PESHeader::default),
            payload: payload.into(),
        }
    }

    /// Value of the PES_packet_length field.
    pub fn packet_length(&self) -> usize {
        self.header.as_ref().map_or(0, |h| h.encoded_len()) + self.payload.len()
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        if self.header.is_some() && !has_optional_header(self.stream_id) {
            return Err(TsError::ProtocolViolation(format!(
                "stream id {:#04x} carries no optional header",
                self.stream_id
            )));
        }
        let default_header;
        let header = match &self.header {
            Some(h) => Some(h),
            None if has_optional_header(self.stream_id) => {
                default_header = PESHeader::default();
                Some(&default_header)
            }
            None => None,
        };

        let length = header.map_or(0, |h| h.encoded_len()) + self.payload.len();
        if length > MAX_PES_PACKET_LENGTH {
            return Err(TsError::FieldRange(format!(
                "PES packet length {} exceeds 16 bits",
                length
            )));
        }

        buf.put_slice(&PES_START_CODE);
        buf.put_u8(self.stream_id);
        buf.put_u16(length as u16);
        if let Some(h) = header {
            h.write_to(buf)?;
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(PES_PREFIX_SIZE + self.packet_length() + 3);
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes one unit from the start of `data`. A zero packet length means
    /// the unit runs to the end of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PES_PREFIX_SIZE {
            return Err(TsError::ProtocolViolation("PES unit truncated".into()));
        }
        if data[..3] != PES_START_CODE {
            return Err(TsError::ProtocolViolation(format!(
                "bad PES start code {:02x?}",
                &data[..3]
            )));
        }
        let stream_id = data[3];
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let body = if length == 0 {
            &data[PES_PREFIX_SIZE..]
        } else {
            data.get(PES_PREFIX_SIZE..PES_PREFIX_SIZE + length).ok_or_else(|| {
                TsError::ProtocolViolation(format!(
                    "PES length {} exceeds {} available bytes",
                    length,
                    data.len() - PES_PREFIX_SIZE
                ))
            })?
        };

        let (header, offset) = if has_optional_header(stream_id) {
            let (header, consumed) = PESHeader::parse(body)?;
            (Some(header), consumed)
        } else {
            (None, 0)
        };

        Ok(Self {
            stream_id,
            header,
            payload: Bytes::copy_from_slice(&body[offset..]),
        })
    }
}

/// Turns a byte stream of PES units back into the elementary stream bytes.
///
/// Implements [`AsyncRead`] over the unit payloads. Reads may stop in the
/// middle of a unit's payload; the rest is kept and handed out by the
/// following reads. Decode failures surface as [`io::ErrorKind::InvalidData`]
/// wrapping the [`TsError`].
pub struct PesReader<R> {
    inner: R,
    /// Bytes of the unit being assembled.
    pending: BytesMut,
    carry: Bytes,
    last_stream_id: Option<u8>,
}

impl<R: AsyncRead + Unpin> PesReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
            carry: Bytes::new(),
            last_stream_id: None,
        }
    }

    /// Stream id of the most recently read unit.
    pub fn stream_id(&self) -> Option<u8> {
        self.last_stream_id
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads the next whole unit, or `None` at a clean end of stream.
    /// Payload bytes left over from an earlier partial read are skipped.
    pub async fn read_unit(&mut self) -> Result<Option<PESPacket>> {
        self.carry.clear();
        poll_fn(|cx| self.poll_unit(cx)).await
    }

    /// Total size of the unit in `pending`, or the prefix size until the
    /// prefix is complete.
    fn wanted(&self) -> Result<usize> {
        if self.pending.len() < PES_PREFIX_SIZE {
            return Ok(PES_PREFIX_SIZE);
        }
        if self.pending[..3] != PES_START_CODE {
            return Err(TsError::ProtocolViolation(format!(
                "bad PES start code {:02x?}",
                &self.pending[..3]
            )));
        }
        let length = u16::from_be_bytes([self.pending[4], self.pending[5]]) as usize;
        if length == 0 {
            return Err(TsError::ProtocolViolation(
                "unbounded PES unit cannot be delimited in a byte stream".into(),
            ));
        }
        Ok(PES_PREFIX_SIZE + length)
    }

    fn poll_unit(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<PESPacket>>> {
        loop {
            let wanted = self.wanted()?;
            if self.pending.len() > PES_PREFIX_SIZE && self.pending.len() == wanted {
                let unit = self.pending.split().freeze();
                let packet = PESPacket::decode(&unit)?;
                self.last_stream_id = Some(packet.stream_id);
                return Poll::Ready(Ok(Some(packet)));
            }

            let start = self.pending.len();
            self.pending.resize(wanted, 0);
            let mut read_buf = ReadBuf::new(&mut self.pending[start..]);
            let polled = Pin::new(&mut self.inner).poll_read(cx, &mut read_buf);
            let n = read_buf.filled().len();
            self.pending.truncate(start + n);
            ready!(polled)?;

            if n == 0 {
                return Poll::Ready(match start {
                    0 => Ok(None),
                    s if s < PES_PREFIX_SIZE => Err(TsError::ProtocolViolation(
                        "stream ended inside a PES prefix".into(),
                    )),
                    _ => Err(TsError::ProtocolViolation(
                        "stream ended inside a PES unit".into(),
                    )),
                });
            }
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PesReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        while this.carry.is_empty() {
            match ready!(this.poll_unit(cx))? {
                Some(unit) => this.carry = unit.payload,
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(this.carry.len());
        buf.put_slice(&this.carry[..n]);
        this.carry.advance(n);
        Poll::Ready(Ok(()))
    }
}
