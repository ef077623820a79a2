// Packet layout
pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
/// Bytes after the 4-byte header, shared by adaptation field and payload.
pub const TS_BODY_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
pub const STUFFING_BYTE: u8 = 0xFF;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_SDT: u16 = 0x0011;
pub const PID_NULL: u16 = 0x1FFF;
pub const PID_MAX: u16 = 0x1FFF;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_SDT: u8 = 0x42;
/// Section length ceiling for PSI sections.
pub const MAX_SECTION_LENGTH: usize = 1021;

// Descriptor tags
pub const DESCRIPTOR_TAG_SERVICE: u8 = 0x48;

// PES stream IDs
pub const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xBC;
pub const STREAM_ID_PRIVATE_1: u8 = 0xBD;
pub const STREAM_ID_PADDING: u8 = 0xBE;
pub const STREAM_ID_PRIVATE_2: u8 = 0xBF;
pub const STREAM_ID_AUDIO: u8 = 0xC0;
pub const STREAM_ID_VIDEO: u8 = 0xE0;
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

// Elementary stream types (PMT)
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_H265: u8 = 0x24;

// Clocks
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

/// Rejects PIDs that do not fit the 13-bit field.
pub fn check_pid(pid: u16) -> crate::Result<u16> {
    if pid > PID_MAX {
        return Err(crate::TsError::FieldRange(format!(
            "pid {:#x} exceeds 13 bits",
            pid
        )));
    }
    Ok(pid)
}
