//! # MPEG Transport Stream (TS) Implementation
//!
//! Codecs for the 188-byte transport packet and the structures it carries,
//! plus a demuxer and muxer that connect per-PID byte streams to a packet
//! stream.
//!
//! - Packet, adaptation field and PCR encoding
//! - PES units and a PES-unwrapping reader
//! - PSI sections (PAT, PMT, SDT) and descriptors, with raw fallbacks for
//!   unknown table ids and tags
//! - [`TSDemuxer`]: packets in, one [`ProgramReader`] per registered PID out
//! - [`TSMuxer`]: one [`ProgramWriter`] per registered PID in, packets out
//!
//! ## Example Usage
//!
//! ```rust
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use tokio_util::sync::CancellationToken;
//! use tsio::format::ts::{TSDemuxer, TSMuxer};
//! use tsio::Config;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, source) = tokio::io::duplex(64 * 1024);
//!
//! let demuxer = TSDemuxer::with_config(Config::default());
//! let mut reader = demuxer.register(0x100)?;
//! let demux = tokio::spawn({
//!     let demuxer = demuxer.clone();
//!     async move { demuxer.run(source, CancellationToken::new()).await }
//! });
//!
//! let muxer = TSMuxer::with_config(sink, Config::default());
//! let mut writer = muxer.register(0x100, false)?;
//! writer.write_all(b"elementary stream").await?;
//! writer.close().await?;
//! muxer.close().await?;
//! drop(muxer);
//!
//! demux.await??;
//! let mut out = Vec::new();
//! reader.read_to_end(&mut out).await?;
//! assert_eq!(out, b"elementary stream");
//! # Ok(())
//! # }
//! ```

pub mod adaptation;
pub mod demuxer;
pub mod descriptor;
pub mod muxer;
pub mod packet;
pub mod pat;
pub mod pcr;
pub mod pes;
pub mod pipe;
pub mod pmt;
pub mod program;
pub mod sdt;
pub mod section;

/// Core TS types and constants
pub mod types;

pub use adaptation::{AdaptationExtension, AdaptationField, LegalTimeWindow, SeamlessSplice};
pub use demuxer::TSDemuxer;
pub use descriptor::{Descriptor, RawDescriptor, ServiceDescriptor};
pub use muxer::TSMuxer;
pub use packet::{Packet, ScramblingControl};
pub use pat::{PATEntry, Pat};
pub use pcr::{Pcr, PcrSource};
pub use pes::{PESHeader, PESPacket, PesReader};
pub use pmt::{PMTStream, Pmt};
pub use program::{ProgramReader, ProgramWriter};
pub use sdt::{SDTService, Sdt};
pub use section::{common_marshal, common_unmarshal, RawTable, SectionSyntax, Table};
pub use types::{
    PID_NULL, PID_PAT, PID_SDT, STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_H265,
    TS_PACKET_SIZE,
};
