#![doc(html_root_url = "https://docs.rs/tsio/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsio - MPEG Transport Stream I/O
//!
//! `tsio` multiplexes per-program byte streams into 188-byte MPEG transport
//! packets and demultiplexes them back, with codecs for the structures a
//! conformant stream carries.
//!
//! ## Features
//!
//! - Transport packets with adaptation fields, PCR and stuffing
//! - PES wrapping and unwrapping
//! - PAT, PMT and DVB SDT sections with descriptor loops
//! - Async demuxer and muxer over any `AsyncRead`/`AsyncWrite`
//!
//! ## Module Overview
//!
//! - `format::ts`: packet, PES and PSI codecs, demuxer and muxer
//! - `config`: pipe sizes, timeouts and muxer defaults from file and env
//! - `error`: [`TsError`] and the crate [`Result`] alias
//! - `utils`: bit reader/writer and CRC-32/MPEG-2
//!
//! ## Configuration
//!
//! Settings load once from `./tsio.toml` (or `./config.toml`) and `TSIO_*`
//! environment variables; see [`config`].

/// Error types and utilities
pub mod error;

/// Transport stream format implementation
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use config::{Config, CrcMode};
pub use error::{Result, TsError};
