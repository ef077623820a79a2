use crate::error::{Result, TsError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}

const CONFIG_PATHS: [&str; 2] = ["./tsio.toml", "./config.toml"];

/// Largest PES payload the muxer will wrap in one unit: 16-bit length minus
/// the three mandatory optional-header bytes.
pub const MAX_PES_CHUNK: usize = 0xFFFF - 3;

/// How PSI sections are terminated when marshaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcMode {
    /// CRC-32/MPEG-2 over the whole section.
    #[default]
    Computed,
    /// Fixed `0xFFFFFFFF` trailer, byte compatible with writers that never
    /// computed the checksum.
    Placeholder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bound of each per-PID byte pipe, in bytes.
    pub pipe_capacity: usize,
    /// How long the demuxer waits on a full per-PID pipe before dropping it.
    pub dispatch_timeout_ms: u64,
    /// Maximum bytes the muxer drains from a program per packetization chunk.
    pub chunk_size: usize,
    /// Stream id used when a program is PES-wrapped by the muxer.
    pub pes_stream_id: u8,
    pub crc_mode: CrcMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipe_capacity: 1 << 20,
            dispatch_timeout_ms: 1000,
            chunk_size: 16 * 1024,
            pes_stream_id: 0xBD,
            crc_mode: CrcMode::Computed,
        }
    }
}

impl Config {
    fn load() -> Self {
        let mut config = CONFIG_PATHS
            .iter()
            .find_map(|path| match Config::from_file(path) {
                Ok(config) => Some(config),
                Err(TsError::Io(_)) => None,
                Err(e) => {
                    log::warn!("ignoring {}: {}", path, e);
                    None
                }
            })
            .unwrap_or_default();
        config.apply_env();
        config
    }

    /// Reads a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overrides fields from `TSIO_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("TSIO_PIPE_CAPACITY") {
            self.pipe_capacity = v;
        }
        if let Some(v) = env_parse("TSIO_DISPATCH_TIMEOUT_MS") {
            self.dispatch_timeout_ms = v;
        }
        if let Some(v) = env_parse("TSIO_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Ok(v) = env::var("TSIO_PES_STREAM_ID") {
            let v = v.trim();
            let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16).ok(),
                None => v.parse().ok(),
            };
            if let Some(id) = parsed {
                self.pes_stream_id = id;
            }
        }
        if let Ok(v) = env::var("TSIO_CRC_MODE") {
            match v.trim().to_lowercase().as_str() {
                "computed" => self.crc_mode = CrcMode::Computed,
                "placeholder" => self.crc_mode = CrcMode::Placeholder,
                other => log::warn!("unknown TSIO_CRC_MODE {:?}", other),
            }
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Chunk size actually used for a program, never zero and never more than
    /// one PES unit can carry when `pes` is set.
    pub fn effective_chunk_size(&self, pes: bool) -> usize {
        let size = self.chunk_size.max(1);
        if pes {
            size.min(MAX_PES_CHUNK)
        } else {
            size
        }
    }

    /// Re-reads file and environment into the process-wide configuration.
    pub fn reload() {
        let new_config = Config::load();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Returns a copy of the process-wide configuration.
pub fn current() -> Config {
    CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("pipe_capacity = 4096\ncrc_mode = \"placeholder\"\n").unwrap();
        assert_eq!(config.pipe_capacity, 4096);
        assert_eq!(config.crc_mode, CrcMode::Placeholder);
        assert_eq!(config.chunk_size, Config::default().chunk_size);
        assert_eq!(config.pes_stream_id, 0xBD);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Config::from_toml("bogus = 1"),
            Err(TsError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("pipe_capacity = \"big\""),
            Err(TsError::Config(_))
        ));
    }

    #[test]
    fn test_effective_chunk_size() {
        let config = Config {
            chunk_size: 1 << 20,
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size(true), MAX_PES_CHUNK);
        assert_eq!(config.effective_chunk_size(false), 1 << 20);

        let config = Config {
            chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size(false), 1);
    }
}
