use std::io;

use bytes::Bytes;
use serde::Deserialize;

/// Compression applied to payloads before they are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Compression {
    /// Payloads are stored as they are.
    #[default]
    None,
    /// Payloads are compressed with zstd at the given level.
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_zstd_level() -> i32 {
    zstd::DEFAULT_COMPRESSION_LEVEL
}

impl Compression {
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zstd { .. } => "zstd",
        }
    }

    /// Compresses a payload for storage.
    pub fn compress(&self, payload: Bytes) -> io::Result<Bytes> {
        match self {
            Compression::None => Ok(payload),
            Compression::Zstd { level } => {
                let compressed = zstd::bulk::compress(&payload, *level)?;
                metric!(
                    histogram("deltacache.compression.ratio") =
                        compressed.len() as f64 / payload.len().max(1) as f64,
                    "type" => "zstd"
                );
                Ok(compressed.into())
            }
        }
    }

    /// Restores a payload that was compressed with [`compress`](Self::compress).
    pub fn decompress(&self, stored: &Bytes) -> io::Result<Bytes> {
        match self {
            Compression::None => Ok(stored.clone()),
            Compression::Zstd { .. } => Ok(zstd::stream::decode_all(&stored[..])?.into()),
        }
    }
}
