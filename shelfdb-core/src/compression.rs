//! Document byte-form compression. Codec tag is the first byte of every
//! stored document so a reader never has to consult out-of-band state to
//! know how to decode it.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const TAG_RAW: u8 = 0x00;
pub const TAG_FAST_STREAMING: u8 = 0x01;
pub const TAG_DEFLATE: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    None,
    FastStreaming,
    Deflate,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::FastStreaming
    }
}

impl Codec {
    pub fn encode(&self, raw: &[u8]) -> Result<(u8, Vec<u8>)> {
        match self {
            Codec::None => Ok((TAG_RAW, raw.to_vec())),
            Codec::FastStreaming => Ok((TAG_FAST_STREAMING, lz4_flex::compress_prepend_size(raw))),
            Codec::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(raw)
                    .map_err(|e| Error::Config(format!("deflate encode failed: {e}")))?;
                let payload = encoder
                    .finish()
                    .map_err(|e| Error::Config(format!("deflate encode failed: {e}")))?;
                Ok((TAG_DEFLATE, payload))
            }
        }
    }

    pub fn decode(tag: u8, payload: &[u8]) -> Result<Vec<u8>> {
        match tag {
            TAG_RAW => Ok(payload.to_vec()),
            TAG_FAST_STREAMING => lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| Error::Config(format!("fast-streaming decode failed: {e}"))),
            TAG_DEFLATE => {
                let mut decoder = DeflateDecoder::new(payload);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Config(format!("deflate decode failed: {e}")))?;
                Ok(out)
            }
            other => Err(Error::invalid_argument(format!(
                "unknown document codec tag {other:#04x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_codec_roundtrips() {
        let raw = b"the quick brown fox jumps over the lazy dog".repeat(4);
        for codec in [Codec::None, Codec::FastStreaming, Codec::Deflate] {
            let (tag, payload) = codec.encode(&raw).unwrap();
            let decoded = Codec::decode(tag, &payload).unwrap();
            assert_eq!(decoded, raw, "codec {codec:?} failed to roundtrip");
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Codec::decode(0xee, b"").is_err());
    }
}
