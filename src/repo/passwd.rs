//! src/repo/passwd.rs
//! Reversible obfuscation for passwords stored in config files (`passwdx`).
//! This is not encryption; it only keeps secrets from being read at a glance.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(String);

pub trait PasswordCodec {
    fn encode(&self, plain: &str) -> Result<String, CodecError>;
    fn decode(&self, stored: &str) -> Result<String, CodecError>;
}

/// bzip2-compressed, then base64: the format existing `.gbs.conf` files use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Bzip2;

impl PasswordCodec for Base64Bzip2 {
    fn encode(&self, plain: &str) -> Result<String, CodecError> {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(plain.as_bytes()).map_err(|e| CodecError(e.to_string()))?;
        let compressed = encoder.finish().map_err(|e| CodecError(e.to_string()))?;
        Ok(general_purpose::STANDARD.encode(compressed))
    }

    fn decode(&self, stored: &str) -> Result<String, CodecError> {
        let compressed = general_purpose::STANDARD
            .decode(stored.trim())
            .map_err(|e| CodecError(format!("invalid base64: {}", e)))?;
        let mut plain = String::new();
        BzDecoder::new(compressed.as_slice())
            .read_to_string(&mut plain)
            .map_err(|e| CodecError(e.to_string()))?;
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_what_it_encodes() {
        let codec = Base64Bzip2;
        let stored = codec.encode("s3cr:t@/").unwrap();
        assert_ne!(stored, "s3cr:t@/");
        assert_eq!(codec.decode(&stored).unwrap(), "s3cr:t@/");
    }

    #[test]
    fn rejects_bad_base64() {
        let err = Base64Bzip2.decode("not base64!").unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn rejects_data_that_is_not_bzip2() {
        let stored = general_purpose::STANDARD.encode(b"plain text");
        assert!(Base64Bzip2.decode(&stored).is_err());
    }
}
