//! C1 — raw DEFLATE (RFC 1951) compression, no zlib/gzip header.
//!
//! SMART Health Cards and Links both use `zip:"DEF"` to mean exactly this:
//! the payload/plaintext bytes run through raw DEFLATE before being placed
//! in the JWS/JWE, never the zlib-wrapped variant `flate2` also supports.

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use std::io::Read;

use crate::error::{Result, ShcError};

/// Raw-deflate `bytes`. Matches RFC 1951 with no zlib/gzip framing.
pub fn deflate_raw(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(bytes, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| ShcError::Compression(e.to_string()))?;
    Ok(out)
}

/// Inflate a raw-deflated buffer produced by [`deflate_raw`] (or any
/// RFC 1951 compliant encoder).
pub fn inflate_raw(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ShcError::Compression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let original = b"{\"iss\":\"https://issuer.example\",\"nbf\":1}".to_vec();
        let compressed = deflate_raw(&original).unwrap();
        let restored = inflate_raw(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn empty_input_round_trips() {
        let compressed = deflate_raw(&[]).unwrap();
        let restored = inflate_raw(&compressed).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn malformed_input_fails() {
        // Not a valid raw-deflate stream.
        let garbage = vec![0xffu8; 64];
        assert!(inflate_raw(&garbage).is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trip_prop(data: Vec<u8>) {
            let compressed = deflate_raw(&data).unwrap();
            let restored = inflate_raw(&compressed).unwrap();
            proptest::prop_assert_eq!(restored, data);
        }
    }
}
