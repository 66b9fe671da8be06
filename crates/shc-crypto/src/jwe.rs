//! C4 — JWE direct encryption (`alg:"dir"`, `enc:"A256GCM"`) with a
//! mandatory `cty` header and optional raw-DEFLATE of the plaintext
//! before encryption.

use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::compression::{deflate_raw, inflate_raw};
use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::{Result, ShcError};

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;

/// Protected header for a SMART Health Link encrypted file (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JweProtectedHeader {
    pub alg: String,
    pub enc: String,
    pub cty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

pub struct Plaintext {
    pub data: Vec<u8>,
    pub content_type: String,
}

struct SingleUseNonce(Option<Nonce>);

impl NonceSequence for SingleUseNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0.take().ok_or(ring::error::Unspecified)
    }
}

fn decode_key(key_b64: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = base64url_decode(key_b64)?;
    if bytes.len() != KEY_LEN {
        return Err(ShcError::ShlEncryption(format!(
            "key must be {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Encrypt `plaintext` for `content_type` under the 32-byte base64url key
/// `key_b64`. Raw-deflates the plaintext first when `enable_compression`.
/// Returns the 5-segment compact JWE string.
#[tracing::instrument(skip(plaintext, key_b64), fields(content_type, plaintext_len = plaintext.len()))]
pub fn encrypt(
    plaintext: &[u8],
    content_type: &str,
    key_b64: &str,
    enable_compression: bool,
) -> Result<String> {
    let key_bytes = decode_key(key_b64)?;

    let (body, zip) = if enable_compression {
        (deflate_raw(plaintext)?, Some("DEF".to_string()))
    } else {
        (plaintext.to_vec(), None)
    };

    let header = JweProtectedHeader {
        alg: "dir".to_string(),
        enc: "A256GCM".to_string(),
        cty: content_type.to_string(),
        zip,
    };
    let header_b64 = base64url_encode(
        &serde_json::to_vec(&header).map_err(|e| ShcError::ShlEncryption(e.to_string()))?,
    );
    let aad = aead::Aad::from(header_b64.as_bytes());

    let mut iv = [0u8; IV_LEN];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| ShcError::ShlEncryption("failed to generate IV".into()))?;

    let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| ShcError::ShlEncryption("invalid AES-256-GCM key".into()))?;
    let nonce = Nonce::assume_unique_for_key(iv);
    let mut sealing_key = SealingKey::new(unbound, SingleUseNonce(Some(nonce)));

    let mut in_out = body;
    let tag = sealing_key
        .seal_in_place_separate_tag(aad, &mut in_out)
        .map_err(|_| ShcError::ShlEncryption("AES-GCM seal failed".into()))?;

    Ok(format!(
        "{header_b64}..{}.{}.{}",
        base64url_encode(&iv),
        base64url_encode(&in_out),
        base64url_encode(tag.as_ref())
    ))
}

/// Decrypt a compact JWE produced by [`encrypt`]. Returns the plaintext
/// and the declared `cty`; a missing `cty` header is a decryption error
/// per §4.4.
#[tracing::instrument(skip(jwe, key_b64))]
pub fn decrypt(jwe: &str, key_b64: &str) -> Result<Plaintext> {
    let key_bytes = decode_key(key_b64)?;

    let segments: Vec<&str> = jwe.split('.').collect();
    if segments.len() != 5 {
        return Err(ShcError::ShlDecryption(format!(
            "compact JWE must have 5 segments, got {}",
            segments.len()
        )));
    }
    let [header_b64, encrypted_key_b64, iv_b64, ciphertext_b64, tag_b64] = segments[..] else {
        unreachable!()
    };
    if !encrypted_key_b64.is_empty() {
        return Err(ShcError::ShlDecryption(
            "direct encryption requires an empty encrypted-key segment".into(),
        ));
    }

    let header_bytes = base64url_decode(header_b64)?;
    let header: JweProtectedHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| ShcError::ShlDecryption(e.to_string()))?;
    if header.alg != "dir" || header.enc != "A256GCM" {
        return Err(ShcError::ShlDecryption(format!(
            "unsupported alg/enc: {}/{}",
            header.alg, header.enc
        )));
    }
    if header.cty.is_empty() {
        return Err(ShcError::ShlDecryption("missing cty header".into()));
    }

    let iv_bytes = base64url_decode(iv_b64)?;
    let iv: [u8; IV_LEN] = iv_bytes
        .try_into()
        .map_err(|_| ShcError::ShlDecryption("IV must be 12 bytes".into()))?;

    let mut sealed = base64url_decode(ciphertext_b64)?;
    sealed.extend_from_slice(&base64url_decode(tag_b64)?);

    let aad = aead::Aad::from(header_b64.as_bytes());
    let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| ShcError::ShlDecryption("invalid AES-256-GCM key".into()))?;
    let nonce = Nonce::assume_unique_for_key(iv);
    let mut opening_key = OpeningKey::new(unbound, SingleUseNonce(Some(nonce)));

    let plaintext_slice = opening_key
        .open_in_place(aad, &mut sealed)
        .map_err(|_| ShcError::ShlDecryption("AES-GCM open failed".into()))?;

    let plaintext_bytes = if header.zip.as_deref() == Some("DEF") {
        inflate_raw(plaintext_slice)?
    } else {
        plaintext_slice.to_vec()
    };

    Ok(Plaintext {
        data: plaintext_bytes,
        content_type: header.cty,
    })
}

/// Generate a fresh 32-byte base64url key, for SHL entropy/key generation.
pub fn generate_key() -> Result<String> {
    let mut bytes = [0u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| ShcError::ShlEncryption("failed to generate key".into()))?;
    Ok(base64url_encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_round_trip_with_zero_key_and_compression() {
        let key = base64url_encode(&[0u8; KEY_LEN]);
        let plaintext = br#"{"resourceType":"Patient","id":"x"}"#;
        let jwe = encrypt(plaintext, "application/fhir+json", &key, true).unwrap();
        let decrypted = decrypt(&jwe, &key).unwrap();
        assert_eq!(decrypted.data, plaintext);
        assert_eq!(decrypted.content_type, "application/fhir+json");
    }

    #[test]
    fn round_trip_without_compression() {
        let key = generate_key().unwrap();
        let plaintext = b"hello world";
        let jwe = encrypt(plaintext, "application/smart-health-card", &key, false).unwrap();
        let decrypted = decrypt(&jwe, &key).unwrap();
        assert_eq!(decrypted.data, plaintext);
        assert_eq!(decrypted.content_type, "application/smart-health-card");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key = generate_key().unwrap();
        let other_key = generate_key().unwrap();
        let jwe = encrypt(b"secret", "application/fhir+json", &key, false).unwrap();
        assert!(decrypt(&jwe, &other_key).is_err());
    }

    #[test]
    fn compact_form_has_five_segments() {
        let key = generate_key().unwrap();
        let jwe = encrypt(b"x", "application/fhir+json", &key, false).unwrap();
        assert_eq!(jwe.split('.').count(), 5);
        // Encrypted-key segment is empty for direct encryption.
        let segments: Vec<&str> = jwe.split('.').collect();
        assert!(segments[1].is_empty());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let short_key = base64url_encode(&[0u8; 16]);
        assert!(encrypt(b"x", "application/fhir+json", &short_key, false).is_err());
    }
}
