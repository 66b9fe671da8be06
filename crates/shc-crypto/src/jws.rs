//! C3 — ES256 JWS sign/verify with RFC 7638 `kid` derivation and optional
//! raw-DEFLATE (`zip:"DEF"`) payload compression.
//!
//! Per spec §9's resolved Open Question, compression happens *before* the
//! compact form is signed: the signature covers the compressed payload
//! bytes, not the plaintext JSON.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compression::{deflate_raw, inflate_raw};
use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::{Result, ShcError};
use crate::jwk::public_jwk_with_kid;

/// Protected header for a SMART Health Card JWS (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwsProtectedHeader {
    pub alg: String,
    pub kid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

/// A parsed-but-not-yet-verified JWS: header and payload are available,
/// but callers must not trust them until [`verify`] succeeds.
pub struct UnverifiedJws {
    pub header: JwsProtectedHeader,
    pub payload: Value,
    header_b64: String,
    payload_b64: String,
    signature_b64: String,
}

fn split_compact(jws: &str) -> Result<(&str, &str, &str)> {
    let mut parts = jws.split('.');
    let header = parts.next().ok_or_else(|| ShcError::Jws("missing header segment".into()))?;
    let payload = parts.next().ok_or_else(|| ShcError::Jws("missing payload segment".into()))?;
    let signature = parts.next().ok_or_else(|| ShcError::Jws("missing signature segment".into()))?;
    if parts.next().is_some() {
        return Err(ShcError::Jws("compact JWS must have exactly 3 segments".into()));
    }
    Ok((header, payload, signature))
}

/// Sign `payload` (any serializable value — SMART Health Cards sign a
/// `ShcJwtPayload`) with `signing_key`, compressing first when
/// `enable_compression` is set (the default per §4.3).
#[tracing::instrument(skip(payload, signing_key), fields(enable_compression))]
pub fn sign(payload: &impl Serialize, signing_key: &SigningKey, enable_compression: bool) -> Result<String> {
    let jwk = public_jwk_with_kid(signing_key)?;
    let kid = jwk.kid.expect("public_jwk_with_kid always sets kid");

    let payload_json =
        serde_json::to_vec(payload).map_err(|e| ShcError::PayloadValidation(e.to_string()))?;

    let (payload_bytes, zip) = if enable_compression {
        (deflate_raw(&payload_json)?, Some("DEF".to_string()))
    } else {
        (payload_json, None)
    };

    let header = JwsProtectedHeader {
        alg: "ES256".to_string(),
        kid,
        zip,
    };
    let header_b64 = base64url_encode(
        &serde_json::to_vec(&header).map_err(|e| ShcError::Jws(e.to_string()))?,
    );
    let payload_b64 = base64url_encode(&payload_bytes);

    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = base64url_encode(&signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode header and payload without checking the signature. The result
/// MUST NOT be treated as trusted; it exists only to discover `iss`/`kid`
/// before a verifier key is available (§4.3 Parse-unverified).
pub fn parse_unverified(jws: &str) -> Result<UnverifiedJws> {
    let (header_b64, payload_b64, signature_b64) = split_compact(jws)?;

    let header_bytes = base64url_decode(header_b64)?;
    let header: JwsProtectedHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| ShcError::Jws(e.to_string()))?;

    let mut payload_bytes = base64url_decode(payload_b64)?;
    if header.zip.as_deref() == Some("DEF") {
        payload_bytes = inflate_raw(&payload_bytes)?;
    }
    let payload: Value =
        serde_json::from_slice(&payload_bytes).map_err(|e| ShcError::Jws(e.to_string()))?;

    Ok(UnverifiedJws {
        header,
        payload,
        header_b64: header_b64.to_string(),
        payload_b64: payload_b64.to_string(),
        signature_b64: signature_b64.to_string(),
    })
}

/// Verify `jws` against `public_key`. If `verify_expiration` is true (the
/// default) and the payload has an `exp` field, reject it when expired.
#[tracing::instrument(skip(jws, public_key), fields(verify_expiration))]
pub fn verify(jws: &str, public_key: &VerifyingKey, verify_expiration: bool) -> Result<Value> {
    let parsed = parse_unverified(jws)?;

    if parsed.header.alg != "ES256" {
        return Err(ShcError::Jws(format!("unsupported alg: {}", parsed.header.alg)));
    }

    let signing_input = format!("{}.{}", parsed.header_b64, parsed.payload_b64);
    let signature_bytes = base64url_decode(&parsed.signature_b64)?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| ShcError::Jws("malformed signature segment".into()))?;

    public_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| ShcError::SignatureVerification)?;

    if verify_expiration {
        if let Some(exp) = parsed.payload.get("exp").and_then(Value::as_i64) {
            let now = crate::now_seconds();
            if exp < now {
                return Err(ShcError::Expired);
            }
        }
    }

    Ok(parsed.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn key_pair() -> (SigningKey, VerifyingKey) {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        (signing_key, verifying_key)
    }

    #[test]
    fn round_trips_with_compression() {
        let (sk, vk) = key_pair();
        let payload = json!({"iss": "https://issuer.example", "nbf": 1700000000});
        let jws = sign(&payload, &sk, true).unwrap();
        let verified = verify(&jws, &vk, true).unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn round_trips_without_compression() {
        let (sk, vk) = key_pair();
        let payload = json!({"iss": "https://issuer.example", "nbf": 1});
        let jws = sign(&payload, &sk, false).unwrap();
        let header = parse_unverified(&jws).unwrap().header;
        assert!(header.zip.is_none());
        let verified = verify(&jws, &vk, true).unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let (sk, _vk) = key_pair();
        let (_sk2, vk2) = key_pair();
        let payload = json!({"iss": "https://issuer.example", "nbf": 1});
        let jws = sign(&payload, &sk, true).unwrap();
        let err = verify(&jws, &vk2, true).unwrap_err();
        assert_eq!(err.code(), "SignatureVerification");
    }

    #[test]
    fn expired_token_is_rejected_unless_disabled() {
        let (sk, vk) = key_pair();
        let payload = json!({"iss": "https://issuer.example", "nbf": 1, "exp": 1});
        let jws = sign(&payload, &sk, true).unwrap();
        assert_eq!(verify(&jws, &vk, true).unwrap_err().code(), "Expired");
        assert!(verify(&jws, &vk, false).is_ok());
    }

    #[test]
    fn kid_is_the_jwk_thumbprint() {
        let (sk, _vk) = key_pair();
        let payload = json!({"iss": "https://issuer.example", "nbf": 1});
        let jws = sign(&payload, &sk, true).unwrap();
        let header = parse_unverified(&jws).unwrap().header;
        let expected_jwk = public_jwk_with_kid(&sk).unwrap();
        assert_eq!(header.kid, expected_jwk.kid.unwrap());
    }

    #[test]
    fn malformed_compact_form_fails() {
        assert!(parse_unverified("not.a.valid.jws.form").is_err());
        assert!(parse_unverified("onlyonepart").is_err());
    }
}
