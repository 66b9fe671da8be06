//! Minimal JWK support for EC P-256 keys: just enough to derive an RFC
//! 7638 thumbprint `kid` and to parse/emit `.well-known/jwks.json`
//! documents. This is a supplemented feature (`spec.md` assumes JWK
//! handling exists but leaves its shape implicit; see SPEC_FULL.md §C.2).

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::base64url_encode;
use crate::error::{Result, ShcError};

/// An EC public JWK, restricted to the P-256 curve SMART Health Cards use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Revocation-list generation this key is current as of. Not part of
    /// the RFC 7638 thumbprint input (`thumbprint()` below stays limited
    /// to `crv`/`kty`/`x`/`y`); used by directory de-duplication (§4.12).
    #[serde(rename = "crlVersion", skip_serializing_if = "Option::is_none")]
    pub crl_version: Option<u64>,
}

/// A `{keys: [...]}` JWKS document, per §4.12/§6 issuer discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<EcPublicJwk>,
}

impl EcPublicJwk {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let x = base64url_encode(point.x().expect("uncompressed point has x"));
        let y = base64url_encode(point.y().expect("uncompressed point has y"));
        EcPublicJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x,
            y,
            kid: None,
            key_use: Some("sig".to_string()),
            alg: Some("ES256".to_string()),
            crl_version: None,
        }
    }

    /// RFC 7638 JWK thumbprint: base64url(SHA-256(canonical JSON with
    /// lexicographically-sorted member names and no insignificant
    /// whitespace)).
    pub fn thumbprint(&self) -> Result<String> {
        let canonical = format!(
            "{{\"crv\":\"{}\",\"kty\":\"{}\",\"x\":\"{}\",\"y\":\"{}\"}}",
            self.crv, self.kty, self.x, self.y
        );
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(base64url_encode(&digest))
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(ShcError::Jws(format!(
                "unsupported JWK kty/crv: {}/{}",
                self.kty, self.crv
            )));
        }
        let x = crate::encoding::base64url_decode(&self.x)?;
        let y = crate::encoding::base64url_decode(&self.y)?;
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|e| ShcError::Jws(format!("invalid EC public key: {e}")))
    }
}

/// Derive the public [`EcPublicJwk`] (with `kid` populated) from a signing key.
pub fn public_jwk_with_kid(signing_key: &SigningKey) -> Result<EcPublicJwk> {
    let verifying_key = VerifyingKey::from(signing_key);
    let mut jwk = EcPublicJwk::from_verifying_key(&verifying_key);
    jwk.kid = Some(jwk.thumbprint()?);
    Ok(jwk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn thumbprint_is_deterministic() {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let jwk = EcPublicJwk::from_verifying_key(&verifying_key);
        let t1 = jwk.thumbprint().unwrap();
        let t2 = jwk.thumbprint().unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn jwk_round_trips_through_sec1() {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let jwk = EcPublicJwk::from_verifying_key(&verifying_key);
        let restored = jwk.to_verifying_key().unwrap();
        assert_eq!(restored, verifying_key);
    }

    #[test]
    fn jwks_document_round_trips_through_json() {
        let signing_key = SigningKey::random(&mut OsRng);
        let jwk = public_jwk_with_kid(&signing_key).unwrap();
        let doc = Jwks { keys: vec![jwk] };
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: Jwks = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.keys.len(), 1);
        assert!(parsed.keys[0].kid.is_some());
    }
}
