//! C8 — the high-level `ShcIssuer` / `ShcReader` / `Shc` facade tying
//! bundle processing (C5), verifiable credentials (C6), JWS (C3) and QR
//! chunking (C7) into the two operations callers actually want:
//! issue a card, and read one back.

use p256::ecdsa::{SigningKey, VerifyingKey};
use serde_json::{json, Value};
use shc_crypto::error::{Result, ShcError};
use shc_crypto::jws;

use crate::bundle;
use crate::qr::{self, ErrorCorrectionLevel};
use crate::vc;

/// MIME type for a `.smart-health-card` file, per §4.8.
pub const SHC_FILE_MIME: &str = "application/smart-health-card";

/// Options controlling how a bundle is turned into a verifiable
/// credential at issuance time.
#[derive(Debug, Clone, Default)]
pub struct VcOptions {
    pub fhir_version: Option<String>,
    pub additional_types: Vec<String>,
}

/// Issues SMART Health Cards from FHIR Bundles.
pub struct ShcIssuer {
    pub issuer: String,
    pub private_key: SigningKey,
    pub public_key: VerifyingKey,
    pub expiration_time: Option<i64>,
    pub enable_qr_optimization: bool,
    pub strict_references: bool,
}

impl ShcIssuer {
    pub fn new(issuer: impl Into<String>, private_key: SigningKey) -> Self {
        let public_key = VerifyingKey::from(&private_key);
        Self {
            issuer: issuer.into(),
            private_key,
            public_key,
            expiration_time: None,
            enable_qr_optimization: true,
            strict_references: true,
        }
    }

    /// Process `bundle`, build and validate the verifiable credential,
    /// assemble the JWT payload, and sign it (compression is always on
    /// for issuance, per §4.3).
    #[tracing::instrument(skip(self, bundle, vc_options), fields(issuer = %self.issuer))]
    pub fn issue(&self, bundle: &Value, vc_options: VcOptions) -> Result<Shc> {
        let processed = if self.enable_qr_optimization {
            bundle::optimize_for_qr(bundle, self.strict_references)?
        } else {
            bundle::standardize(bundle)?
        };

        let vc_claim = vc::build(
            processed,
            vc_options.fhir_version.as_deref(),
            &vc_options.additional_types,
        );
        vc::validate(&vc_claim)?;

        let now = shc_crypto::now_seconds();
        let mut payload = json!({
            "iss": self.issuer,
            "nbf": now,
            "vc": vc_claim,
        });
        if let Some(exp) = self.expiration_time {
            payload["exp"] = json!(exp);
        }

        let jws = jws::sign(&payload, &self.private_key, true)?;
        tracing::debug!(jws_len = jws.len(), "issued SMART Health Card");

        Ok(Shc {
            jws,
            original_bundle: bundle.clone(),
        })
    }
}

/// Resolves a verifier key for an issuer-signed JWS, either from a
/// caller-supplied key or by fetching the issuer's JWKS document.
#[async_trait::async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<VerifyingKey>;
}

/// Fetches `{issuer}/.well-known/jwks.json` and selects the key whose
/// `kid` matches, per §4.8.
pub struct JwksKeyResolver {
    client: reqwest::Client,
}

impl Default for JwksKeyResolver {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self, issuer: &str, kid: &str) -> Result<VerifyingKey> {
        let url = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ShcError::ReaderConfig(format!("failed to fetch {url}: {e}")))?;
        let jwks: shc_crypto::jwk::Jwks = response
            .json()
            .await
            .map_err(|e| ShcError::ReaderConfig(format!("malformed JWKS at {url}: {e}")))?;
        let jwk = jwks
            .keys
            .into_iter()
            .find(|k| k.kid.as_deref() == Some(kid))
            .ok_or_else(|| ShcError::ReaderConfig(format!("no key with kid {kid} in JWKS at {url}")))?;
        jwk.to_verifying_key()
    }
}

/// Reads and verifies SMART Health Cards.
pub struct ShcReader {
    pub public_key: Option<VerifyingKey>,
    pub enable_qr_optimization: bool,
    pub strict_references: bool,
    pub verify_expiration: bool,
    pub key_resolver: Option<Box<dyn KeyResolver>>,
}

impl Default for ShcReader {
    fn default() -> Self {
        Self {
            public_key: None,
            enable_qr_optimization: true,
            strict_references: true,
            verify_expiration: true,
            key_resolver: Some(Box::new(JwksKeyResolver::default())),
        }
    }
}

impl ShcReader {
    pub fn with_public_key(public_key: VerifyingKey) -> Self {
        Self {
            public_key: Some(public_key),
            ..Self::default()
        }
    }

    /// Verify `jws` and return the `Shc` wrapping its (re-validated)
    /// original bundle.
    #[tracing::instrument(skip(self, jws), fields(verify_expiration = self.verify_expiration))]
    pub async fn from_jws(&self, jws: &str) -> Result<Shc> {
        let public_key = self.resolve_key(jws).await?;
        let payload = shc_crypto::jws::verify(jws, &public_key, self.verify_expiration)?;

        let vc_claim = payload
            .get("vc")
            .ok_or_else(|| ShcError::PayloadValidation("missing vc claim".into()))?;
        vc::validate(vc_claim)?;

        let fhir_bundle = vc_claim["credentialSubject"]["fhirBundle"].clone();
        if self.enable_qr_optimization {
            bundle::optimize_for_qr(&fhir_bundle, self.strict_references)?;
        } else {
            bundle::validate(&fhir_bundle)?;
        }

        tracing::debug!(bundle_entries = fhir_bundle["entry"].as_array().map(Vec::len).unwrap_or(0), "verified SMART Health Card");

        Ok(Shc {
            jws: jws.to_string(),
            original_bundle: fhir_bundle,
        })
    }

    async fn resolve_key(&self, jws: &str) -> Result<VerifyingKey> {
        if let Some(key) = &self.public_key {
            return Ok(*key);
        }
        let unverified = shc_crypto::jws::parse_unverified(jws)?;
        let issuer = unverified
            .payload
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| ShcError::ReaderConfig("JWS payload has no iss claim".into()))?;
        let resolver: &dyn KeyResolver = match &self.key_resolver {
            Some(resolver) => resolver.as_ref(),
            None => {
                return Err(ShcError::ReaderConfig(
                    "no public key configured and no key resolver available".into(),
                ))
            }
        };
        resolver.resolve(issuer, &unverified.header.kid).await
    }

    /// Parse a `.smart-health-card` file's JSON content, taking the
    /// first `verifiableCredential` entry.
    pub async fn from_file_content(&self, content: &str) -> Result<Shc> {
        let parsed: Value = serde_json::from_str(content)
            .map_err(|e| ShcError::FileFormat(format!("invalid JSON: {e}")))?;
        let jws = parsed["verifiableCredential"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ShcError::FileFormat("missing verifiableCredential[0]".into()))?;
        self.from_jws(jws).await
    }

    pub async fn from_file_blob(&self, blob: &[u8]) -> Result<Shc> {
        let content = std::str::from_utf8(blob)
            .map_err(|e| ShcError::FileFormat(format!("blob is not valid UTF-8: {e}")))?;
        self.from_file_content(content).await
    }

    /// Decode one or more `shc:/...` QR numeric strings, then verify.
    pub async fn from_qr_numeric(&self, parts: &[String]) -> Result<Shc> {
        let jws = qr::decode_qr(parts)?;
        self.from_jws(&jws).await
    }
}

/// A projection options bag for [`Shc::as_bundle`].
#[derive(Debug, Clone, Default)]
pub struct BundleProjectionOptions {
    pub optimize_for_qr: Option<bool>,
    pub strict_references: Option<bool>,
}

/// A verified (or about-to-be-issued) SMART Health Card: the signed JWS
/// plus the original, unprocessed Bundle it was built from.
#[derive(Debug, Clone)]
pub struct Shc {
    jws: String,
    original_bundle: Value,
}

impl Shc {
    pub fn as_jws(&self) -> &str {
        &self.jws
    }

    pub fn as_bundle(&self, options: BundleProjectionOptions) -> Result<Value> {
        if options.optimize_for_qr.unwrap_or(false) {
            bundle::optimize_for_qr(&self.original_bundle, options.strict_references.unwrap_or(true))
        } else {
            bundle::standardize(&self.original_bundle)
        }
    }

    pub fn as_qr_numeric(&self, level: ErrorCorrectionLevel, enable_chunking: bool) -> Result<Vec<String>> {
        qr::chunk_jws(&self.jws, qr::max_single_qr_size(level), enable_chunking)
    }

    pub fn as_qr(&self, level: ErrorCorrectionLevel, enable_chunking: bool) -> Result<Vec<String>> {
        let chunks = self.as_qr_numeric(level, enable_chunking)?;
        qr::render_qr_svgs(&chunks, level)
    }

    pub fn as_file_content(&self) -> Result<String> {
        serde_json::to_string(&json!({"verifiableCredential": [self.jws]}))
            .map_err(|e| ShcError::FileFormat(e.to_string()))
    }

    pub fn as_file_blob(&self) -> Result<Vec<u8>> {
        Ok(self.as_file_content()?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn sample_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {
                    "fullUrl": "resource:0",
                    "resource": {"resourceType": "Patient", "id": "pat-1", "name": [{"family": "Doe"}]}
                }
            ]
        })
    }

    fn issuer() -> ShcIssuer {
        let signing_key = SigningKey::random(&mut OsRng);
        ShcIssuer::new("https://issuer.example", signing_key)
    }

    #[tokio::test]
    async fn issue_then_read_round_trip() {
        let issuer = issuer();
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        assert!(!shc.as_jws().is_empty());

        let reader = ShcReader::with_public_key(issuer.public_key);
        let read_back = reader.from_jws(shc.as_jws()).await.unwrap();
        assert_eq!(read_back.original_bundle["resourceType"], "Bundle");
    }

    #[tokio::test]
    async fn file_content_round_trip() {
        let issuer = issuer();
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        let content = shc.as_file_content().unwrap();
        assert!(content.contains("verifiableCredential"));

        let reader = ShcReader::with_public_key(issuer.public_key);
        let read_back = reader.from_file_content(&content).await.unwrap();
        assert_eq!(read_back.as_jws(), shc.as_jws());
    }

    #[tokio::test]
    async fn qr_numeric_round_trip() {
        let issuer = issuer();
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        let chunks = shc.as_qr_numeric(ErrorCorrectionLevel::L, true).unwrap();

        let reader = ShcReader::with_public_key(issuer.public_key);
        let read_back = reader.from_qr_numeric(&chunks).await.unwrap();
        assert_eq!(read_back.as_jws(), shc.as_jws());
    }

    #[tokio::test]
    async fn tampered_bundle_is_rejected_by_signature() {
        let issuer = issuer();
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        let mut tampered = shc.as_jws().to_string();
        tampered.push('x');

        let reader = ShcReader::with_public_key(issuer.public_key);
        let err = reader.from_jws(&tampered).await.unwrap_err();
        assert_eq!(err.code(), "SignatureVerification");
    }

    #[tokio::test]
    async fn reader_without_key_or_resolver_fails_config() {
        let issuer = issuer();
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        let reader = ShcReader {
            key_resolver: None,
            ..ShcReader::default()
        };
        let err = reader.from_jws(shc.as_jws()).await.unwrap_err();
        assert_eq!(err.code(), "ReaderConfig");
    }

    #[tokio::test]
    async fn reader_default_resolves_keys_via_jwks() {
        let reader = ShcReader::default();
        assert!(reader.public_key.is_none());
        assert!(reader.key_resolver.is_some());
    }

    #[tokio::test]
    async fn expired_card_is_rejected() {
        let mut issuer = issuer();
        issuer.expiration_time = Some(1);
        let shc = issuer.issue(&sample_bundle(), VcOptions::default()).unwrap();
        let reader = ShcReader::with_public_key(issuer.public_key);
        let err = reader.from_jws(shc.as_jws()).await.unwrap_err();
        assert_eq!(err.code(), "Expired");
    }
}
