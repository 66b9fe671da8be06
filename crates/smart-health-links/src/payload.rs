//! C9 — SHLink payload encoding/decoding and flag semantics.

use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shc_crypto::encoding::{base64url_decode, base64url_encode};
use shc_crypto::error::{Result, ShcError};
use url::Url;

const ENTROPY_LEN: usize = 32;
const KEY_LEN: usize = 32;
const MAX_LABEL_LEN: usize = 80;

static KEY_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").expect("static regex"));

/// The decoded payload embedded in a `shlink:/...` URI (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShlPayload {
    pub url: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
}

/// Options for [`generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub base_manifest_url: String,
    pub manifest_path: String,
    pub flag: Option<String>,
    pub label: Option<String>,
    pub exp: Option<i64>,
}

fn random_base64url(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64url_encode(&bytes)
}

/// Join `base`, `entropy` and `manifest_path` such that the
/// second-to-last path segment of the result is `entropy`.
fn join_manifest_url(base: &str, entropy: &str, manifest_path: &str) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| ShcError::ShlFormat(format!("invalid baseManifestURL: {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ShcError::ShlFormat("baseManifestURL cannot be a base for relative URLs".into()))?;
        segments.pop_if_empty();
        segments.push(entropy);
        segments.push(manifest_path.trim_start_matches('/'));
    }
    Ok(url.to_string())
}

/// Validate an [`ShlPayload`] against the §3 constraints.
pub fn validate(payload: &ShlPayload) -> Result<()> {
    let url = Url::parse(&payload.url).map_err(|e| ShcError::ShlFormat(format!("invalid url: {e}")))?;
    if url.scheme() != "https" {
        return Err(ShcError::ShlFormat("url must use https".into()));
    }
    if !KEY_SHAPE.is_match(&payload.key) {
        return Err(ShcError::ShlFormat(
            "key must be exactly 43 base64url characters".into(),
        ));
    }
    if let Some(label) = &payload.label {
        if label.chars().count() > MAX_LABEL_LEN {
            return Err(ShcError::ShlFormat(format!(
                "label must be at most {MAX_LABEL_LEN} characters"
            )));
        }
    }
    if let Some(flag) = &payload.flag {
        if flag.is_empty() || !flag.chars().all(|c| matches!(c, 'L' | 'P' | 'U')) {
            return Err(ShcError::ShlFormat(
                "flag must be a non-empty subset of {L,P,U}".into(),
            ));
        }
        let order: Vec<char> = "LPU".chars().filter(|c| flag.contains(*c)).collect();
        let ordered: String = order.into_iter().collect();
        if ordered != *flag {
            return Err(ShcError::ShlFormat("flag letters must appear in L, P, U order".into()));
        }
    }
    if let Some(v) = payload.v {
        if v != 1 {
            return Err(ShcError::ShlFormat("v must be 1 when present".into()));
        }
    }
    Ok(())
}

/// Generate a fresh `ShlPayload` with random entropy and key, per §4.9.
pub fn generate(options: GenerateOptions) -> Result<ShlPayload> {
    let entropy = random_base64url(ENTROPY_LEN);
    debug_assert_eq!(entropy.len(), 43);
    let url = join_manifest_url(&options.base_manifest_url, &entropy, &options.manifest_path)?;
    let key = random_base64url(KEY_LEN);

    let payload = ShlPayload {
        url,
        key,
        exp: options.exp,
        flag: options.flag,
        label: options.label,
        v: None,
    };
    validate(&payload)?;
    Ok(payload)
}

/// Serialise to the `shlink:/...` URI form.
pub fn to_uri(payload: &ShlPayload) -> Result<String> {
    let json = serde_json::to_vec(payload).map_err(|e| ShcError::ShlFormat(e.to_string()))?;
    Ok(format!("shlink:/{}", base64url_encode(&json)))
}

/// Parse a `shlink:/...` URI, or one with a `#shlink:/...` fragment.
pub fn parse(uri: &str) -> Result<ShlPayload> {
    let stripped = match uri.find("#shlink:/") {
        Some(pos) => &uri[pos + 1..],
        None => uri,
    };
    let encoded = stripped
        .strip_prefix("shlink:/")
        .ok_or_else(|| ShcError::ShlFormat("missing shlink:/ prefix".into()))?;
    let json = base64url_decode(encoded)?;
    let payload: ShlPayload =
        serde_json::from_slice(&json).map_err(|e| ShcError::ShlFormat(format!("invalid payload JSON: {e}")))?;
    validate(&payload)?;
    Ok(payload)
}

pub fn requires_passcode(payload: &ShlPayload) -> bool {
    payload.flag.as_deref().is_some_and(|f| f.contains('P'))
}

pub fn is_long_term(payload: &ShlPayload) -> bool {
    payload.flag.as_deref().is_some_and(|f| f.contains('L'))
}

pub fn is_direct_file(payload: &ShlPayload) -> bool {
    payload.flag.as_deref().is_some_and(|f| f.contains('U'))
}

/// The 43-char base64url segment identifying this SHL, taken from the
/// parent path segment of `url`.
pub fn manifest_id(payload: &ShlPayload) -> Result<String> {
    let url = Url::parse(&payload.url).map_err(|e| ShcError::ShlFormat(format!("invalid url: {e}")))?;
    let segments: Vec<&str> = url
        .path_segments()
        .ok_or_else(|| ShcError::ShlFormat("url has no path segments".into()))?
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return Err(ShcError::ShlFormat("url does not contain a manifest id segment".into()));
    }
    let id = segments[segments.len() - 2];
    if !KEY_SHAPE.is_match(id) {
        return Err(ShcError::ShlFormat(format!(
            "manifest id segment \"{id}\" is not 43 base64url characters"
        )));
    }
    Ok(id.to_string())
}
