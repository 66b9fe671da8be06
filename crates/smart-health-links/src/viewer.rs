//! C11 — the SHL viewer: resolves a parsed `ShlPayload` against its
//! manifest (or, for direct-file links, a single encrypted body) and
//! classifies the decrypted content into SMART Health Cards and FHIR
//! resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shc_crypto::error::{Result, ShcError};
use shc_crypto::jwe;
use shc::{Shc, ShcReader};

use crate::manifest::{FileDescriptor, ShlManifest};
use crate::payload::{self, ShlPayload};

const SHC_CONTENT_TYPE: &str = "application/smart-health-card";
const FHIR_CONTENT_TYPE: &str = "application/fhir+json";

/// Options for [`ShlViewer::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub recipient: String,
    pub passcode: Option<String>,
    pub embedded_length_max: Option<usize>,
    pub shc_reader: Option<ShcReaderChoice>,
}

/// Either an explicit reader or "build a default, JWKS-resolving one".
pub enum ShcReaderChoice {
    Explicit(ShcReader),
    Default,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedContent {
    pub manifest: Option<ShlManifest>,
    pub smart_health_cards: Vec<Shc>,
    pub fhir_resources: Vec<Value>,
}

#[derive(Serialize)]
struct ManifestRequest<'a> {
    recipient: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    passcode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "embeddedLengthMax")]
    embedded_length_max: Option<usize>,
}

#[derive(Deserialize)]
struct RawManifest {
    status: Option<String>,
    files: Vec<Value>,
    list: Option<Value>,
}

pub struct ShlViewer {
    payload: ShlPayload,
    client: reqwest::Client,
}

impl ShlViewer {
    pub fn new(shlink_uri: &str) -> Result<Self> {
        let payload = payload::parse(shlink_uri)?;
        Ok(Self {
            payload,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_payload(payload: ShlPayload) -> Self {
        Self {
            payload,
            client: reqwest::Client::new(),
        }
    }

    #[tracing::instrument(skip(self, options), fields(direct_file = payload::is_direct_file(&self.payload)))]
    pub async fn resolve(&self, options: ResolveOptions) -> Result<ResolvedContent> {
        if options.recipient.trim().is_empty() {
            return Err(ShcError::ShlViewer("recipient must be non-empty".into()));
        }
        if let Some(exp) = self.payload.exp {
            if exp < shc_crypto::now_seconds() {
                return Err(ShcError::ShlExpired);
            }
        }
        if payload::requires_passcode(&self.payload) && options.passcode.is_none() {
            return Err(ShcError::ShlInvalidPasscode);
        }

        tracing::debug!("resolving SMART Health Link");
        if payload::is_direct_file(&self.payload) {
            self.resolve_direct_file(&options).await
        } else {
            self.resolve_manifest(&options).await
        }
    }

    async fn resolve_direct_file(&self, options: &ResolveOptions) -> Result<ResolvedContent> {
        let url = format!(
            "{}?recipient={}",
            self.payload.url,
            urlencoding_encode(&options.recipient)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ShcError::ShlNetwork(e.to_string()))?;
        map_status_error(response.status().as_u16())?;
        let body = response.text().await.map_err(|e| ShcError::ShlNetwork(e.to_string()))?;

        let decrypted = jwe::decrypt(&body, &self.payload.key)?;
        let (smart_health_cards, fhir_resources) = self
            .classify(&decrypted.content_type, &decrypted.data, options)
            .await?;

        Ok(ResolvedContent {
            manifest: None,
            smart_health_cards,
            fhir_resources,
        })
    }

    async fn resolve_manifest(&self, options: &ResolveOptions) -> Result<ResolvedContent> {
        let request = ManifestRequest {
            recipient: &options.recipient,
            passcode: options.passcode.as_deref(),
            embedded_length_max: options.embedded_length_max,
        };
        let response = self
            .client
            .post(&self.payload.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ShcError::ShlNetwork(e.to_string()))?;
        map_status_error(response.status().as_u16())?;

        let raw: RawManifest = response
            .json()
            .await
            .map_err(|e| ShcError::ShlManifest(format!("malformed manifest body: {e}")))?;

        let mut descriptors = Vec::with_capacity(raw.files.len());
        let mut smart_health_cards = Vec::new();
        let mut fhir_resources = Vec::new();

        for file in &raw.files {
            let descriptor = parse_descriptor(file)?;
            let jwe_str = match &descriptor {
                FileDescriptor::Embedded { embedded, .. } => embedded.clone(),
                FileDescriptor::Location { location, .. } => {
                    url::Url::parse(location)
                        .map_err(|e| ShcError::ShlManifest(format!("invalid location URL: {e}")))?;
                    self.client
                        .get(location)
                        .send()
                        .await
                        .map_err(|e| ShcError::ShlNetwork(e.to_string()))?
                        .text()
                        .await
                        .map_err(|e| ShcError::ShlNetwork(e.to_string()))?
                }
            };

            let declared_content_type = match &descriptor {
                FileDescriptor::Embedded { content_type, .. } => content_type.clone(),
                FileDescriptor::Location { content_type, .. } => content_type.clone(),
            };

            let decrypted = jwe::decrypt(&jwe_str, &self.payload.key)?;
            if decrypted.content_type != declared_content_type {
                return Err(ShcError::ShlManifest(format!(
                    "descriptor declared contentType {declared_content_type} but JWE cty was {}",
                    decrypted.content_type
                )));
            }

            let (cards, resources) = self.classify(&decrypted.content_type, &decrypted.data, options).await?;
            smart_health_cards.extend(cards);
            fhir_resources.extend(resources);
            descriptors.push(descriptor);
        }

        Ok(ResolvedContent {
            manifest: Some(ShlManifest {
                status: raw.status,
                files: descriptors,
                list: raw.list,
            }),
            smart_health_cards,
            fhir_resources,
        })
    }

    async fn classify(
        &self,
        content_type: &str,
        data: &[u8],
        options: &ResolveOptions,
    ) -> Result<(Vec<Shc>, Vec<Value>)> {
        let json: Value = serde_json::from_slice(data)
            .map_err(|e| ShcError::ShlInvalidContent(format!("decrypted body is not JSON: {e}")))?;

        let is_shc = content_type == SHC_CONTENT_TYPE
            || (content_type.is_empty() && json.get("verifiableCredential").is_some());
        let is_fhir = content_type == FHIR_CONTENT_TYPE
            || (content_type.is_empty() && json.get("resourceType").is_some());

        if is_shc {
            let jws_list = json["verifiableCredential"]
                .as_array()
                .ok_or_else(|| ShcError::ShlInvalidContent("missing verifiableCredential array".into()))?;
            let default_reader = ShcReader::default();
            let reader = match &options.shc_reader {
                Some(ShcReaderChoice::Explicit(explicit)) => explicit,
                _ => &default_reader,
            };
            let mut cards = Vec::with_capacity(jws_list.len());
            for jws in jws_list {
                let jws = jws
                    .as_str()
                    .ok_or_else(|| ShcError::ShlInvalidContent("verifiableCredential entry is not a string".into()))?;
                cards.push(reader.from_jws(jws).await?);
            }
            Ok((cards, Vec::new()))
        } else if is_fhir {
            if json.get("resourceType").is_none() {
                return Err(ShcError::ShlInvalidContent("FHIR resource missing resourceType".into()));
            }
            Ok((Vec::new(), vec![json]))
        } else {
            Err(ShcError::ShlInvalidContent(format!(
                "cannot classify content with type \"{content_type}\""
            )))
        }
    }
}

fn parse_descriptor(value: &Value) -> Result<FileDescriptor> {
    let content_type = value
        .get("contentType")
        .and_then(Value::as_str)
        .ok_or_else(|| ShcError::ShlManifest("descriptor missing contentType".into()))?;
    if content_type != SHC_CONTENT_TYPE && content_type != FHIR_CONTENT_TYPE {
        return Err(ShcError::ShlManifest(format!("unsupported contentType {content_type}")));
    }

    let embedded = value.get("embedded").and_then(Value::as_str);
    let location = value.get("location").and_then(Value::as_str);
    let last_updated = value.get("lastUpdated").and_then(Value::as_str).map(str::to_string);

    match (embedded, location) {
        (Some(embedded), None) => Ok(FileDescriptor::Embedded {
            content_type: content_type.to_string(),
            embedded: embedded.to_string(),
            last_updated,
        }),
        (None, Some(location)) => Ok(FileDescriptor::Location {
            content_type: content_type.to_string(),
            location: location.to_string(),
            last_updated,
        }),
        _ => Err(ShcError::ShlManifest(
            "descriptor must have exactly one of embedded/location".into(),
        )),
    }
}

fn map_status_error(status: u16) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        401 => Err(ShcError::ShlInvalidPasscode),
        404 => Err(ShcError::ShlManifestNotFound),
        429 => Err(ShcError::ShlManifestRateLimit),
        other => Err(ShcError::ShlNetwork(format!("unexpected status {other}"))),
    }
}

fn urlencoding_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
