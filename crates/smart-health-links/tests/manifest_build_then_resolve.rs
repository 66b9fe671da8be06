//! Integration coverage for the manifest build -> resolve flow (C10/C11),
//! exercised only through the crate's public API, with the manifest
//! endpoint mocked over HTTP.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use shl::{
    AddOptions, BuildManifestOptions, GenerateOptions, ManifestBuilder, ManifestStorage, ResolveOptions,
    ShlViewer, Result, ShcError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct InMemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_id: Mutex<u64>,
}

impl InMemoryStorage {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ManifestStorage for InMemoryStorage {
    async fn upload_file(&self, content: &[u8]) -> Result<String> {
        let mut next_id = self.next_id.lock().unwrap();
        let path = format!("file-{next_id}");
        *next_id += 1;
        self.files.lock().unwrap().insert(path.clone(), content.to_vec());
        Ok(path)
    }

    async fn get_file_url(&self, path: &str) -> Result<String> {
        Ok(format!("https://storage.example/{path}"))
    }

    async fn load_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ShcError::ShlManifest(format!("no such file {path}")))
    }
}

#[tokio::test]
async fn built_manifest_resolves_back_to_the_embedded_fhir_resource() {
    let server = MockServer::start().await;

    let payload = shl::generate(GenerateOptions {
        base_manifest_url: server.uri(),
        manifest_path: "manifest.json".to_string(),
        flag: None,
        label: None,
        exp: None,
    })
    .unwrap();

    let mut builder = ManifestBuilder::new(Box::new(InMemoryStorage::new()), payload.key.clone());
    builder
        .add_fhir_resource(
            &serde_json::json!({"resourceType": "Patient", "id": "1"}),
            AddOptions { enable_compression: true },
        )
        .await
        .unwrap();

    let manifest = builder.build_manifest(BuildManifestOptions::default()).await.unwrap();
    assert_eq!(manifest.files.len(), 1);

    let manifest_url_path = url::Url::parse(&payload.url).unwrap().path().to_string();
    Mock::given(method("POST"))
        .and(path(manifest_url_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(&manifest))
        .mount(&server)
        .await;

    let viewer = ShlViewer::from_payload(payload);
    let resolved = viewer
        .resolve(ResolveOptions {
            recipient: "Dr Who".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(resolved.fhir_resources.len(), 1);
    assert_eq!(resolved.fhir_resources[0]["resourceType"], "Patient");
    assert!(resolved.smart_health_cards.is_empty());
}
