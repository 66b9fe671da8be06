//! C12 — an immutable in-memory directory of issuer keys and CRLs,
//! built either from a published snapshot or by fetching a list of
//! issuer URLs.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shc_crypto::error::{Result, ShcError};
use shc_crypto::jwk::EcPublicJwk;

/// A certificate revocation list for one issuer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerCrl {
    pub kid: String,
    pub ctr: u64,
    #[serde(default)]
    pub rids: Vec<String>,
}

/// Keys and CRLs published by one issuer, post-merge.
#[derive(Debug, Clone, Default)]
pub struct IssuerRecord {
    pub keys: Vec<EcPublicJwk>,
    pub crls: Vec<IssuerCrl>,
}

/// A parsed CRL with its `rid` set split out from optional timestamps,
/// per the `"rid[.timestamp]"` wire encoding.
#[derive(Debug, Clone)]
pub struct ParsedCrl {
    pub kid: String,
    pub ctr: u64,
    pub rids: HashSet<String>,
    pub rid_timestamps: HashMap<String, String>,
}

fn parse_rids(raw: &[String]) -> (HashSet<String>, HashMap<String, String>) {
    let mut rids = HashSet::with_capacity(raw.len());
    let mut timestamps = HashMap::new();
    for entry in raw {
        match entry.split_once('.') {
            Some((rid, timestamp)) => {
                rids.insert(rid.to_string());
                timestamps.insert(rid.to_string(), timestamp.to_string());
            }
            None => {
                rids.insert(entry.clone());
            }
        }
    }
    (rids, timestamps)
}

impl IssuerCrl {
    pub fn parsed(&self) -> ParsedCrl {
        let (rids, rid_timestamps) = parse_rids(&self.rids);
        ParsedCrl {
            kid: self.kid.clone(),
            ctr: self.ctr,
            rids,
            rid_timestamps,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotIssuerInfo {
    issuer: SnapshotIssuer,
    #[serde(default)]
    keys: Vec<EcPublicJwk>,
    #[serde(default)]
    crls: Vec<IssuerCrl>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotIssuer {
    iss: String,
}

/// A published directory snapshot, per §4.12.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(rename = "issuerInfo")]
    issuer_info: Vec<SnapshotIssuerInfo>,
}

/// Immutable map of `iss -> {keys, crls}`.
pub struct Directory {
    records: HashMap<String, IssuerRecord>,
}

impl Directory {
    pub fn by_iss(&self, iss: &str) -> Option<&IssuerRecord> {
        self.records.get(iss)
    }

    /// Build a directory from a published snapshot, merging duplicate
    /// `iss` entries and de-duplicating keys/CRLs as described in §4.12.
    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        let mut merged: HashMap<String, (Vec<EcPublicJwk>, Vec<IssuerCrl>)> = HashMap::new();
        for info in snapshot.issuer_info {
            let entry = merged.entry(info.issuer.iss).or_default();
            entry.0.extend(info.keys);
            entry.1.extend(info.crls);
        }

        let mut records = HashMap::with_capacity(merged.len());
        for (iss, (keys, crls)) in merged {
            records.insert(iss, IssuerRecord { keys: dedupe_keys(keys), crls: dedupe_crls(crls) });
        }
        Self { records }
    }

    /// Build a directory by fetching `.well-known/jwks.json` and then
    /// per-key `.well-known/crl/<kid>.json` for each issuer URL.
    /// Individual fetch failures skip that element without aborting.
    pub async fn from_issuer_urls(client: &reqwest::Client, issuers: &[String]) -> Self {
        let mut records = HashMap::with_capacity(issuers.len());
        for iss in issuers {
            let record = fetch_issuer_record(client, iss).await;
            records.insert(iss.clone(), record);
        }
        Self { records }
    }
}

async fn fetch_issuer_record(client: &reqwest::Client, iss: &str) -> IssuerRecord {
    let jwks_url = format!("{}/.well-known/jwks.json", iss.trim_end_matches('/'));
    let keys: Vec<EcPublicJwk> = match client.get(&jwks_url).send().await {
        Ok(response) => match response.json::<shc_crypto::jwk::Jwks>().await {
            Ok(jwks) => jwks.keys,
            Err(_) => Vec::new(),
        },
        Err(_) => Vec::new(),
    };

    let mut crls = Vec::with_capacity(keys.len());
    for key in &keys {
        let Some(kid) = &key.kid else { continue };
        let crl_url = format!("{}/.well-known/crl/{kid}.json", iss.trim_end_matches('/'));
        if let Ok(response) = client.get(&crl_url).send().await {
            if let Ok(crl) = response.json::<IssuerCrl>().await {
                crls.push(crl);
            }
        }
    }

    IssuerRecord { keys: dedupe_keys(keys), crls: dedupe_crls(crls) }
}

/// Keep, per `kid`, the key with the highest `crlVersion` (a key with no
/// `crlVersion` is treated as older than any key that has one).
fn dedupe_keys(keys: Vec<EcPublicJwk>) -> Vec<EcPublicJwk> {
    let mut best: HashMap<String, EcPublicJwk> = HashMap::new();
    for key in keys {
        let Some(kid) = key.kid.clone() else { continue };
        match best.get(&kid) {
            Some(existing) if existing.crl_version >= key.crl_version => {}
            _ => {
                best.insert(kid, key);
            }
        }
    }
    best.into_values().collect()
}

fn dedupe_crls(crls: Vec<IssuerCrl>) -> Vec<IssuerCrl> {
    let mut best: HashMap<String, IssuerCrl> = HashMap::new();
    for crl in crls {
        match best.get(&crl.kid) {
            Some(existing) if existing.ctr >= crl.ctr => {}
            _ => {
                best.insert(crl.kid.clone(), crl);
            }
        }
    }
    best.into_values().collect()
}

pub fn parse_snapshot(json: &str) -> Result<DirectorySnapshot> {
    serde_json::from_str(json).map_err(|e| ShcError::ShlFormat(format!("invalid directory snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_key(kid: &str) -> EcPublicJwk {
        sample_key_with_crl_version(kid, None)
    }

    fn sample_key_with_crl_version(kid: &str, crl_version: Option<u64>) -> EcPublicJwk {
        EcPublicJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
            kid: Some(kid.to_string()),
            key_use: Some("sig".to_string()),
            alg: Some("ES256".to_string()),
            crl_version,
        }
    }

    #[test]
    fn merges_duplicate_issuer_entries() {
        let snapshot_json = json!({
            "issuerInfo": [
                {"issuer": {"iss": "https://a.example"}, "keys": [sample_key("k1")], "crls": []},
                {"issuer": {"iss": "https://a.example"}, "keys": [sample_key("k2")], "crls": []},
            ]
        })
        .to_string();
        let directory = Directory::from_snapshot(parse_snapshot(&snapshot_json).unwrap());
        let record = directory.by_iss("https://a.example").unwrap();
        assert_eq!(record.keys.len(), 2);
    }

    #[test]
    fn dedupes_keys_by_kid_and_crls_by_kid_max_ctr() {
        let snapshot_json = json!({
            "issuerInfo": [{
                "issuer": {"iss": "https://a.example"},
                "keys": [sample_key("k1"), sample_key("k1")],
                "crls": [
                    {"kid": "k1", "ctr": 1, "rids": ["r1"]},
                    {"kid": "k1", "ctr": 2, "rids": ["r1", "r2.1700000000"]}
                ]
            }]
        })
        .to_string();
        let directory = Directory::from_snapshot(parse_snapshot(&snapshot_json).unwrap());
        let record = directory.by_iss("https://a.example").unwrap();
        assert_eq!(record.keys.len(), 1);
        assert_eq!(record.crls.len(), 1);
        assert_eq!(record.crls[0].ctr, 2);
    }

    #[test]
    fn dedupes_keys_by_kid_keeping_max_crl_version() {
        let snapshot_json = json!({
            "issuerInfo": [{
                "issuer": {"iss": "https://a.example"},
                "keys": [sample_key_with_crl_version("k1", Some(1)), sample_key_with_crl_version("k1", Some(3)), sample_key_with_crl_version("k1", None)],
                "crls": []
            }]
        })
        .to_string();
        let directory = Directory::from_snapshot(parse_snapshot(&snapshot_json).unwrap());
        let record = directory.by_iss("https://a.example").unwrap();
        assert_eq!(record.keys.len(), 1);
        assert_eq!(record.keys[0].crl_version, Some(3));
    }

    #[test]
    fn crl_rid_timestamp_parsing() {
        let crl = IssuerCrl {
            kid: "k1".to_string(),
            ctr: 1,
            rids: vec!["r1".to_string(), "r2.1700000000".to_string()],
        };
        let parsed = crl.parsed();
        assert!(parsed.rids.contains("r1"));
        assert!(parsed.rids.contains("r2"));
        assert_eq!(parsed.rid_timestamps.get("r2").unwrap(), "1700000000");
        assert!(!parsed.rid_timestamps.contains_key("r1"));
    }

    #[test]
    fn unknown_issuer_returns_none() {
        let snapshot_json = json!({"issuerInfo": []}).to_string();
        let directory = Directory::from_snapshot(parse_snapshot(&snapshot_json).unwrap());
        assert!(directory.by_iss("https://unknown.example").is_none());
    }
}
