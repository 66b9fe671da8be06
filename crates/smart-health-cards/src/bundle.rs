//! C5 — FHIR Bundle processor: standard normalisation and the
//! QR-optimised transform (reference rewriting, field stripping).
//!
//! FHIR content is kept as `serde_json::Value` rather than a fully typed
//! FHIR model (per the "dynamic values across the wire" design note):
//! the processor only checks the minimal shape it needs and otherwise
//! leaves resources untouched.

use std::collections::HashMap;

use serde_json::Value;
use shc_crypto::error::{Result, ShcError};

const ALLOWED_BUNDLE_TYPES: &[&str] = &[
    "document",
    "message",
    "transaction",
    "transaction-response",
    "batch",
    "batch-response",
    "history",
    "searchset",
    "collection",
];

/// Validate the minimal structural shape §4.5 requires of a Bundle.
pub fn validate(bundle: &Value) -> Result<()> {
    if bundle.is_null() {
        return Err(ShcError::BundleValidation("bundle is null".into()));
    }
    let obj = bundle
        .as_object()
        .ok_or_else(|| ShcError::BundleValidation("bundle must be a JSON object".into()))?;

    if obj.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return Err(ShcError::BundleValidation(
            "resourceType must be \"Bundle\"".into(),
        ));
    }

    if let Some(type_value) = obj.get("type") {
        let type_str = type_value
            .as_str()
            .ok_or_else(|| ShcError::BundleValidation("Bundle.type must be a string".into()))?;
        if !ALLOWED_BUNDLE_TYPES.contains(&type_str) {
            return Err(ShcError::BundleValidation(format!(
                "unknown Bundle.type: {type_str}"
            )));
        }
    }

    if let Some(entry_value) = obj.get("entry") {
        let entries = entry_value
            .as_array()
            .ok_or_else(|| ShcError::BundleValidation("Bundle.entry must be an array".into()))?;
        for entry in entries {
            let entry_obj = entry
                .as_object()
                .ok_or_else(|| ShcError::BundleValidation("entry must be an object".into()))?;
            let resource = entry_obj
                .get("resource")
                .ok_or_else(|| ShcError::BundleValidation("entry missing resource".into()))?;
            let resource_type = resource
                .as_object()
                .and_then(|r| r.get("resourceType"))
                .and_then(Value::as_str);
            if resource_type.is_none() {
                return Err(ShcError::BundleValidation(
                    "entry.resource missing resourceType".into(),
                ));
            }
        }
    }

    Ok(())
}

/// Standard normalisation: deep copy, default `type` to `"collection"`
/// when absent, no other structural changes. Idempotent.
pub fn standardize(bundle: &Value) -> Result<Value> {
    validate(bundle)?;
    let mut out = bundle.clone();
    let obj = out.as_object_mut().expect("validated as object above");
    if !obj.contains_key("type") {
        obj.insert("type".to_string(), Value::String("collection".to_string()));
    }
    Ok(out)
}

/// The QR-optimised transform (§4.5). `strict` controls whether an
/// unresolvable `reference` is a hard error (the default at the façade
/// layer) or left untouched.
pub fn optimize_for_qr(bundle: &Value, strict: bool) -> Result<Value> {
    validate(bundle)?;
    let mut out = bundle.clone();
    let obj = out.as_object_mut().expect("validated as object above");
    obj.remove("id");

    let mut lookup: HashMap<String, String> = HashMap::new();

    if let Some(Value::Array(entries)) = obj.get_mut("entry") {
        // Pass 1: rewrite fullUrl -> resource:<i>, build the lookup table,
        // and strip resource-level ids. References may point to entries
        // appearing later, so the whole table must exist before pass 2.
        for (i, entry) in entries.iter_mut().enumerate() {
            let Some(entry_obj) = entry.as_object_mut() else {
                continue;
            };
            if let Some(full_url) = entry_obj.get("fullUrl").and_then(Value::as_str).map(str::to_string) {
                let replacement = format!("resource:{i}");
                lookup.insert(full_url.clone(), replacement.clone());
                lookup.insert(last_two_path_segments(&full_url), replacement.clone());
                entry_obj.insert("fullUrl".to_string(), Value::String(replacement));
            }
            if let Some(Value::Object(resource_obj)) = entry_obj.get_mut("resource") {
                resource_obj.remove("id");
            }
        }

        // Pass 2: rewrite references and strip null/empty/text/display
        // noise inside each resource.
        for entry in entries.iter_mut() {
            if let Some(resource) = entry.get_mut("resource") {
                clean_and_rewrite(resource, &lookup, strict)?;
            }
        }
    }

    Ok(out)
}

fn last_two_path_segments(url: &str) -> String {
    let segments: Vec<&str> = url.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 {
        format!("{}/{}", segments[segments.len() - 2], segments[segments.len() - 1])
    } else {
        url.to_string()
    }
}

fn clean_and_rewrite(value: &mut Value, lookup: &HashMap<String, String>, strict: bool) -> Result<()> {
    match value {
        Value::Object(map) => {
            let null_or_empty_keys: Vec<String> = map
                .iter()
                .filter(|(_, v)| matches!(v, Value::Null) || matches!(v, Value::Array(a) if a.is_empty()))
                .map(|(k, _)| k.clone())
                .collect();
            for key in null_or_empty_keys {
                map.remove(&key);
            }

            if let Some(meta) = map.get("meta") {
                if let Value::Object(meta_map) = meta {
                    if let Some(security) = meta_map.get("security").cloned() {
                        let mut pruned = serde_json::Map::new();
                        pruned.insert("security".to_string(), security);
                        map.insert("meta".to_string(), Value::Object(pruned));
                    } else {
                        map.remove("meta");
                    }
                }
            }

            let drop_text = match map.get("text") {
                Some(Value::Object(narrative)) => narrative.contains_key("div"),
                Some(Value::String(_)) => map.contains_key("coding"),
                _ => false,
            };
            if drop_text {
                map.remove("text");
            }

            let is_coding_entry = matches!(map.get("system"), Some(Value::String(_)))
                && matches!(map.get("code"), Some(Value::String(_)));
            if is_coding_entry {
                map.remove("display");
            }

            if let Some(Value::String(reference)) = map.get("reference").cloned() {
                let resolved = lookup
                    .get(&reference)
                    .or_else(|| lookup.get(&last_two_path_segments(&reference)));
                match resolved {
                    Some(target) => {
                        map.insert("reference".to_string(), Value::String(target.clone()));
                    }
                    None if strict => {
                        return Err(ShcError::InvalidBundleReference(reference));
                    }
                    None => {}
                }
            }

            for child in map.values_mut() {
                clean_and_rewrite(child, lookup, strict)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                clean_and_rewrite(item, lookup, strict)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
