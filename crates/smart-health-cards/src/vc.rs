//! C6 — verifiable-credential claim construction and validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use shc_crypto::error::{Result, ShcError};

use crate::bundle;

pub const HEALTH_CARD_TYPE: &str = "https://smarthealth.cards#health-card";
pub const DEFAULT_FHIR_VERSION: &str = "4.0.1";

static SEMVER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex"));

/// Build the `vc` claim value from a (already bundle-processed) Bundle,
/// an optional FHIR version, and any caller-supplied additional
/// credential types appended after the canonical one.
pub fn build(fhir_bundle: Value, fhir_version: Option<&str>, additional_types: &[String]) -> Value {
    let mut types = vec![HEALTH_CARD_TYPE.to_string()];
    types.extend(additional_types.iter().cloned());

    json!({
        "type": types,
        "credentialSubject": {
            "fhirVersion": fhir_version.unwrap_or(DEFAULT_FHIR_VERSION),
            "fhirBundle": fhir_bundle,
        }
    })
}

/// Validate a `vc` claim value per §4.6.
pub fn validate(vc: &Value) -> Result<()> {
    let obj = vc
        .as_object()
        .ok_or_else(|| ShcError::CredentialValidation("vc must be an object".into()))?;

    let types = obj
        .get("type")
        .and_then(Value::as_array)
        .ok_or_else(|| ShcError::CredentialValidation("vc.type must be an array".into()))?;
    if types.is_empty() {
        return Err(ShcError::CredentialValidation("vc.type must not be empty".into()));
    }
    if !types.iter().any(|t| t.as_str() == Some(HEALTH_CARD_TYPE)) {
        return Err(ShcError::CredentialValidation(format!(
            "vc.type must contain \"{HEALTH_CARD_TYPE}\""
        )));
    }

    let subject = obj
        .get("credentialSubject")
        .and_then(Value::as_object)
        .ok_or_else(|| ShcError::CredentialValidation("vc.credentialSubject must be an object".into()))?;

    let fhir_version = subject
        .get("fhirVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| ShcError::CredentialValidation("fhirVersion must be a string".into()))?;
    if !SEMVER.is_match(fhir_version) {
        return Err(ShcError::CredentialValidation(format!(
            "fhirVersion \"{fhir_version}\" is not a semver string"
        )));
    }

    let fhir_bundle = subject
        .get("fhirBundle")
        .ok_or_else(|| ShcError::CredentialValidation("fhirBundle is required".into()))?;
    bundle::validate(fhir_bundle)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_bundle() -> Value {
        json!({"resourceType": "Bundle", "type": "collection"})
    }

    #[test]
    fn build_and_validate_round_trip() {
        let vc = build(sample_bundle(), None, &[]);
        assert!(validate(&vc).is_ok());
        assert_eq!(vc["credentialSubject"]["fhirVersion"], DEFAULT_FHIR_VERSION);
    }

    #[test]
    fn additional_types_are_appended_in_order() {
        let vc = build(
            sample_bundle(),
            Some("4.0.1"),
            &["https://example.org/custom-type".to_string()],
        );
        let types: Vec<&str> = vc["type"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(types, vec![HEALTH_CARD_TYPE, "https://example.org/custom-type"]);
    }

    #[test]
    fn missing_canonical_type_fails() {
        let vc = json!({
            "type": ["https://example.org/other"],
            "credentialSubject": {"fhirVersion": "4.0.1", "fhirBundle": sample_bundle()}
        });
        assert_eq!(validate(&vc).unwrap_err().code(), "CredentialValidation");
    }

    #[test]
    fn bad_fhir_version_fails() {
        let vc = json!({
            "type": [HEALTH_CARD_TYPE],
            "credentialSubject": {"fhirVersion": "v4", "fhirBundle": sample_bundle()}
        });
        assert_eq!(validate(&vc).unwrap_err().code(), "CredentialValidation");
    }

    #[test]
    fn invalid_bundle_surfaces_bundle_validation_error() {
        let vc = json!({
            "type": [HEALTH_CARD_TYPE],
            "credentialSubject": {"fhirVersion": "4.0.1", "fhirBundle": {"resourceType": "Patient"}}
        });
        assert_eq!(validate(&vc).unwrap_err().code(), "BundleValidation");
    }
}
