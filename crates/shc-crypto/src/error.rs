//! The C13 error taxonomy: every fallible operation in the workspace
//! returns `Result<T, ShcError>`. Each variant carries a stable string
//! code (`ShcError::code`) so hosts can match on errors without depending
//! on Rust's `Debug`/`Display` formatting, and a human-readable message.

use thiserror::Error;

/// Tagged error variant covering both the SMART Health Cards and SMART
/// Health Links surfaces. See spec §7 for the taxonomy this mirrors.
#[derive(Error, Debug)]
pub enum ShcError {
    // --- SHC ---
    #[error("malformed JWS: {0}")]
    Jws(String),
    #[error("JWS signature verification failed")]
    SignatureVerification,
    #[error("token expired")]
    Expired,
    #[error("JWT payload validation failed: {0}")]
    PayloadValidation(String),
    #[error("FHIR bundle validation failed: {0}")]
    BundleValidation(String),
    #[error("verifiable credential validation failed: {0}")]
    CredentialValidation(String),
    #[error("invalid bundle reference: {0}")]
    InvalidBundleReference(String),
    #[error("QR code error: {0}")]
    QrCode(String),
    #[error("invalid health card file format: {0}")]
    FileFormat(String),
    #[error("verification error: {0}")]
    Verification(String),
    #[error("reader misconfigured: {0}")]
    ReaderConfig(String),

    // --- shared codec errors (not part of the public §7 taxonomy but
    // surfaced through the variants above at the API boundary) ---
    #[error("compression error: {0}")]
    Compression(String),

    // --- SHL ---
    #[error("malformed SHLink: {0}")]
    ShlFormat(String),
    #[error("SHL manifest error: {0}")]
    ShlManifest(String),
    #[error("network error: {0}")]
    ShlNetwork(String),
    #[error("authorization error: {0}")]
    ShlAuth(String),
    #[error("invalid passcode")]
    ShlInvalidPasscode,
    #[error("SHL resolution error: {0}")]
    ShlResolve(String),
    #[error("decryption failed: {0}")]
    ShlDecryption(String),
    #[error("SHL manifest not found")]
    ShlManifestNotFound,
    #[error("SHL manifest rate limited")]
    ShlManifestRateLimit,
    #[error("SHL expired")]
    ShlExpired,
    #[error("invalid SHL content: {0}")]
    ShlInvalidContent(String),
    #[error("SHL viewer error: {0}")]
    ShlViewer(String),
    #[error("SHL encryption error: {0}")]
    ShlEncryption(String),
}

impl ShcError {
    /// Stable machine-readable code for this error variant, per spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            ShcError::Jws(_) => "JWS",
            ShcError::SignatureVerification => "SignatureVerification",
            ShcError::Expired => "Expired",
            ShcError::PayloadValidation(_) => "PayloadValidation",
            ShcError::BundleValidation(_) => "BundleValidation",
            ShcError::CredentialValidation(_) => "CredentialValidation",
            ShcError::InvalidBundleReference(_) => "InvalidBundleReference",
            ShcError::QrCode(_) => "QrCode",
            ShcError::FileFormat(_) => "FileFormat",
            ShcError::Verification(_) => "Verification",
            ShcError::ReaderConfig(_) => "ReaderConfig",
            ShcError::Compression(_) => "CompressionError",
            ShcError::ShlFormat(_) => "ShlFormat",
            ShcError::ShlManifest(_) => "ShlManifest",
            ShcError::ShlNetwork(_) => "ShlNetwork",
            ShcError::ShlAuth(_) => "ShlAuth",
            ShcError::ShlInvalidPasscode => "ShlInvalidPasscode",
            ShcError::ShlResolve(_) => "ShlResolve",
            ShcError::ShlDecryption(_) => "ShlDecryption",
            ShcError::ShlManifestNotFound => "ShlManifestNotFound",
            ShcError::ShlManifestRateLimit => "ShlManifestRateLimit",
            ShcError::ShlExpired => "ShlExpired",
            ShcError::ShlInvalidContent(_) => "ShlInvalidContent",
            ShcError::ShlViewer(_) => "ShlViewer",
            ShcError::ShlEncryption(_) => "ShlEncryption",
        }
    }
}

pub type Result<T> = std::result::Result<T, ShcError>;
