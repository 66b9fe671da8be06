//! FHIR Bundle canonicalisation (C5), verifiable-credential assembly
//! (C6), QR numeric chunking (C7) and the `ShcIssuer`/`ShcReader` facade
//! (C8) tying them together with JWS signing from `shc-crypto`.

pub mod bundle;
pub mod facade;
pub mod qr;
pub mod vc;

pub use facade::{BundleProjectionOptions, JwksKeyResolver, KeyResolver, Shc, ShcIssuer, ShcReader, VcOptions};
pub use qr::ErrorCorrectionLevel;
pub use shc_crypto::error::{Result, ShcError};
