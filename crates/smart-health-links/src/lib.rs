//! SHLink payload encoding (C9), the encrypted manifest builder (C10),
//! the viewer resolution pipeline (C11) and issuer directory
//! synchronisation (C12), built on top of `shc-crypto` and
//! `smart-health-cards`.

pub mod directory;
pub mod manifest;
pub mod payload;
pub mod viewer;

pub use directory::{Directory, DirectorySnapshot, IssuerCrl, IssuerRecord, ParsedCrl};
pub use manifest::{
    AddOptions, BuildManifestOptions, FileDescriptor, ManifestBuilder, ManifestBuilderState, ManifestStorage,
    ShlManifest,
};
pub use payload::{generate, is_direct_file, is_long_term, manifest_id, parse, requires_passcode, to_uri, GenerateOptions, ShlPayload};
pub use shc_crypto::error::{Result, ShcError};
pub use viewer::{ResolveOptions, ResolvedContent, ShcReaderChoice, ShlViewer};
