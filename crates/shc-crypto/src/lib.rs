//! Compression, encoding, JWS and JWE primitives shared by the SMART
//! Health Cards and SMART Health Links crates (C1–C4, C13).

pub mod compression;
pub mod encoding;
pub mod error;
pub mod jwe;
pub mod jwk;
pub mod jws;

pub use error::{Result, ShcError};

/// Current Unix time in seconds, used for `nbf`/`exp` comparisons.
pub fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}
