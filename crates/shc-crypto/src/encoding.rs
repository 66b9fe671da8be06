//! C2 — base64url (RFC 4648 §5, unpadded) and the SHC numeric alphabet
//! used by the QR wire format.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{Result, ShcError};

/// The offset SMART Health Cards subtract from a base64url char's ASCII
/// value to get its two-digit numeric-mode pair: `'-' == 45` maps to `00`.
const NUMERIC_OFFSET: u8 = b'-';
const MAX_PAIR_VALUE: u8 = 77;

pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64url_decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ShcError::Jws(format!("invalid base64url: {e}")))
}

/// Map a base64url-encoded JWS string to the SHC QR numeric alphabet:
/// each character becomes a zero-padded two-digit decimal pair.
pub fn encode_jws_to_numeric(jws: &str) -> Result<String> {
    let mut out = String::with_capacity(jws.len() * 2);
    for c in jws.chars() {
        let code = c as u32;
        if code < NUMERIC_OFFSET as u32 {
            return Err(ShcError::QrCode(format!(
                "character '{c}' is out of range for the numeric alphabet"
            )));
        }
        let offset = code - NUMERIC_OFFSET as u32;
        if offset > MAX_PAIR_VALUE as u32 {
            return Err(ShcError::QrCode(format!(
                "character '{c}' maps to offset {offset}, outside 0..={MAX_PAIR_VALUE}"
            )));
        }
        out.push_str(&format!("{:02}", offset));
    }
    Ok(out)
}

/// Inverse of [`encode_jws_to_numeric`].
pub fn decode_numeric_to_jws(numeric: &str) -> Result<String> {
    if !numeric.is_ascii() {
        return Err(ShcError::QrCode("numeric string must be ASCII".into()));
    }
    let bytes = numeric.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(ShcError::QrCode(
            "numeric string must have even length".into(),
        ));
    }
    let mut out = String::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let pair_str = std::str::from_utf8(pair).unwrap();
        let value: u8 = pair_str
            .parse()
            .map_err(|_| ShcError::QrCode(format!("invalid numeric pair '{pair_str}'")))?;
        if value > MAX_PAIR_VALUE {
            return Err(ShcError::QrCode(format!(
                "numeric pair {value} exceeds maximum {MAX_PAIR_VALUE}"
            )));
        }
        out.push((value + NUMERIC_OFFSET) as char);
    }
    Ok(out)
}
