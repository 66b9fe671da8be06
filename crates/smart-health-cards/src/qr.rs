//! C7 — JWS<->numeric mapping and balanced multi-segment QR chunking
//! (§4.7, §6, §8 properties 3/4, scenario S2).

use std::collections::HashSet;

use qrcode::render::svg;
use qrcode::QrCode;
use shc_crypto::encoding::{decode_numeric_to_jws, encode_jws_to_numeric};
use shc_crypto::error::{Result, ShcError};

/// QR error-correction level, named the way the spec's capacity table
/// (§4.7) names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCorrectionLevel {
    L,
    M,
    Q,
    H,
}

/// Maximum JWS length that fits in a single version-22 QR symbol at the
/// given error-correction level.
pub fn max_single_qr_size(level: ErrorCorrectionLevel) -> usize {
    match level {
        ErrorCorrectionLevel::L => 1195,
        ErrorCorrectionLevel::M => 927,
        ErrorCorrectionLevel::Q => 670,
        ErrorCorrectionLevel::H => 519,
    }
}

impl From<ErrorCorrectionLevel> for qrcode::EcLevel {
    fn from(level: ErrorCorrectionLevel) -> Self {
        match level {
            ErrorCorrectionLevel::L => qrcode::EcLevel::L,
            ErrorCorrectionLevel::M => qrcode::EcLevel::M,
            ErrorCorrectionLevel::Q => qrcode::EcLevel::Q,
            ErrorCorrectionLevel::H => qrcode::EcLevel::H,
        }
    }
}

/// Split `jws` into one or more `shc:/...` numeric chunks, each at most
/// `max` JWS characters wide (and therefore at most `2*max` numeric
/// digits), using the balanced-split rule from §4.7. When `enable_chunking`
/// is false, a `jws` longer than `max` fails rather than splitting (§4.7).
pub fn chunk_jws(jws: &str, max: usize, enable_chunking: bool) -> Result<Vec<String>> {
    if max == 0 {
        return Err(ShcError::QrCode("max chunk size must be at least 1".into()));
    }
    if jws.len() <= max {
        let numeric = encode_jws_to_numeric(jws)?;
        return Ok(vec![format!("shc:/{numeric}")]);
    }
    if !enable_chunking {
        return Err(ShcError::QrCode(format!(
            "JWS is {} characters, exceeds {max} and chunking is disabled",
            jws.len()
        )));
    }

    let chunk_count = jws.len().div_ceil(max);
    let balanced = jws.len().div_ceil(chunk_count);

    let chars: Vec<char> = jws.chars().collect();
    let mut chunks = Vec::with_capacity(chunk_count);
    let mut offset = 0;
    for index in 1..=chunk_count {
        let end = (offset + balanced).min(chars.len());
        let slice: String = chars[offset..end].iter().collect();
        let numeric = encode_jws_to_numeric(&slice)?;
        chunks.push(format!("shc:/{index}/{chunk_count}/{numeric}"));
        offset = end;
    }
    Ok(chunks)
}

/// Reassemble and decode the chunks produced by [`chunk_jws`] (or a
/// single `shc:/...` string).
pub fn decode_qr(parts: &[String]) -> Result<String> {
    if parts.is_empty() {
        return Err(ShcError::QrCode("no QR segments given".into()));
    }

    if parts.len() == 1 {
        let numeric = parts[0]
            .strip_prefix("shc:/")
            .ok_or_else(|| ShcError::QrCode("missing shc:/ prefix".into()))?;
        // A single-element array may still be one chunk of a larger set
        // (total == 1), in which case it carries the <i>/<n>/ prefix too.
        if let Some((_, numeric)) = parse_chunk_prefix(numeric) {
            return decode_numeric_to_jws(numeric);
        }
        return decode_numeric_to_jws(numeric);
    }

    let mut parsed: Vec<(u32, u32, &str)> = Vec::with_capacity(parts.len());
    for part in parts {
        let rest = part
            .strip_prefix("shc:/")
            .ok_or_else(|| ShcError::QrCode("missing shc:/ prefix".into()))?;
        let mut segments = rest.splitn(3, '/');
        let index: u32 = segments
            .next()
            .ok_or_else(|| ShcError::QrCode("missing chunk index".into()))?
            .parse()
            .map_err(|_| ShcError::QrCode("chunk index must be an integer".into()))?;
        let total: u32 = segments
            .next()
            .ok_or_else(|| ShcError::QrCode("missing chunk total".into()))?
            .parse()
            .map_err(|_| ShcError::QrCode("chunk total must be an integer".into()))?;
        let numeric = segments
            .next()
            .ok_or_else(|| ShcError::QrCode("missing numeric payload".into()))?;
        parsed.push((index, total, numeric));
    }

    let total = parsed[0].1;
    if parsed.iter().any(|(_, n, _)| *n != total) {
        return Err(ShcError::QrCode("chunks disagree on total count".into()));
    }
    if total as usize != parsed.len() {
        return Err(ShcError::QrCode(format!(
            "expected {total} chunks, got {}",
            parsed.len()
        )));
    }

    let mut seen_indices = HashSet::new();
    for (index, _, _) in &parsed {
        if *index < 1 || *index > total {
            return Err(ShcError::QrCode(format!("chunk index {index} out of range 1..={total}")));
        }
        seen_indices.insert(*index);
    }
    if seen_indices.len() != total as usize {
        return Err(ShcError::QrCode("duplicate or missing chunk index".into()));
    }

    parsed.sort_by_key(|(index, _, _)| *index);
    let numeric: String = parsed.into_iter().map(|(_, _, n)| n).collect();
    decode_numeric_to_jws(&numeric)
}

fn parse_chunk_prefix(s: &str) -> Option<(u32, &str)> {
    let mut segments = s.splitn(3, '/');
    let index: u32 = segments.next()?.parse().ok()?;
    let _total: u32 = segments.next()?.parse().ok()?;
    let numeric = segments.next()?;
    Some((index, numeric))
}

/// Render each chunk of `chunks` as an SVG QR code. Chunk 1's
/// `"shc:/"`/`"shc:/i/n/"` prefix and numeric body are encoded together;
/// QR encoders pick byte mode for the prefix and numeric mode for the
/// digit run automatically when mixed-mode segmentation is cheaper.
pub fn render_qr_svgs(chunks: &[String], level: ErrorCorrectionLevel) -> Result<Vec<String>> {
    chunks
        .iter()
        .map(|chunk| {
            let code = QrCode::with_error_correction_level(chunk.as_bytes(), level.into())
                .map_err(|e| ShcError::QrCode(format!("failed to render QR: {e}")))?;
            Ok(code
                .render()
                .min_dimensions(200, 200)
                .dark_color(svg::Color("#000000"))
                .light_color(svg::Color("#ffffff"))
                .build())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_chunk_round_trip() {
        let jws = "abc.def.ghi";
        let chunks = chunk_jws(jws, 1195, true).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("shc:/"));
        assert_eq!(decode_qr(&chunks).unwrap(), jws);
    }

    #[test]
    fn s2_balanced_chunking_of_length_2500() {
        let jws: String = "A".repeat(2500);
        let chunks = chunk_jws(&jws, 1195, true).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("shc:/1/3/"));
        assert!(chunks[1].starts_with("shc:/2/3/"));
        assert!(chunks[2].starts_with("shc:/3/3/"));

        let lengths: Vec<usize> = chunks
            .iter()
            .map(|c| c.rsplit('/').next().unwrap().len() / 2)
            .collect();
        assert_eq!(lengths, vec![834, 834, 832]);

        assert_eq!(decode_qr(&chunks).unwrap(), jws);
    }

    #[test]
    fn chunk_round_trip_property_like_checks() {
        for len in [1usize, 500, 1195, 1196, 3000, 5000] {
            let jws: String = (0..len).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
            for max in [1usize, 100, 1195] {
                let chunks = chunk_jws(&jws, max, true).unwrap();
                let restored = decode_qr(&chunks).unwrap();
                assert_eq!(restored, jws);
                let numeric_lengths: Vec<usize> = chunks
                    .iter()
                    .map(|c| c.rsplit('/').next().unwrap().len())
                    .collect();
                assert!(numeric_lengths.iter().all(|&l| l <= 2 * max));
                if numeric_lengths.len() > 1 {
                    let min = *numeric_lengths.iter().min().unwrap();
                    let max_len = *numeric_lengths.iter().max().unwrap();
                    assert!(max_len - min <= 2);
                }
            }
        }
    }

    #[test]
    fn decode_rejects_mismatched_totals() {
        let err = decode_qr(&["shc:/1/2/00".to_string(), "shc:/2/3/00".to_string()]).unwrap_err();
        assert_eq!(err.code(), "QrCode");
    }

    #[test]
    fn decode_rejects_missing_indices() {
        let err = decode_qr(&["shc:/1/3/00".to_string(), "shc:/3/3/00".to_string()]).unwrap_err();
        assert_eq!(err.code(), "QrCode");
    }

    #[test]
    fn decode_reorders_out_of_order_chunks() {
        let jws = "A".repeat(10);
        let chunks = chunk_jws(&jws, 3, true).unwrap();
        let mut shuffled = chunks.clone();
        shuffled.reverse();
        assert_eq!(decode_qr(&shuffled).unwrap(), jws);
    }

    #[test]
    fn renders_one_svg_per_chunk() {
        let jws = "A".repeat(2500);
        let chunks = chunk_jws(&jws, 1195, true).unwrap();
        let svgs = render_qr_svgs(&chunks, ErrorCorrectionLevel::L).unwrap();
        assert_eq!(svgs.len(), chunks.len());
        assert!(svgs.iter().all(|s| s.contains("svg")));
    }

    #[test]
    fn disabled_chunking_rejects_oversized_jws() {
        let jws: String = "A".repeat(2500);
        let err = chunk_jws(&jws, 1195, false).unwrap_err();
        assert_eq!(err.code(), "QrCode");
    }

    #[test]
    fn disabled_chunking_still_allows_a_jws_that_fits() {
        let jws = "abc.def.ghi";
        let chunks = chunk_jws(jws, 1195, false).unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
