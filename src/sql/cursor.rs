//! Opaque cursor encoding.
//!
//! A cursor is `base64(k1:v1|k2:v2|…)` where the keys are the order-by
//! fields of the query that produced it and the values are the boundary
//! row's rendered values.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{ApiError, ApiResult};

/// Encode `(field, rendered value)` pairs.
pub fn encode_cursor(pairs: &[(String, String)]) -> String {
    let raw = pairs
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("|");
    BASE64.encode(raw)
}

/// Decode a cursor back into its pairs. Malformed input (bad base64,
/// non-UTF-8, or a segment without a `:`) raises `InvalidCursor`.
pub fn decode_cursor(cursor: &str) -> ApiResult<Vec<(String, String)>> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|_| ApiError::InvalidCursor("not valid base64".into()))?;
    let raw = String::from_utf8(bytes)
        .map_err(|_| ApiError::InvalidCursor("not valid UTF-8".into()))?;
    if raw.is_empty() {
        return Err(ApiError::InvalidCursor("empty cursor".into()));
    }
    raw.split('|')
        .map(|segment| {
            let (key, value) = segment
                .split_once(':')
                .ok_or_else(|| ApiError::InvalidCursor(format!("bad segment: {segment}")))?;
            if key.is_empty() {
                return Err(ApiError::InvalidCursor(format!("bad segment: {segment}")));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let pairs = vec![
            ("store_id".to_string(), "2".to_string()),
            ("customer_id".to_string(), "10".to_string()),
        ];
        let cursor = encode_cursor(&pairs);
        assert_eq!(decode_cursor(&cursor).unwrap(), pairs);
    }

    #[test]
    fn values_may_contain_colons() {
        let pairs = vec![("created_at".to_string(), "2024-05-01T12:30:00".to_string())];
        let cursor = encode_cursor(&pairs);
        assert_eq!(decode_cursor(&cursor).unwrap(), pairs);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert_eq!(decode_cursor("!!!").unwrap_err().code(), "INVALID_CURSOR");

        let no_colon = BASE64.encode("justakey");
        assert_eq!(decode_cursor(&no_colon).unwrap_err().code(), "INVALID_CURSOR");

        let empty = BASE64.encode("");
        assert_eq!(decode_cursor(&empty).unwrap_err().code(), "INVALID_CURSOR");
    }
}
