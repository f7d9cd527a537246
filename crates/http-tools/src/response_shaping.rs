//! Response shaping: body decoding and list windowing.
//!
//! Upstream bodies are decoded as JSON only when the content type says so; anything else is
//! opaque text (or a base64 envelope for non-UTF-8 bytes). Sequence payloads are cut down to the
//! caller's `[offset, offset + limit)` window so large list endpoints stay cheap to return.

use base64::Engine as _;
use mime::Mime;
use serde_json::{Value, json};

/// Top-level object fields that conventionally carry a collection's total size.
const TOTAL_COUNT_FIELDS: &[&str] = &["total", "total_count", "totalCount", "count"];

/// Fields checked (in order) for a human-readable upstream error message.
const ERROR_MESSAGE_FIELDS: &[&str] = &["message", "detail", "error", "error_description"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedPayload {
    pub data: Value,
    pub truncated: bool,
    pub total_count: Option<u64>,
}

/// True for `application/json` and any `+json` structured-syntax suffix.
#[must_use]
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}

/// Decode a response body into a JSON value.
#[must_use]
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    if is_json_content_type(content_type)
        && let Ok(v) = serde_json::from_slice::<Value>(bytes)
    {
        return v;
    }
    bytes_to_text_or_base64_json(bytes, content_type)
}

fn bytes_to_text_or_base64_json(bytes: &[u8], content_type: Option<&str>) -> Value {
    if let Ok(s) = std::str::from_utf8(bytes) {
        Value::String(s.to_string())
    } else {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": b64
        })
    }
}

/// Apply the page window to a decoded payload.
///
/// Arrays are sliced and report their original length as `total_count`. Objects and scalars
/// pass through untouched; objects may still report a total lifted from a conventional field.
#[must_use]
pub fn shape_payload(data: Value, window: PageWindow) -> ShapedPayload {
    match data {
        Value::Array(items) => {
            let original = items.len();
            let window_items: Vec<Value> = items
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .collect();
            ShapedPayload {
                truncated: original > window_items.len(),
                total_count: Some(original as u64),
                data: Value::Array(window_items),
            }
        }
        Value::Object(map) => {
            let total_count = TOTAL_COUNT_FIELDS
                .iter()
                .find_map(|f| map.get(*f).and_then(Value::as_u64));
            ShapedPayload {
                data: Value::Object(map),
                truncated: false,
                total_count,
            }
        }
        other => ShapedPayload {
            data: other,
            truncated: false,
            total_count: None,
        },
    }
}

/// Best-effort error message for a non-success response body.
#[must_use]
pub fn error_message(status: u16, body: &Value) -> String {
    match body {
        Value::Object(map) => ERROR_MESSAGE_FIELDS
            .iter()
            .find_map(|f| match map.get(*f) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(v @ (Value::Object(_) | Value::Array(_))) => Some(v.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| format!("HTTP {status}")),
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        _ => format!("HTTP {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hundred() -> Value {
        Value::Array((0..100).map(|i| json!({"id": i})).collect())
    }

    fn ids(v: &Value) -> Vec<u64> {
        v.as_array()
            .expect("array")
            .iter()
            .map(|o| o["id"].as_u64().expect("id"))
            .collect()
    }

    #[test]
    fn first_page_of_hundred_is_truncated() {
        let shaped = shape_payload(
            hundred(),
            PageWindow {
                offset: 0,
                limit: 20,
            },
        );
        assert_eq!(ids(&shaped.data), (0..20).collect::<Vec<_>>());
        assert!(shaped.truncated);
        assert_eq!(shaped.total_count, Some(100));
    }

    #[test]
    fn last_page_does_not_overlap_first() {
        let first = shape_payload(
            hundred(),
            PageWindow {
                offset: 0,
                limit: 20,
            },
        );
        let last = shape_payload(
            hundred(),
            PageWindow {
                offset: 80,
                limit: 20,
            },
        );
        assert_eq!(ids(&last.data), (80..100).collect::<Vec<_>>());
        let first_ids = ids(&first.data);
        assert!(ids(&last.data).iter().all(|i| !first_ids.contains(i)));
        // The window was cut from a longer list.
        assert!(last.truncated);
    }

    #[test]
    fn short_list_is_not_truncated() {
        let shaped = shape_payload(
            json!([1, 2, 3]),
            PageWindow {
                offset: 0,
                limit: 20,
            },
        );
        assert_eq!(shaped.data, json!([1, 2, 3]));
        assert!(!shaped.truncated);
        assert_eq!(shaped.total_count, Some(3));
    }

    #[test]
    fn offset_past_end_yields_empty_window() {
        let shaped = shape_payload(
            json!([1, 2, 3]),
            PageWindow {
                offset: 10,
                limit: 5,
            },
        );
        assert_eq!(shaped.data, json!([]));
        assert!(shaped.truncated);
    }

    #[test]
    fn objects_are_never_truncated_but_report_totals() {
        let body = json!({"items": [1, 2, 3, 4], "totalCount": 42});
        let shaped = shape_payload(
            body.clone(),
            PageWindow {
                offset: 0,
                limit: 1,
            },
        );
        assert_eq!(shaped.data, body);
        assert!(!shaped.truncated);
        assert_eq!(shaped.total_count, Some(42));

        let scalar = shape_payload(
            json!("plain"),
            PageWindow {
                offset: 0,
                limit: 1,
            },
        );
        assert!(!scalar.truncated);
        assert_eq!(scalar.total_count, None);
    }

    #[test]
    fn decode_respects_content_type() {
        assert_eq!(
            decode_body(br#"{"a":1}"#, Some("application/json; charset=utf-8")),
            json!({"a": 1})
        );
        assert_eq!(
            decode_body(br#"{"a":1}"#, Some("application/problem+json")),
            json!({"a": 1})
        );
        assert_eq!(
            decode_body(br#"{"a":1}"#, Some("text/plain")),
            json!(r#"{"a":1}"#)
        );
        assert_eq!(decode_body(b"not json", Some("application/json")), json!("not json"));
        assert_eq!(decode_body(b"", Some("application/json")), Value::Null);

        let bin = decode_body(&[0xff, 0xfe, 0x00], Some("application/octet-stream"));
        assert_eq!(bin["encoding"], "base64");
        assert_eq!(bin["mimeType"], "application/octet-stream");
    }

    #[test]
    fn error_message_prefers_known_fields() {
        assert_eq!(error_message(404, &json!({"detail": "Pet not found"})), "Pet not found");
        assert_eq!(error_message(400, &json!({"message": "bad"})), "bad");
        assert_eq!(error_message(500, &json!("boom")), "boom");
        assert_eq!(error_message(502, &Value::Null), "HTTP 502");
        assert_eq!(error_message(503, &json!({"other": 1})), "HTTP 503");
    }
}
