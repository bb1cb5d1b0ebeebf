//! Literal-scan extraction of the `anonymousId` field from an opaque batch
//! payload, with a UUID v4 fallback. Deliberately not regex-based — the
//! payload is a prepared blob the core never fully parses, so a full regex
//! feature set is unwarranted for a single known field name.

use uuid::Uuid;

const NEEDLE: &str = "\"anonymousId\"";

/// Extract the value of the first `"anonymousId":"..."` field found in
/// `payload`. Falls back to a freshly generated UUID v4 if the field is
/// absent or malformed.
pub fn extract(payload: &str) -> String {
    scan(payload).unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn scan(payload: &str) -> Option<String> {
    let key_pos = payload.find(NEEDLE)?;
    let after_key = &payload[key_pos + NEEDLE.len()..];

    let colon_pos = after_key.find(':')?;
    let after_colon = after_key[colon_pos + 1..].trim_start();

    let mut chars = after_colon.chars();
    if chars.next() != Some('"') {
        return None;
    }

    let mut out = String::new();
    let mut escaped = false;
    for ch in chars {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => return if out.is_empty() { None } else { Some(out) },
            c => out.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_value() {
        let payload = r#"{"batch":[{"anonymousId":"abc-123","event":"x"}]}"#;
        assert_eq!(scan(payload), Some("abc-123".to_string()));
    }

    #[test]
    fn extracts_with_whitespace_after_colon() {
        let payload = r#"{"anonymousId":   "abc-123"}"#;
        assert_eq!(scan(payload), Some("abc-123".to_string()));
    }

    #[test]
    fn missing_field_falls_back_to_uuid() {
        let payload = r#"{"batch":[{"event":"x"}]}"#;
        let id = extract(payload);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn empty_value_falls_back_to_uuid() {
        let payload = r#"{"anonymousId":""}"#;
        let id = extract(payload);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn malformed_field_falls_back_to_uuid() {
        let payload = r#"{"anonymousId": 42}"#;
        let id = extract(payload);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn extracts_multi_byte_utf8_value_unchanged() {
        let payload = r#"{"anonymousId":"café-☕️"}"#;
        assert_eq!(scan(payload), Some("café-☕️".to_string()));
    }
}
