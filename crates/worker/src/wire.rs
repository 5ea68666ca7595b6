//! Child → core wire format.
//!
//! A stdout line that parses as a JSON object `{"type": T, "data": D}` is a
//! structured event; the six well-known types (`log`, `progress`,
//! `artifact`, `stderr`, `stdout`, `system`) have fixed meaning and anything
//! else is stored verbatim. Every other line is wrapped as a `stdout` event.

use serde_json::Value;

pub const EVENT_LOG: &str = "log";
pub const EVENT_PROGRESS: &str = "progress";
pub const EVENT_ARTIFACT: &str = "artifact";
pub const EVENT_STDERR: &str = "stderr";
pub const EVENT_STDOUT: &str = "stdout";
pub const EVENT_SYSTEM: &str = "system";

/// Try to interpret a stdout line as a structured event.
pub fn parse_structured(line: &str) -> Option<(String, Value)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;
    let event_type = obj.get("type")?.as_str()?;
    if event_type.is_empty() {
        return None;
    }
    let data = obj.get("data")?.clone();
    Some((event_type.to_string(), data))
}

/// The `data` payload for a plain output line.
pub fn line_payload(line: &str, truncated: bool) -> Value {
    if truncated {
        serde_json::json!({"line": line, "truncated": true})
    } else {
        serde_json::json!({"line": line})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_structured_lines() {
        let (event_type, data) =
            parse_structured(r#"{"type":"progress","data":{"pct":50}}"#).unwrap();
        assert_eq!(event_type, "progress");
        assert_eq!(data, json!({"pct": 50}));
    }

    #[test]
    fn unknown_types_are_still_structured() {
        let (event_type, _) = parse_structured(r#"{"type":"metric","data":{"rps":12}}"#).unwrap();
        assert_eq!(event_type, "metric");
    }

    #[test]
    fn rejects_everything_else() {
        assert!(parse_structured("hello world").is_none());
        assert!(parse_structured("{not json").is_none());
        // Valid JSON but not the event shape.
        assert!(parse_structured(r#"{"pct": 50}"#).is_none());
        assert!(parse_structured(r#"{"type":"log"}"#).is_none());
        assert!(parse_structured(r#"{"type":42,"data":{}}"#).is_none());
        assert!(parse_structured(r#"[1,2,3]"#).is_none());
    }

    #[test]
    fn line_payload_flags_truncation() {
        assert_eq!(line_payload("hi", false), json!({"line": "hi"}));
        assert_eq!(
            line_payload("hi", true),
            json!({"line": "hi", "truncated": true})
        );
    }
}
