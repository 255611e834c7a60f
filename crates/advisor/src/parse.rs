use serde_json::{Map, Value};

/// Extract a JSON object from model output.
///
/// Accepts a bare object, or text that wraps one (prose, code fences). The
/// span between the first `{` and the last `}` is tried when the whole text
/// does not parse. Anything that is not an object yields `None`.
pub fn parse_json_from_text(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
