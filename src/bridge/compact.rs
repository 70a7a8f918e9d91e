//! Payload classification, preview, and summary generation.
//!
//! Everything here is pure: classification is structural and never inspects
//! value semantics, and no function modifies the payload it is given.

use serde_json::{Map, Value, json};

/// Tunables for large-payload detection and preview shaping.
#[derive(Debug, Clone)]
pub struct CompactionSettings {
    /// UTF-8 JSON encodings strictly larger than this are compacted
    pub size_threshold: usize,
    /// Sequences strictly longer than this are compacted
    pub row_threshold: usize,
    /// Elements shown in a sequence preview
    pub max_preview_rows: usize,
    /// Characters kept of a previewed string
    pub max_preview_chars: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            size_threshold: 2_000,
            row_threshold: 20,
            max_preview_rows: 5,
            max_preview_chars: 500,
        }
    }
}

/// Length of the payload's UTF-8 JSON encoding.
pub fn payload_size_bytes(payload: &Value) -> usize {
    serde_json::to_string(payload).map_or(0, |s| s.len())
}

/// Whether the payload should be stored and replaced by a preview.
pub fn is_large(payload: &Value, settings: &CompactionSettings) -> bool {
    if payload_size_bytes(payload) > settings.size_threshold {
        return true;
    }
    match payload {
        Value::Array(items) => items.len() > settings.row_threshold,
        Value::Object(map) => map.values().any(|v| match v {
            Value::Array(items) => items.len() > settings.row_threshold,
            _ => false,
        }),
        _ => false,
    }
}

/// Derive the immediate preview shown alongside a stored result.
pub fn preview(payload: &Value, settings: &CompactionSettings) -> Value {
    match payload {
        Value::String(s) => Value::String(truncate_string(s, settings.max_preview_chars)),
        Value::Array(items) => array_envelope(items, settings),
        Value::Object(map) => preview_object(map, settings),
        scalar => scalar.clone(),
    }
}

fn preview_object(map: &Map<String, Value>, settings: &CompactionSettings) -> Value {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let previewed = match value {
            Value::Array(items) if items.len() > settings.max_preview_rows => {
                array_envelope(items, settings)
            }
            Value::String(s) if s.chars().count() > settings.max_preview_chars => {
                Value::String(truncate_string(s, settings.max_preview_chars))
            }
            Value::Object(nested) => preview_object(nested, settings),
            other => other.clone(),
        };
        out.insert(key.clone(), previewed);
    }
    Value::Object(out)
}

fn array_envelope(items: &[Value], settings: &CompactionSettings) -> Value {
    let showing = items.len().min(settings.max_preview_rows);
    json!({
        "_preview": true,
        "total_items": items.len(),
        "showing": showing,
        "items": items[..showing].to_vec(),
        "_note": "fetch remaining via get_result(id)",
    })
}

fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push_str("... [truncated]");
    truncated
}

/// Structural summary of a stored payload.
pub fn summarize(payload: &Value, server: &str, tool: &str) -> Value {
    let size = payload_size_bytes(payload);
    let mut summary = Map::new();
    summary.insert("server".to_string(), json!(server));
    summary.insert("tool".to_string(), json!(tool));
    summary.insert("size_bytes".to_string(), json!(size));
    summary.insert("size_human".to_string(), json!(human_size(size)));

    match payload {
        Value::Array(items) => {
            summary.insert("type".to_string(), json!("array"));
            summary.insert("item_count".to_string(), json!(items.len()));
        }
        Value::Object(map) => {
            summary.insert("type".to_string(), json!("object"));
            summary.insert(
                "keys".to_string(),
                json!(map.keys().cloned().collect::<Vec<_>>()),
            );
            // Conventional tabular keys get their row counts surfaced
            for (key, label) in [
                ("rows", "row_count"),
                ("data", "data_count"),
                ("results", "results_count"),
            ] {
                if let Some(Value::Array(items)) = map.get(key) {
                    summary.insert(label.to_string(), json!(items.len()));
                }
            }
        }
        Value::String(_) => {
            summary.insert("type".to_string(), json!("string"));
        }
        Value::Number(_) => {
            summary.insert("type".to_string(), json!("number"));
        }
        Value::Bool(_) => {
            summary.insert("type".to_string(), json!("boolean"));
        }
        Value::Null => {
            summary.insert("type".to_string(), json!("null"));
        }
    }
    Value::Object(summary)
}

/// Kilobytes with one decimal at >= 1 KiB, raw bytes below.
pub fn human_size(bytes: usize) -> String {
    if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_threshold_is_strict() {
        let settings = CompactionSettings::default();
        // "xxxx..." as JSON is the string plus two quotes
        let at_threshold = Value::String("x".repeat(settings.size_threshold - 2));
        assert_eq!(payload_size_bytes(&at_threshold), settings.size_threshold);
        assert!(!is_large(&at_threshold, &settings));

        let over_threshold = Value::String("x".repeat(settings.size_threshold - 1));
        assert!(is_large(&over_threshold, &settings));
    }

    #[test]
    fn row_threshold_is_strict() {
        let settings = CompactionSettings::default();
        let exactly = Value::Array(vec![json!(0); settings.row_threshold]);
        assert!(!is_large(&exactly, &settings));

        let over = Value::Array(vec![json!(0); settings.row_threshold + 1]);
        assert!(is_large(&over, &settings));
    }

    #[test]
    fn object_with_long_sequence_value_is_large() {
        let settings = CompactionSettings::default();
        let payload = json!({ "rows": vec![json!(1); 21], "meta": "ok" });
        assert!(is_large(&payload, &settings));

        let small = json!({ "rows": [1, 2, 3], "meta": "ok" });
        assert!(!is_large(&small, &settings));
    }

    #[test]
    fn string_preview_truncates_with_suffix() {
        let settings = CompactionSettings::default();
        let long = "a".repeat(600);
        let previewed = preview(&json!(long), &settings);
        let text = previewed.as_str().unwrap();
        assert!(text.ends_with("... [truncated]"));
        assert_eq!(text.chars().count(), 500 + "... [truncated]".chars().count());

        let short = preview(&json!("hello"), &settings);
        assert_eq!(short, json!("hello"));
    }

    #[test]
    fn array_preview_builds_envelope() {
        let settings = CompactionSettings::default();
        let items: Vec<Value> = (0..21).map(|i| json!(i)).collect();
        let previewed = preview(&Value::Array(items), &settings);

        assert_eq!(previewed["_preview"], json!(true));
        assert_eq!(previewed["total_items"], json!(21));
        assert_eq!(previewed["showing"], json!(5));
        assert_eq!(previewed["items"], json!([0, 1, 2, 3, 4]));
        assert!(previewed["_note"].as_str().unwrap().contains("get_result"));
    }

    #[test]
    fn object_preview_replaces_long_values_in_place() {
        let settings = CompactionSettings::default();
        let payload = json!({
            "rows": (0..10).collect::<Vec<i64>>(),
            "text": "b".repeat(600),
            "nested": { "inner": (0..8).collect::<Vec<i64>>() },
            "count": 10,
        });
        let previewed = preview(&payload, &settings);

        assert_eq!(previewed["rows"]["_preview"], json!(true));
        assert_eq!(previewed["rows"]["showing"], json!(5));
        assert!(previewed["text"].as_str().unwrap().ends_with("... [truncated]"));
        assert_eq!(previewed["nested"]["inner"]["total_items"], json!(8));
        assert_eq!(previewed["count"], json!(10));
    }

    #[test]
    fn summary_for_array() {
        let payload = Value::Array(vec![json!(1); 21]);
        let summary = summarize(&payload, "srv", "query");
        assert_eq!(summary["server"], json!("srv"));
        assert_eq!(summary["tool"], json!("query"));
        assert_eq!(summary["type"], json!("array"));
        assert_eq!(summary["item_count"], json!(21));
    }

    #[test]
    fn summary_for_object_exposes_conventional_counts() {
        let payload = json!({
            "rows": [1, 2, 3],
            "results": [1],
            "meta": "x",
        });
        let summary = summarize(&payload, "srv", "query");
        assert_eq!(summary["type"], json!("object"));
        assert_eq!(summary["row_count"], json!(3));
        assert_eq!(summary["results_count"], json!(1));
        assert!(summary.get("data_count").is_none());
        let keys: Vec<&str> = summary["keys"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k.as_str().unwrap())
            .collect();
        assert!(keys.contains(&"rows") && keys.contains(&"meta"));
    }

    #[test]
    fn summary_for_scalars() {
        assert_eq!(summarize(&json!("s"), "a", "b")["type"], json!("string"));
        assert_eq!(summarize(&json!(42), "a", "b")["type"], json!("number"));
        assert_eq!(summarize(&json!(true), "a", "b")["type"], json!("boolean"));
        assert_eq!(summarize(&Value::Null, "a", "b")["type"], json!("null"));
    }

    #[test]
    fn human_size_formats() {
        assert_eq!(human_size(500), "500 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1024), "1.0 KB");
        assert_eq!(human_size(2560), "2.5 KB");
    }
}
