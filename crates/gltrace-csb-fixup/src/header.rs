use serde_json::{json, Value};

/// Append a conversion-history entry to a trace header blob.
///
/// Tools that rewrite traces record themselves in the header's
/// `conversions` array so a trace's provenance can be reconstructed later.
/// The header is otherwise carried through unchanged; the entry is appended
/// before the header is persisted and never merged back into the source.
pub fn add_conversion_entry(meta: &mut Value, operation: &str, source: &str, info: Value) {
    let entry = json!({
        "operation": operation,
        "source": source,
        "info": info,
    });

    if !meta.is_object() {
        *meta = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(fields) = meta {
        let list = fields
            .entry("conversions")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !list.is_array() {
            *list = Value::Array(Vec::new());
        }
        if let Value::Array(entries) = list {
            entries.push(entry);
        }
    }
}
