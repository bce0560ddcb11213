//! Semantic payload values.
//!
//! Payloads are JSON object values passed between callers, the sandbox and
//! queued actions. They are always *frozen* (deep-copied) before being
//! persisted or handed across an isolation boundary, so no party can mutate
//! another's view.

pub type Payload = serde_json::Value;

/// Returns a deep, tamper-isolated copy of `payload`.
pub fn freeze(payload: &Payload) -> Payload {
    payload.clone()
}

/// Merges `overlay` over `base` at the top level. Keys present in `overlay`
/// win; non-object operands resolve to `overlay`.
pub fn merge_objects(base: &Payload, overlay: &Payload) -> Payload {
    match (base, overlay) {
        (Payload::Object(base), Payload::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Payload::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{freeze, merge_objects};

    #[test]
    fn freeze_is_a_deep_copy() {
        let original = json!({"a": {"b": [1, 2, 3]}});
        let mut frozen = freeze(&original);
        frozen["a"]["b"][0] = json!(99);
        assert_eq!(original["a"]["b"][0], json!(1));
    }

    #[test]
    fn overlay_keys_win() {
        let base = json!({"phase": "check", "foo": 1, "bar": 2});
        let overlay = json!({"foo": "bar"});
        let merged = merge_objects(&base, &overlay);
        assert_eq!(merged, json!({"phase": "check", "foo": "bar", "bar": 2}));
    }

    #[test]
    fn non_object_overlay_replaces() {
        let merged = merge_objects(&json!({"a": 1}), &json!(42));
        assert_eq!(merged, json!(42));
    }
}
