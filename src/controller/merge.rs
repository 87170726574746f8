//! # Desired-State Merge
//!
//! Recursive structural merge of a desired fragment into an existing remote
//! document.
//!
//! - Objects merge key by key.
//! - A `names` array directly under a key ending in `Selector` is an ordered
//!   set: base entries first, then overlay entries not yet present.
//! - Anything else in the overlay replaces the base value.

use serde_json::{Map, Value};

const SELECTOR_SUFFIX: &str = "Selector";
const SELECTOR_NAMES_KEY: &str = "names";

/// Merge `overlay` into `base`, returning the combined document
#[must_use]
pub fn merge(base: &Value, overlay: &Value) -> Value {
    merge_under(None, base, overlay)
}

fn merge_under(parent_key: Option<&str>, base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            let selector_scope = parent_key.is_some_and(|k| k.ends_with(SELECTOR_SUFFIX));

            for (key, overlay_value) in overlay_map {
                let value = match base_map.get(key) {
                    Some(Value::Array(base_items))
                        if selector_scope && key == SELECTOR_NAMES_KEY =>
                    {
                        match overlay_value {
                            Value::Array(overlay_items) => union(base_items, overlay_items),
                            other => other.clone(),
                        }
                    }
                    Some(base_value) => merge_under(Some(key), base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn union(base: &[Value], overlay: &[Value]) -> Value {
    let mut items: Vec<Value> = Vec::with_capacity(base.len() + overlay.len());
    for item in base.iter().chain(overlay) {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
    Value::Array(items)
}
