//! Ordered JSON helpers.
//!
//! All documents Leaf persists keep their insertion order, so the
//! whole workspace goes through these helpers instead of ad-hoc
//! `serde_json` calls. Writes are atomic: temp file in the target
//! directory, then rename.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Insertion-ordered JSON object map.
pub type JsonMap = serde_json::Map<String, Value>;

/// Load a JSON document from disk.
pub fn load_json(path: &Path) -> Result<Value> {
    let data = fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Serialize a JSON value, pretty-printed with 2-space indent when
/// requested, always newline-terminated.
pub fn to_json_string(value: &Value, pretty: bool) -> Result<String> {
    let mut out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    out.push('\n');
    Ok(out)
}

/// Atomically write a JSON document: temp file next to the target,
/// flush, rename.
pub fn write_json(path: &Path, value: &Value, pretty: bool) -> Result<()> {
    let content = to_json_string(value, pretty)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    tmp.flush().map_err(|e| Error::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Deep-merge `layer` into `base`.
///
/// Objects merge recursively; a `null` in the layer deletes the key.
/// Lists append layer entries not already present, preserving order.
/// Everything else overwrites.
pub fn layer_merge(base: &mut Value, layer: &Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, layer_value) in layer_map {
                if layer_value.is_null() {
                    base_map.remove(key);
                } else if let Some(base_value) = base_map.get_mut(key) {
                    layer_merge(base_value, layer_value);
                } else {
                    base_map.insert(key.clone(), layer_value.clone());
                }
            }
        }
        (Value::Array(base_list), Value::Array(layer_list)) => {
            for item in layer_list {
                if !base_list.contains(item) {
                    base_list.push(item.clone());
                }
            }
        }
        (base, layer) => *base = layer.clone(),
    }
}

/// Read a string entry out of an ordered map.
pub fn get_str<'a>(map: &'a JsonMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

/// Collect the string pairs of an ordered map, skipping non-string
/// values.
#[must_use]
pub fn string_pairs(map: &JsonMap) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn merge_objects_recursively() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        layer_merge(&mut base, &json!({"nested": {"y": 3, "z": 4}, "b": 2}));
        assert_eq!(base, json!({"a": 1, "nested": {"x": 1, "y": 3, "z": 4}, "b": 2}));
    }

    #[test]
    fn merge_null_deletes() {
        let mut base = json!({"a": 1, "b": 2});
        layer_merge(&mut base, &json!({"a": null}));
        assert_eq!(base, json!({"b": 2}));
    }

    #[test]
    fn merge_lists_append_unique() {
        let mut base = json!({"tags": ["a", "b"]});
        layer_merge(&mut base, &json!({"tags": ["b", "c"]}));
        assert_eq!(base, json!({"tags": ["a", "b", "c"]}));
    }

    #[test]
    fn merge_scalar_overwrites() {
        let mut base = json!({"a": "old"});
        layer_merge(&mut base, &json!({"a": "new"}));
        assert_eq!(base, json!({"a": "new"}));
    }

    #[test]
    fn write_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = json!({"zebra": 1, "alpha": 2, "mid": {"b": 1, "a": 2}});
        write_json(&path, &doc, true).unwrap();
        let loaded = load_json(&path).unwrap();
        assert_eq!(loaded, doc);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("zebra").unwrap() < text.find("alpha").unwrap());
    }
}
