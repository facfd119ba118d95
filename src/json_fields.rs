//! Lookups that tolerate the two key spellings exporters have used over time
//! (`matTile` vs `MatTile`, `layers` vs `Layers`, ...).

use serde_json::Value;

/// Depot paths and override selectors use this literal for "unset".
pub const NULL_SENTINEL: &str = "null";

/// First candidate key present with a non-null value.
pub fn field<'a>(obj: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

pub fn root_chunk(doc: &Value) -> Option<&Value> {
    doc.get("Data").and_then(|d| d.get("RootChunk"))
}

/// Accepts a bare string or a `{"$value": "..."}` wrapper.
pub fn string_value(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => v.get("$value").and_then(|s| s.as_str()),
        _ => None,
    }
}

/// Accepts `{"DepotPath": {"$value": "..."}}`, `{"$value": "..."}` or a
/// bare string.
pub fn depot_path(v: &Value) -> Option<&str> {
    if let Some(dp) = v.get("DepotPath") {
        return string_value(dp);
    }
    string_value(v)
}

pub fn depot_path_field(obj: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(depot_path)
        .map(|s| s.to_string())
}

pub fn selector_field(obj: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(string_value)
        .map(|s| s.to_string())
}

pub fn is_null_path(path: &str) -> bool {
    let p = path.trim();
    p.is_empty() || p == NULL_SENTINEL
}

/// Numbers, or strings holding a float.
pub fn number(v: &Value) -> Option<f32> {
    match v {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

/// Absent fields are `None`; present but malformed ones are logged and
/// also treated as absent so the caller's default applies.
pub fn opt_f32_field(obj: &Value, candidates: &[&str], context: &str) -> Option<f32> {
    let v = field(obj, candidates)?;
    match number(v) {
        Some(n) if n.is_finite() => Some(n),
        _ => {
            log::warn!(
                "{}: field '{}' is not a number ({}), using default",
                context,
                candidates.first().copied().unwrap_or_default(),
                v
            );
            None
        }
    }
}

pub fn f32_field(obj: &Value, candidates: &[&str], default: f32, context: &str) -> f32 {
    opt_f32_field(obj, candidates, context).unwrap_or(default)
}

/// `{"Elements": [..]}` with at least `n` numbers, or a scalar broadcast to
/// `n` components.
pub fn elements(v: &Value, n: usize) -> Option<Vec<f32>> {
    if let Some(arr) = v.get("Elements").and_then(|e| e.as_array()) {
        let out: Vec<f32> = arr.iter().take(n).filter_map(number).collect();
        return (out.len() == n).then_some(out);
    }
    number(v).map(|s| vec![s; n])
}
