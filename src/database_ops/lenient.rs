//! Tolerant field decoders for provider payloads that mix strings, numbers and
//! empty placeholders for the same field.
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Number or numeric string; blanks, nulls and anything else become `None`.
pub fn opt_i64<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(value_to_i64(&v))
}

/// Non-empty string (numbers are stringified); blanks and nulls become `None`.
pub fn opt_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Tag object `{tag: weight}`; SteamSpy sends `[]` when an app has no tags.
pub fn tag_map<'de, D>(de: D) -> Result<BTreeMap<String, i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    let Value::Object(map) = v else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(tag, weight)| value_to_i64(&weight).map(|w| (tag, w)))
        .collect())
}
