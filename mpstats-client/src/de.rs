//! Lenient deserializers for upstream JSON that mixes numbers and numeric strings.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Int(i64),
    Num(f64),
    Str(String),
    Other(serde_json::Value),
}

impl NumOrStr {
    fn as_f64(self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(i as f64),
            Self::Num(n) => Some(n),
            Self::Str(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            Self::Other(_) => None,
        }
    }
}

pub fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<NumOrStr>::deserialize(deserializer)?;
    Ok(v.and_then(NumOrStr::as_f64).filter(|n| n.is_finite()))
}

pub fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<NumOrStr>::deserialize(deserializer)?;
    Ok(v.and_then(|v| match v {
        NumOrStr::Int(i) => Some(i),
        other => other.as_f64().filter(|n| n.is_finite()).map(|n| n.round() as i64),
    }))
}

pub fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<NumOrStr>::deserialize(deserializer)?;
    let out = v.and_then(|val| match val {
        NumOrStr::Str(s) => Some(s),
        NumOrStr::Int(i) => Some(i.to_string()),
        NumOrStr::Num(f) => {
            let mut s = f.to_string();
            if s.ends_with(".0") {
                s.truncate(s.len() - 2);
            }
            Some(s)
        }
        NumOrStr::Other(_) => None,
    });
    Ok(out
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Shortens an upstream body for logs and error messages.
pub fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 220;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}
