//! List payload: the body of `p:"l"`/`p:"lp"` packets. A mapping from
//! relative path to `{s: size, c?: hash}`; a size of -1 denotes deletion.

use std::collections::BTreeMap;

use crate::json::{self, JsonError, Value};

/// One entry in a list payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Byte size, or -1 for a deletion tombstone.
    pub size: i64,
    /// Advisory SHA-1 hex digest, present only when checksums are enabled.
    pub hash: Option<String>,
}

impl ListEntry {
    #[must_use]
    pub fn tombstone() -> Self {
        Self {
            size: -1,
            hash: None,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.size < 0
    }
}

/// An ordered list payload. `BTreeMap` keeps encoding deterministic, which
/// matters for the framing codec's round-trip tests.
pub type ListPayload = BTreeMap<String, ListEntry>;

#[must_use]
pub fn encode(list: &ListPayload) -> Vec<u8> {
    let entries = list
        .iter()
        .map(|(path, entry)| {
            let mut fields = vec![("s".to_string(), Value::Str(entry.size.to_string()))];
            if let Some(hash) = &entry.hash {
                fields.push(("c".to_string(), Value::Str(hash.clone())));
            }
            (path.clone(), Value::Map(fields))
        })
        .collect();
    json::encode(&Value::Map(entries)).into_bytes()
}

#[derive(Debug, thiserror::Error)]
pub enum ListDecodeError {
    #[error("json parse error: {0}")]
    Json(#[from] JsonError),
    #[error("list payload is not a JSON object")]
    NotAMap,
    #[error("entry {0} is not a JSON object")]
    EntryNotAMap(String),
    #[error("entry {0} has a malformed size field")]
    BadSize(String),
}

pub fn decode(payload: &[u8]) -> Result<ListPayload, ListDecodeError> {
    let text = String::from_utf8_lossy(payload);
    let value = if text.trim().is_empty() {
        Value::Map(Vec::new())
    } else {
        json::parse(&text)?
    };
    let entries = value.as_map().ok_or(ListDecodeError::NotAMap)?;
    let mut list = ListPayload::new();
    for (path, entry_value) in entries {
        let entry_map = entry_value
            .as_map()
            .ok_or_else(|| ListDecodeError::EntryNotAMap(path.clone()))?;
        let size = entry_map
            .iter()
            .find(|(k, _)| k == "s")
            .and_then(|(_, v)| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| ListDecodeError::BadSize(path.clone()))?;
        let hash = entry_map
            .iter()
            .find(|(k, _)| k == "c")
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string);
        list.insert(path.clone(), ListEntry { size, hash });
    }
    Ok(list)
}
