//! Decoding of history entries, lifting legacy records on the way
//!
//! Before multi-backend support the history file held bare birdsite records
//! with no `_type`. Those are wrapped in an [`IterationRecord`] here;
//! everything tagged as an iteration record is decoded as is.

use serde_json::{Map, Value};

use super::dismantle;
use crate::backends::BackendKind;
use crate::error::HistoryError;
use crate::records::{IterationRecord, OutputRecord, EXTRA_KEYS_KEY, ITERATION_TYPE, TYPE_KEY};

/// How a decoded entry was stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Already an iteration record
    Canonical,
    /// Bare birdsite record from before multi-backend support
    Legacy,
}

/// Decode one repaired history entry
///
/// # Errors
///
/// Returns `HistoryError::InvalidEntry` when the entry is not a JSON object.
pub fn decode_entry(entry: Value) -> Result<(IterationRecord, Origin), HistoryError> {
    let map = match entry {
        Value::Object(map) => map,
        other => {
            let found = json_type_name(&other);
            dismantle(other);
            return Err(HistoryError::InvalidEntry(format!(
                "expected a JSON object, found {}",
                found
            )));
        }
    };

    if map.get(TYPE_KEY).and_then(Value::as_str) == Some(ITERATION_TYPE) {
        Ok((IterationRecord::from_map(map), Origin::Canonical))
    } else {
        Ok((lift_legacy(map), Origin::Legacy))
    }
}

/// Wrap a legacy birdsite record in an iteration record
///
/// `extra_keys` move up to the iteration record, and so does the timestamp.
pub fn lift_legacy(mut map: Map<String, Value>) -> IterationRecord {
    let extra_keys = match map.remove(EXTRA_KEYS_KEY) {
        Some(Value::Object(extra_keys)) => extra_keys,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            // Keep odd values with the record instead of dropping them.
            map.insert(EXTRA_KEYS_KEY.to_string(), other);
            Map::new()
        }
    };

    let birdsite = BackendKind::Birdsite;
    let output = OutputRecord::from_map(map, birdsite.record_kind());
    IterationRecord::from_legacy(output, extra_keys)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
