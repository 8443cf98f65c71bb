//! Repair of nested iteration records
//!
//! A bug in older releases stored a whole iteration record where a backend's
//! output record belonged, sometimes several levels deep:
//!
//! ```json
//! {"_type": "IterationRecord", "extra_keys": {"a": 1}, "output_records": {
//!     "birdsite": {"_type": "IterationRecord", "extra_keys": {"b": 2}, "output_records": {
//!         "birdsite": {"_type": "TweetRecord", "tweet_id": "1"}}}}}
//! ```
//!
//! [`repair_entry`] unwraps every such chain down to the real output record
//! and hoists the `extra_keys` found on the way to the top-level record.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backends::BackendKind;
use crate::records::{EXTRA_KEYS_KEY, ITERATION_TYPE, OUTPUT_RECORDS_KEY, TYPE_KEY};

fn is_iteration(value: &Value) -> bool {
    value.as_object().is_some_and(is_iteration_map)
}

fn is_iteration_map(map: &Map<String, Value>) -> bool {
    map.get(TYPE_KEY).and_then(Value::as_str) == Some(ITERATION_TYPE)
}

/// Whether `entry` carries a nested iteration record under `output_records`
pub fn needs_repair(entry: &Value) -> bool {
    if !is_iteration(entry) {
        return false;
    }
    match entry.get(OUTPUT_RECORDS_KEY).and_then(Value::as_object) {
        Some(outputs) => outputs.values().any(is_iteration),
        None => false,
    }
}

/// Undo the nesting corruption on one raw history entry
///
/// Entries that are not iteration records, or carry no nesting, come back
/// unchanged. Every backend key is scanned, not only birdsite. Running the
/// repair on its own output changes nothing.
pub fn repair_entry(entry: Value) -> Value {
    if !needs_repair(&entry) {
        return entry;
    }

    let mut top = match entry {
        Value::Object(map) => map,
        other => return other,
    };
    let mut outputs = match top.remove(OUTPUT_RECORDS_KEY) {
        Some(Value::Object(outputs)) => outputs,
        _ => Map::new(),
    };

    let mut hoisted: Vec<Map<String, Value>> = Vec::new();
    let keys: Vec<String> = outputs.keys().cloned().collect();
    for key in keys {
        let Some(value) = outputs.remove(&key) else {
            continue;
        };
        let value = if is_iteration(&value) {
            let (record, depth) = unwrap_nested(&key, value, &mut hoisted);
            debug!(backend = %key, depth, "Repaired nested iteration record");
            record
        } else {
            value
        };
        outputs.insert(key, value);
    }

    match top.get_mut(EXTRA_KEYS_KEY) {
        Some(Value::Object(extra_keys)) => merge_hoisted(extra_keys, hoisted),
        None | Some(Value::Null) => {
            let mut extra_keys = Map::new();
            merge_hoisted(&mut extra_keys, hoisted);
            top.insert(EXTRA_KEYS_KEY.to_string(), Value::Object(extra_keys));
        }
        // Not a map: it stays as found and the hoisted keys have nowhere to go.
        Some(other) => {
            let dropped: Vec<String> = hoisted
                .into_iter()
                .flat_map(|level| level.into_iter().map(|(name, _)| name))
                .collect();
            if !dropped.is_empty() {
                warn!(
                    found = %other,
                    ?dropped,
                    "Top-level extra_keys is not a map, dropping keys hoisted from nested records"
                );
            }
        }
    }

    top.insert(OUTPUT_RECORDS_KEY.to_string(), Value::Object(outputs));
    Value::Object(top)
}

/// Add hoisted keys without overwriting what is already there
fn merge_hoisted(extra_keys: &mut Map<String, Value>, hoisted: Vec<Map<String, Value>>) {
    for level in hoisted {
        for (name, value) in level {
            extra_keys.entry(name).or_insert(value);
        }
    }
}

/// Walk down a chain of iteration records stored under `key`
///
/// Returns the innermost output record, re-tagged, and the number of levels
/// unwrapped. `extra_keys` of each level are pushed onto `hoisted`,
/// shallowest first.
fn unwrap_nested(
    key: &str,
    mut current: Value,
    hoisted: &mut Vec<Map<String, Value>>,
) -> (Value, usize) {
    let mut depth = 0;

    loop {
        let mut level = match current {
            Value::Object(map) if is_iteration_map(&map) => map,
            other => {
                current = other;
                break;
            }
        };
        depth += 1;

        if let Some(Value::Object(extra)) = level.remove(EXTRA_KEYS_KEY) {
            hoisted.push(extra);
        }

        let inner = match level.get_mut(OUTPUT_RECORDS_KEY) {
            Some(Value::Object(outputs)) => match outputs.remove(key) {
                Some(inner @ Value::Object(_)) => Some(inner),
                _ => None,
            },
            _ => None,
        };

        match inner {
            Some(inner) => current = inner,
            None => {
                // Nothing deeper: this level is the closest thing to a record.
                level.remove(OUTPUT_RECORDS_KEY);
                current = Value::Object(level);
                break;
            }
        }
    }

    let mut record = match current {
        Value::Object(map) => map,
        other => return (other, depth),
    };
    if let Some(Value::Object(extra)) = record.remove(EXTRA_KEYS_KEY) {
        hoisted.push(extra);
    }
    let tag = retag(key, record.get(TYPE_KEY));
    record.insert(TYPE_KEY.to_string(), Value::String(tag));

    (Value::Object(record), depth)
}

fn retag(key: &str, current: Option<&Value>) -> String {
    if let Ok(backend) = key.parse::<BackendKind>() {
        return backend.record_kind().as_str().to_string();
    }
    match current.and_then(Value::as_str) {
        Some(tag) if tag != ITERATION_TYPE => tag.to_string(),
        _ => "OutputRecord".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Build a corrupted entry nesting `depth` iteration records under birdsite
    fn corrupted(depth: usize) -> Value {
        let mut inner = json!({
            "_type": "TweetRecord",
            "timestamp": "2018-01-01T00:00:00.000000",
            "tweet_id": "1",
            "text": "deep"
        });
        for level in (1..=depth).rev() {
            inner = json!({
                "_type": "IterationRecord",
                "timestamp": format!("2018-01-01T00:00:0{}.000000", level % 10),
                "extra_keys": {
                    format!("level{}", level): level,
                    "shared": level
                },
                "output_records": {"birdsite": inner}
            });
        }
        json!({
            "_type": "IterationRecord",
            "timestamp": "2018-01-01T00:00:00.000000",
            "extra_keys": {"shared": 0},
            "output_records": {"birdsite": inner}
        })
    }

    fn contains_iteration_tag(value: &Value) -> bool {
        match value {
            Value::Object(map) => {
                map.get(TYPE_KEY).and_then(Value::as_str) == Some(ITERATION_TYPE)
                    || map.values().any(contains_iteration_tag)
            }
            Value::Array(items) => items.iter().any(contains_iteration_tag),
            _ => false,
        }
    }

    #[test]
    fn test_non_iteration_entries_are_untouched() {
        let legacy = json!({"text": "hello", "tweet_id": "42"});
        assert_eq!(repair_entry(legacy.clone()), legacy);

        let scalar = json!(5);
        assert_eq!(repair_entry(scalar.clone()), scalar);
    }

    #[test]
    fn test_canonical_entries_are_untouched() {
        let entry = json!({
            "_type": "IterationRecord",
            "timestamp": "2018-01-01T00:00:00.000000",
            "extra_keys": {},
            "output_records": {"birdsite": {"_type": "TweetRecord", "tweet_id": "1"}}
        });
        assert!(!needs_repair(&entry));
        assert_eq!(repair_entry(entry.clone()), entry);
    }

    #[test]
    fn test_iteration_without_outputs_is_untouched() {
        let entry = json!({"_type": "IterationRecord", "timestamp": "x"});
        assert_eq!(repair_entry(entry.clone()), entry);
    }

    #[test]
    fn test_repairs_single_level() {
        let repaired = repair_entry(corrupted(1));

        let birdsite = &repaired["output_records"]["birdsite"];
        assert_eq!(birdsite["_type"], json!("TweetRecord"));
        assert_eq!(birdsite["tweet_id"], json!("1"));
        assert_eq!(birdsite["text"], json!("deep"));
        assert!(birdsite.get("extra_keys").is_none());
        assert!(birdsite.get("output_records").is_none());

        assert_eq!(repaired["extra_keys"]["level1"], json!(1));
        assert_eq!(repaired["extra_keys"]["shared"], json!(0), "outer value wins");
    }

    #[test]
    fn test_repairs_any_depth() {
        for depth in [1, 2, 5, 50] {
            let repaired = repair_entry(corrupted(depth));
            let birdsite = &repaired["output_records"]["birdsite"];

            assert!(!contains_iteration_tag(birdsite), "depth {}", depth);
            assert_eq!(birdsite["tweet_id"], json!("1"));
            for level in 1..=depth {
                assert_eq!(repaired["extra_keys"][format!("level{}", level)], json!(level));
            }
            assert_eq!(repaired["extra_keys"]["shared"], json!(0));
        }
    }

    #[test]
    fn test_shallower_extra_keys_win() {
        let mut entry = corrupted(3);
        entry["extra_keys"] = json!({});

        let repaired = repair_entry(entry);
        assert_eq!(repaired["extra_keys"]["shared"], json!(1));
    }

    #[test]
    fn test_null_extra_keys_receive_hoisted_keys() {
        let mut entry = corrupted(2);
        entry["extra_keys"] = Value::Null;

        let repaired = repair_entry(entry);
        assert_eq!(repaired["extra_keys"]["level1"], json!(1));
        assert_eq!(repaired["extra_keys"]["level2"], json!(2));
        assert_eq!(repaired["extra_keys"]["shared"], json!(1));
    }

    #[test]
    fn test_non_map_extra_keys_are_left_as_found() {
        let mut entry = corrupted(2);
        entry["extra_keys"] = json!("seed=3");

        let repaired = repair_entry(entry);
        assert_eq!(repaired["extra_keys"], json!("seed=3"));
        assert_eq!(repaired["output_records"]["birdsite"]["tweet_id"], json!("1"));
    }

    #[test]
    fn test_repair_is_idempotent() {
        for depth in [1, 3, 10] {
            let once = repair_entry(corrupted(depth));
            let twice = repair_entry(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_deep_nesting_terminates() {
        let repaired = repair_entry(corrupted(2_000));
        assert_eq!(repaired["output_records"]["birdsite"]["tweet_id"], json!("1"));
    }

    #[test]
    fn test_innermost_extra_keys_are_hoisted() {
        let entry = json!({
            "_type": "IterationRecord",
            "extra_keys": {},
            "output_records": {"birdsite": {
                "_type": "IterationRecord",
                "output_records": {"birdsite": {
                    "_type": "TweetRecord",
                    "tweet_id": "9",
                    "extra_keys": {"inner": true}
                }}
            }}
        });

        let repaired = repair_entry(entry);
        assert_eq!(repaired["extra_keys"]["inner"], json!(true));
        assert!(repaired["output_records"]["birdsite"].get("extra_keys").is_none());
    }

    #[test]
    fn test_untagged_innermost_is_retagged() {
        let entry = json!({
            "_type": "IterationRecord",
            "output_records": {"birdsite": {
                "_type": "IterationRecord",
                "output_records": {"birdsite": {"tweet_id": "3"}}
            }}
        });

        let repaired = repair_entry(entry);
        assert_eq!(repaired["output_records"]["birdsite"]["_type"], json!("TweetRecord"));
        assert_eq!(repaired["extra_keys"], json!({}));
    }

    #[test]
    fn test_level_without_inner_record_becomes_record() {
        let entry = json!({
            "_type": "IterationRecord",
            "extra_keys": {},
            "output_records": {"birdsite": {
                "_type": "IterationRecord",
                "timestamp": "2018-01-01T00:00:00.000000",
                "extra_keys": {"lost": "found"},
                "output_records": {}
            }}
        });

        let repaired = repair_entry(entry);
        let birdsite = &repaired["output_records"]["birdsite"];
        assert_eq!(birdsite["_type"], json!("TweetRecord"));
        assert_eq!(birdsite["timestamp"], json!("2018-01-01T00:00:00.000000"));
        assert!(birdsite.get("output_records").is_none());
        assert_eq!(repaired["extra_keys"]["lost"], json!("found"));
    }

    #[test]
    fn test_repairs_other_backends_too() {
        let entry = json!({
            "_type": "IterationRecord",
            "extra_keys": {},
            "output_records": {
                "birdsite": {"_type": "TweetRecord", "tweet_id": "1"},
                "mastodon": {
                    "_type": "IterationRecord",
                    "extra_keys": {"m": 1},
                    "output_records": {"mastodon": {"_type": "TootRecord", "toot_id": "2"}}
                }
            }
        });

        let repaired = repair_entry(entry);
        assert_eq!(repaired["output_records"]["birdsite"]["tweet_id"], json!("1"));
        assert_eq!(repaired["output_records"]["mastodon"]["_type"], json!("TootRecord"));
        assert_eq!(repaired["output_records"]["mastodon"]["toot_id"], json!("2"));
        assert_eq!(repaired["extra_keys"]["m"], json!(1));
    }
}
