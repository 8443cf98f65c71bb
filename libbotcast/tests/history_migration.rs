//! History compatibility tests
//!
//! These tests verify that history files written by every earlier version of
//! the bot still load, and that loading then saving converges on one stable
//! canonical file.

use anyhow::Result;
use libbotcast::history::HistoryStore;
use libbotcast::records::{PostId, RecordKind};
use libbotcast::BackendKind;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Two bare birdsite records from before multi-backend support
const LEGACY_ENTRIES: &str = r#"[
  {
    "_type": "TweetRecord",
    "timestamp": "2017-11-12T09:01:02.000003",
    "tweet_id": 929000000000000001,
    "text": "First legacy post",
    "files": null,
    "captions": null,
    "extra_keys": {"word": "gloaming"}
  },
  {
    "_type": "TweetRecord",
    "timestamp": "2017-11-13T09:01:02.000003",
    "tweet_id": 929000000000000002,
    "text": "Second legacy post",
    "extra_keys": {"word": "crepuscular"}
  }
]
"#;

/// The same two posts as iteration records
const HOISTED_ENTRIES: &str = r#"[
  {
    "_type": "IterationRecord",
    "timestamp": "2017-11-12T09:01:02.000003",
    "extra_keys": {"word": "gloaming"},
    "output_records": {
      "birdsite": {
        "_type": "TweetRecord",
        "timestamp": "2017-11-12T09:01:02.000003",
        "tweet_id": 929000000000000001,
        "text": "First legacy post"
      }
    }
  },
  {
    "_type": "IterationRecord",
    "timestamp": "2017-11-13T09:01:02.000003",
    "extra_keys": {"word": "crepuscular"},
    "output_records": {
      "birdsite": {
        "_type": "TweetRecord",
        "timestamp": "2017-11-13T09:01:02.000003",
        "tweet_id": 929000000000000002,
        "text": "Second legacy post"
      }
    }
  }
]
"#;

/// Helper to write `content` as a history file in a fresh directory
fn write_history(content: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("foobot-history.json");
    fs::write(&path, content)?;
    Ok((temp_dir, path))
}

/// Build an entry whose birdsite record is nested `depth` iteration records deep
fn corrupted_entry(depth: usize) -> Value {
    let mut inner = json!({
        "_type": "TweetRecord",
        "timestamp": "2018-02-02T02:02:02.000002",
        "tweet_id": "deep-1",
        "text": "Buried post"
    });
    for level in 0..depth {
        inner = json!({
            "_type": "IterationRecord",
            "timestamp": "2018-02-02T02:02:02.000002",
            "extra_keys": {format!("level{}", level): level},
            "output_records": {"birdsite": inner}
        });
    }
    json!({
        "_type": "IterationRecord",
        "timestamp": "2018-02-02T02:02:02.000001",
        "extra_keys": {},
        "output_records": {"birdsite": inner}
    })
}

/// Build a one-entry history whose birdsite record sits `depth` iteration records deep
///
/// Written out as text, since a `Value` this deep could not be built or dropped
/// on a test thread's stack.
fn deeply_nested_history(depth: usize) -> String {
    let level = r#"{"_type":"IterationRecord","output_records":{"birdsite":"#;
    let mut content = String::with_capacity(depth * (level.len() + 2) + 256);
    content.push_str(r#"[{"_type":"IterationRecord","timestamp":"2018-02-02T02:02:02.000001","#);
    content.push_str(r#""extra_keys":{},"output_records":{"birdsite":"#);
    for _ in 0..depth {
        content.push_str(level);
    }
    content.push_str(r#"{"_type":"TweetRecord","tweet_id":"bottom","extra_keys":{"found":true}}"#);
    for _ in 0..depth {
        content.push_str("}}");
    }
    content.push_str("}}]");
    content
}

#[test]
fn test_legacy_history_matches_hoisted_history() -> Result<()> {
    let (_legacy_dir, legacy_path) = write_history(LEGACY_ENTRIES)?;
    let (_hoisted_dir, hoisted_path) = write_history(HOISTED_ENTRIES)?;

    let mut legacy = HistoryStore::new(&legacy_path);
    let report = legacy.load()?;
    assert_eq!(report.migrated, 2);
    assert!(report.backup.is_none());

    let hoisted = HistoryStore::open(&hoisted_path)?;

    assert_eq!(legacy.len(), 2);
    assert_eq!(legacy.entries(), hoisted.entries());

    let first = legacy.entries()[0].output(BackendKind::Birdsite).unwrap();
    assert_eq!(first.kind, RecordKind::Tweet);
    assert_eq!(first.post_id, Some(PostId::Numeric(929000000000000001)));
    assert_eq!(first.text.as_deref(), Some("First legacy post"));
    assert_eq!(legacy.entries()[0].timestamp(), "2017-11-12T09:01:02.000003");
    assert_eq!(legacy.entries()[1].extra_keys["word"], json!("crepuscular"));

    Ok(())
}

#[test]
fn test_legacy_history_rewrites_to_hoisted_form() -> Result<()> {
    let (_legacy_dir, legacy_path) = write_history(LEGACY_ENTRIES)?;
    let (_hoisted_dir, hoisted_path) = write_history(HOISTED_ENTRIES)?;

    HistoryStore::open(&legacy_path)?.save()?;
    HistoryStore::open(&hoisted_path)?.save()?;

    assert_eq!(fs::read_to_string(&legacy_path)?, fs::read_to_string(&hoisted_path)?);
    Ok(())
}

#[test]
fn test_minimal_legacy_record() -> Result<()> {
    let (_dir, path) = write_history(r#"[{"text": "hello", "tweet_id": "42"}]"#)?;

    let history = HistoryStore::open(&path)?;
    assert_eq!(history.len(), 1);

    let birdsite = history.entries()[0].output(BackendKind::Birdsite).unwrap();
    assert_eq!(birdsite.post_id.as_ref().unwrap(), "42");
    assert_eq!(birdsite.text.as_deref(), Some("hello"));
    Ok(())
}

#[test]
fn test_modern_history_loads_in_order() -> Result<()> {
    let content = json!([
        {
            "_type": "IterationRecord",
            "timestamp": "2018-05-01T12:00:00.000000",
            "extra_keys": {},
            "output_records": {"birdsite": {
                "_type": "TweetRecord",
                "timestamp": "2018-05-01T12:00:00.000001",
                "tweet_id": "1"
            }}
        },
        {
            "_type": "IterationRecord",
            "timestamp": "2018-05-02T12:00:00.000000",
            "extra_keys": {},
            "output_records": {"birdsite": {
                "_type": "TweetRecord",
                "timestamp": "2018-05-02T12:00:00.000001",
                "tweet_id": "2"
            }}
        }
    ]);
    let (_dir, path) = write_history(&content.to_string())?;

    let history = HistoryStore::open(&path)?;
    let ids: Vec<String> = history
        .entries()
        .iter()
        .filter_map(|entry| entry.output(BackendKind::Birdsite))
        .filter_map(|record| record.post_id.as_ref().map(ToString::to_string))
        .collect();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    Ok(())
}

#[test]
fn test_canonical_file_round_trips_byte_for_byte() -> Result<()> {
    let (_dir, path) = write_history(LEGACY_ENTRIES)?;
    HistoryStore::open(&path)?.save()?;
    let canonical = fs::read(&path)?;

    for _ in 0..3 {
        HistoryStore::open(&path)?.save()?;
        assert_eq!(fs::read(&path)?, canonical);
    }
    Ok(())
}

#[test]
fn test_empty_history_file() -> Result<()> {
    let (_dir, path) = write_history("")?;

    let mut history = HistoryStore::new(&path);
    let report = history.load()?;

    assert!(history.is_empty());
    assert_eq!(report.backup, Some(history.backup_path()));
    assert_eq!(fs::read_to_string(history.backup_path())?, "");
    Ok(())
}

#[test]
fn test_truncated_history_is_preserved_in_backup() -> Result<()> {
    let truncated = &HOISTED_ENTRIES[..HOISTED_ENTRIES.len() / 2];
    let (_dir, path) = write_history(truncated)?;

    let mut history = HistoryStore::new(&path);
    history.load()?;
    assert!(history.is_empty());

    history.save()?;
    assert_eq!(fs::read_to_string(&path)?, "[]\n");
    assert_eq!(fs::read_to_string(history.backup_path())?, truncated);
    Ok(())
}

#[test]
fn test_deeply_corrupted_history_is_repaired() -> Result<()> {
    let content = Value::Array(vec![corrupted_entry(1), corrupted_entry(3), corrupted_entry(300)]);
    let (_dir, path) = write_history(&serde_json::to_string(&content)?)?;

    let mut history = HistoryStore::new(&path);
    let report = history.load()?;
    assert_eq!(report.entries, 3);
    assert_eq!(report.repaired, 3);
    assert!(report.backup.is_none());

    for (entry, depth) in history.entries().iter().zip([1usize, 3, 300]) {
        let birdsite = entry.output(BackendKind::Birdsite).unwrap();
        assert_eq!(birdsite.kind, RecordKind::Tweet);
        assert_eq!(birdsite.post_id.as_ref().unwrap(), "deep-1");
        assert!(birdsite.unknown.is_empty());
        assert_eq!(entry.extra_keys.len(), depth);
    }

    history.save()?;
    let saved = fs::read_to_string(&path)?;
    assert_eq!(saved.matches("IterationRecord").count(), 3);

    let before = saved.clone();
    HistoryStore::open(&path)?.save()?;
    assert_eq!(fs::read_to_string(&path)?, before);
    Ok(())
}

#[test]
fn test_history_nested_beyond_the_stack_is_repaired() -> Result<()> {
    let (_dir, path) = write_history(&deeply_nested_history(100_000))?;

    let mut history = HistoryStore::new(&path);
    let report = history.load()?;
    assert_eq!(report.entries, 1);
    assert_eq!(report.repaired, 1);
    assert!(report.backup.is_none());

    let entry = &history.entries()[0];
    let birdsite = entry.output(BackendKind::Birdsite).unwrap();
    assert_eq!(birdsite.kind, RecordKind::Tweet);
    assert_eq!(birdsite.post_id.as_ref().unwrap(), "bottom");
    assert_eq!(entry.extra_keys["found"], json!(true));

    history.save()?;
    let saved = fs::read_to_string(&path)?;
    assert_eq!(saved.matches("IterationRecord").count(), 1);
    Ok(())
}

#[test]
fn test_deep_garbage_is_skipped_after_backup() -> Result<()> {
    let depth = 100_000;
    let content = format!(
        r#"[{{"text": "keep me", "tweet_id": "1"}}, {}{}]"#,
        "[".repeat(depth),
        "]".repeat(depth)
    );
    let (_dir, path) = write_history(&content)?;

    let mut history = HistoryStore::new(&path);
    let report = history.load()?;
    assert_eq!(report.skipped, 1);
    assert_eq!(history.len(), 1);
    assert_eq!(fs::read_to_string(history.backup_path())?, content);

    let not_an_array = format!("{}1{}", r#"{"a":"#.repeat(depth), "}".repeat(depth));
    fs::write(&path, &not_an_array)?;
    let report = history.load()?;
    assert!(history.is_empty());
    assert_eq!(report.backup, Some(history.backup_path()));
    assert_eq!(fs::read_to_string(history.backup_path())?, not_an_array);
    Ok(())
}

#[test]
fn test_unknown_fields_survive_rewrite() -> Result<()> {
    let content = json!([{
        "_type": "IterationRecord",
        "timestamp": "2018-05-01T12:00:00.000000",
        "extra_keys": {"nested": {"a": [1, 2, 3]}},
        "schema_note": "kept",
        "output_records": {
            "mastodon": {
                "_type": "TootRecord",
                "timestamp": "2018-05-01T12:00:00.000001",
                "toot_id": "55",
                "visibility": "unlisted"
            },
            "pigeon": {"_type": "CooRecord", "coo_id": 9}
        }
    }]);
    let (_dir, path) = write_history(&content.to_string())?;

    HistoryStore::open(&path)?.save()?;
    let saved: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;

    assert_eq!(saved, content);
    Ok(())
}

#[test]
fn test_mistyped_fields_survive_rewrite() -> Result<()> {
    let content = json!([{
        "_type": "IterationRecord",
        "timestamp": 1525177200,
        "extra_keys": "seed=3",
        "output_records": {
            "mastodon": {"_type": "TootRecord", "timestamp": 1525177201, "toot_id": "55"}
        }
    }]);
    let (_dir, path) = write_history(&content.to_string())?;

    let history = HistoryStore::open(&path)?;
    assert_eq!(history.entries()[0].timestamp(), "1525177200");
    history.save()?;

    let saved: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(saved, content);
    Ok(())
}

#[test]
fn test_bad_entries_are_skipped_after_backup() -> Result<()> {
    let content = r#"[{"text": "keep me", "tweet_id": "1"}, "garbage", [1, 2]]"#;
    let (_dir, path) = write_history(content)?;

    let mut history = HistoryStore::new(&path);
    let report = history.load()?;

    assert_eq!(report.skipped, 2);
    assert_eq!(history.len(), 1);
    assert_eq!(fs::read_to_string(history.backup_path())?, content);
    Ok(())
}
