//! History record types
//!
//! Two record shapes are persisted: an [`OutputRecord`] describes what one
//! backend did for one post, and an [`IterationRecord`] bundles the output
//! records of every backend for a single post action.
//!
//! Both types model the fields they understand explicitly and keep every
//! other key in an `unknown` side bag, so fields written by older or newer
//! versions survive a load/save cycle untouched.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::backends::BackendKind;
use crate::error::BackendError;

/// Key holding the record discriminator
pub const TYPE_KEY: &str = "_type";

/// Discriminator of an [`IterationRecord`]
pub const ITERATION_TYPE: &str = "IterationRecord";

/// Key of the user metadata map on an iteration record
pub const EXTRA_KEYS_KEY: &str = "extra_keys";

/// Key of the per-backend map on an iteration record
pub const OUTPUT_RECORDS_KEY: &str = "output_records";

const TIMESTAMP_KEY: &str = "timestamp";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const ID_KEYS: [&str; 3] = ["post_id", "tweet_id", "toot_id"];

/// Current local time in the history file's timestamp format
pub fn now_timestamp() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a history timestamp
///
/// Accepts naive ISO-8601 (`2018-05-01T12:34:56.123456`, fraction optional)
/// and RFC 3339 with an offset, which is converted to local time.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Local).naive_local())
}

// ============================================================================
// Discriminators and identifiers
// ============================================================================

/// Discriminator of an output record (`_type` on disk)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Birdsite result
    Tweet,
    /// Mastodon result
    Toot,
    /// Generic result with no backend-specific fields
    Output,
    /// Tag this version does not know; kept verbatim
    Other(String),
}

impl RecordKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "TweetRecord" => Self::Tweet,
            "TootRecord" => Self::Toot,
            "OutputRecord" => Self::Output,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Tweet => "TweetRecord",
            Self::Toot => "TootRecord",
            Self::Output => "OutputRecord",
            Self::Other(tag) => tag,
        }
    }

    /// Key the post id is written under for this kind
    pub fn id_key(&self) -> &'static str {
        match self {
            Self::Tweet => "tweet_id",
            Self::Toot => "toot_id",
            Self::Output | Self::Other(_) => "post_id",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier of a post on a remote service
///
/// Older history files stored ids as JSON integers, newer ones as strings.
/// The original representation is kept so rewriting a file does not change it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostId {
    Numeric(u64),
    Text(String),
}

impl PostId {
    pub fn to_value(&self) -> Value {
        match self {
            PostId::Numeric(id) => Value::from(*id),
            PostId::Text(id) => Value::String(id.clone()),
        }
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Numeric(id) => write!(f, "{}", id),
            PostId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        PostId::Text(id.to_string())
    }
}

impl From<String> for PostId {
    fn from(id: String) -> Self {
        PostId::Text(id)
    }
}

impl From<u64> for PostId {
    fn from(id: u64) -> Self {
        PostId::Numeric(id)
    }
}

impl PartialEq<str> for PostId {
    fn eq(&self, other: &str) -> bool {
        match self {
            PostId::Text(id) => id == other,
            PostId::Numeric(id) => id.to_string() == other,
        }
    }
}

impl PartialEq<&str> for PostId {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

// ============================================================================
// Output Record
// ============================================================================

/// Result of one backend for one post attempt
///
/// A completed attempt carries either `post_id` or `error`, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub kind: RecordKind,
    timestamp: String,
    pub post_id: Option<PostId>,
    pub text: Option<String>,
    pub files: Option<Vec<String>>,
    pub media_ids: Option<Vec<Value>>,
    pub captions: Option<Vec<String>>,
    pub in_reply_to: Option<PostId>,
    pub error: Option<Value>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    /// Follow-up posts when a media post was split into several
    pub thread: Vec<OutputRecord>,
    /// Fields this version does not model
    pub unknown: Map<String, Value>,
}

impl OutputRecord {
    /// Create an empty record stamped with the current time
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            timestamp: now_timestamp(),
            post_id: None,
            text: None,
            files: None,
            media_ids: None,
            captions: None,
            in_reply_to: None,
            error: None,
            error_code: None,
            error_message: None,
            thread: Vec::new(),
            unknown: Map::new(),
        }
    }

    /// Create an empty record tagged for the given backend
    pub fn for_backend(backend: BackendKind) -> Self {
        Self::new(backend.record_kind())
    }

    /// Record a successful post
    pub fn success(backend: BackendKind, post_id: impl Into<PostId>, text: Option<&str>) -> Self {
        let mut record = Self::for_backend(backend);
        record.post_id = Some(post_id.into());
        record.text = text.map(str::to_string);
        record
    }

    /// Record a failed attempt
    pub fn failure(backend: BackendKind, error: &BackendError) -> Self {
        let mut record = Self::for_backend(backend);
        record.error = Some(Value::String(error.to_string()));
        record.error_message = Some(error.message().to_string());
        record.error_code = error.code();
        record
    }

    pub fn with_text(mut self, text: Option<&str>) -> Self {
        self.text = text.map(str::to_string);
        self
    }

    pub fn with_media(
        mut self,
        files: &[String],
        media_ids: Vec<Value>,
        captions: &[String],
    ) -> Self {
        self.files = Some(files.to_vec());
        self.media_ids = Some(media_ids);
        self.captions = Some(captions.to_vec());
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: Option<PostId>) -> Self {
        self.in_reply_to = in_reply_to;
        self
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }

    pub fn is_success(&self) -> bool {
        self.post_id.is_some() && self.error.is_none()
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Human-readable error, preferring the short message over the payload
    pub fn error_summary(&self) -> Option<String> {
        if let Some(message) = &self.error_message {
            return Some(message.clone());
        }
        self.error.as_ref().map(|error| match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    }

    /// Rebuild a record from a persisted JSON object
    ///
    /// `default_kind` applies when the object carries no string `_type`.
    /// Known keys holding a value of an unexpected type stay in `unknown`.
    pub fn from_map(mut map: Map<String, Value>, default_kind: RecordKind) -> Self {
        let kind = take_field::<String>(&mut map, TYPE_KEY)
            .map(|tag| RecordKind::from_tag(&tag))
            .unwrap_or(default_kind);
        let timestamp = take_timestamp(&mut map);

        // Aliases only fill an absent id key, never a mistyped one.
        let mut post_id = take_field::<PostId>(&mut map, kind.id_key());
        if post_id.is_none() && !map.contains_key(kind.id_key()) {
            post_id = ID_KEYS
                .iter()
                .filter(|key| **key != kind.id_key())
                .find_map(|key| take_field::<PostId>(&mut map, key));
        }

        let thread = take_field::<Vec<Map<String, Value>>>(&mut map, "thread")
            .unwrap_or_default()
            .into_iter()
            .map(|item| OutputRecord::from_map(item, kind.clone()))
            .collect();

        Self {
            post_id,
            text: take_field(&mut map, "text"),
            files: take_field(&mut map, "files"),
            media_ids: take_field(&mut map, "media_ids"),
            captions: take_field(&mut map, "captions"),
            in_reply_to: take_field(&mut map, "in_reply_to"),
            error: take_field(&mut map, "error"),
            error_code: take_field(&mut map, "error_code"),
            error_message: take_field(&mut map, "error_message"),
            thread,
            kind,
            timestamp,
            unknown: map,
        }
    }

    /// Flatten the record into a plain JSON object
    ///
    /// Keys in `unknown` are written last, so a mistyped value goes back to
    /// disk exactly as it was read.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(self.kind.as_str().to_string()));
        map.insert(TIMESTAMP_KEY.to_string(), Value::String(self.timestamp.clone()));

        if let Some(post_id) = &self.post_id {
            map.insert(self.kind.id_key().to_string(), post_id.to_value());
        }
        if let Some(text) = &self.text {
            map.insert("text".to_string(), Value::String(text.clone()));
        }
        if let Some(files) = &self.files {
            map.insert("files".to_string(), Value::from(files.clone()));
        }
        if let Some(media_ids) = &self.media_ids {
            map.insert("media_ids".to_string(), Value::Array(media_ids.clone()));
        }
        if let Some(captions) = &self.captions {
            map.insert("captions".to_string(), Value::from(captions.clone()));
        }
        if let Some(in_reply_to) = &self.in_reply_to {
            map.insert("in_reply_to".to_string(), in_reply_to.to_value());
        }
        if let Some(error) = &self.error {
            map.insert("error".to_string(), error.clone());
        }
        if let Some(code) = self.error_code {
            map.insert("error_code".to_string(), Value::from(code));
        }
        if let Some(message) = &self.error_message {
            map.insert("error_message".to_string(), Value::String(message.clone()));
        }
        if !self.thread.is_empty() {
            let thread = self
                .thread
                .iter()
                .map(|record| Value::Object(record.to_map()))
                .collect();
            map.insert("thread".to_string(), Value::Array(thread));
        }

        map.extend(self.unknown.clone());
        map
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

// ============================================================================
// Iteration Record
// ============================================================================

/// One post action across every backend
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    timestamp: String,
    pub extra_keys: Map<String, Value>,
    pub output_records: BTreeMap<BackendKind, OutputRecord>,
    /// Entries under `output_records` for backends this version does not know
    pub other_outputs: Map<String, Value>,
    /// Top-level fields this version does not model
    pub unknown: Map<String, Value>,
}

impl Default for IterationRecord {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl IterationRecord {
    /// Create an empty record stamped with the current time
    ///
    /// The record takes ownership of `extra_keys`; pass a clone to keep a
    /// caller-side copy.
    pub fn new(extra_keys: Map<String, Value>) -> Self {
        Self {
            timestamp: now_timestamp(),
            extra_keys,
            output_records: BTreeMap::new(),
            other_outputs: Map::new(),
            unknown: Map::new(),
        }
    }

    /// Wrap a pre multi-backend birdsite record
    ///
    /// The iteration inherits the output record's timestamp.
    pub fn from_legacy(output: OutputRecord, extra_keys: Map<String, Value>) -> Self {
        let mut record = Self::new(extra_keys);
        record.timestamp = output.timestamp.clone();
        record.output_records.insert(BackendKind::Birdsite, output);
        record
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }

    /// Store the result of a backend, replacing any earlier one
    pub fn insert_output(
        &mut self,
        backend: BackendKind,
        record: OutputRecord,
    ) -> Option<OutputRecord> {
        self.output_records.insert(backend, record)
    }

    pub fn output(&self, backend: BackendKind) -> Option<&OutputRecord> {
        self.output_records.get(&backend)
    }

    /// Rebuild a canonical record from a persisted JSON object
    ///
    /// As with output records, mistyped known keys stay in `unknown`.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let _ = take_field::<String>(&mut map, TYPE_KEY);
        let timestamp = take_timestamp(&mut map);
        let extra_keys =
            take_field::<Map<String, Value>>(&mut map, EXTRA_KEYS_KEY).unwrap_or_default();

        let mut output_records = BTreeMap::new();
        let mut other_outputs = Map::new();
        let raw_outputs =
            take_field::<Map<String, Value>>(&mut map, OUTPUT_RECORDS_KEY).unwrap_or_default();
        for (name, value) in raw_outputs {
            match (name.parse::<BackendKind>(), value) {
                (Ok(backend), Value::Object(fields)) => {
                    let record = OutputRecord::from_map(fields, backend.record_kind());
                    output_records.insert(backend, record);
                }
                (_, value) => {
                    other_outputs.insert(name, value);
                }
            }
        }

        Self {
            timestamp,
            extra_keys,
            output_records,
            other_outputs,
            unknown: map,
        }
    }

    /// Flatten the record, output records included, into a plain JSON object
    pub fn to_map(&self) -> Map<String, Value> {
        let mut outputs = self.other_outputs.clone();
        for (backend, record) in &self.output_records {
            outputs.insert(backend.name().to_string(), Value::Object(record.to_map()));
        }

        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(ITERATION_TYPE.to_string()));
        map.insert(TIMESTAMP_KEY.to_string(), Value::String(self.timestamp.clone()));
        map.insert(EXTRA_KEYS_KEY.to_string(), Value::Object(self.extra_keys.clone()));
        map.insert(OUTPUT_RECORDS_KEY.to_string(), Value::Object(outputs));
        map.extend(self.unknown.clone());
        map
    }
}

impl Serialize for IterationRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

/// Remove the timestamp from `map`
///
/// A timestamp that is not a string stays in the side bag; the record then
/// reports its JSON text.
fn take_timestamp(map: &mut Map<String, Value>) -> String {
    match take_field::<String>(map, TIMESTAMP_KEY) {
        Some(timestamp) => timestamp,
        None => map
            .get(TIMESTAMP_KEY)
            .map(Value::to_string)
            .unwrap_or_else(now_timestamp),
    }
}

/// Remove `key` from `map` and decode it
///
/// A JSON `null` counts as absent. A value that does not decode as `T` is put
/// back so the caller's side bag keeps it.
fn take_field<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    match map.remove(key) {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<T>(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(_) => {
                map.insert(key.to_string(), value);
                None
            }
        },
    }
}
