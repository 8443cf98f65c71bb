//! Multi-backend posting orchestration
//!
//! This module posts the same content to every active backend concurrently
//! and records one output record per backend in the history.

use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::backends::{Backend, BackendKind};
use crate::config::BotConfig;
use crate::error::{BackendError, BotcastError, ConfigError, Result};
use crate::history::HistoryStore;
use crate::records::{IterationRecord, OutputRecord};

/// What to post in one action
#[derive(Clone, Copy)]
enum Payload<'a> {
    Text(&'a str),
    Media {
        text: &'a str,
        files: &'a [String],
        captions: &'a [String],
    },
}

/// Fans posts out to backends and keeps the history
///
/// Each post action produces one [`IterationRecord`], appended to the history
/// and saved right away.
pub struct Dispatcher {
    backends: Vec<Box<dyn Backend>>,
    history: HistoryStore,
    extra_keys: Map<String, Value>,
}

impl Dispatcher {
    /// Create a dispatcher over `backends` recording into `history`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateBackend` if two backends share a kind.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libbotcast::backends::{mock::MockBackend, Backend, BackendKind};
    /// use libbotcast::dispatcher::Dispatcher;
    /// use libbotcast::history::HistoryStore;
    ///
    /// # async fn example() -> libbotcast::error::Result<()> {
    /// let backends: Vec<Box<dyn Backend>> = vec![
    ///     Box::new(MockBackend::success(BackendKind::Birdsite)),
    ///     Box::new(MockBackend::success(BackendKind::Mastodon)),
    /// ];
    /// let history = HistoryStore::open("/tmp/bot-history.json")?;
    /// let mut dispatcher = Dispatcher::new(backends, history)?;
    ///
    /// let record = dispatcher.send("Hello from every backend").await;
    /// println!("Posted to {} backends", record.output_records.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(backends: Vec<Box<dyn Backend>>, history: HistoryStore) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for backend in &backends {
            if !seen.insert(backend.kind()) {
                return Err(ConfigError::DuplicateBackend(backend.name().to_string()).into());
            }
            if !backend.is_active() {
                info!(backend = backend.name(), "Backend is not set up, posts will skip it");
            }
        }

        Ok(Self {
            backends,
            history,
            extra_keys: Map::new(),
        })
    }

    /// Create a dispatcher using the history file named by `config`
    ///
    /// The history is loaded (and repaired if needed) before returning.
    pub fn from_config(config: &BotConfig, backends: Vec<Box<dyn Backend>>) -> Result<Self> {
        config.validate()?;
        let history = HistoryStore::open(config.history_path()?)?;
        debug!(
            bot = %config.bot.name,
            entries = history.len(),
            "Opened history"
        );
        Self::new(backends, history)
    }

    /// Backends that will receive posts, in registration order
    pub fn active_backends(&self) -> Vec<BackendKind> {
        self.backends
            .iter()
            .filter(|backend| backend.is_active())
            .map(|backend| backend.kind())
            .collect()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn extra_keys(&self) -> &Map<String, Value> {
        &self.extra_keys
    }

    /// Attach a value to every record created from now on
    pub fn store_extra_info(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra_keys.insert(key.into(), value.into());
    }

    /// Merge `keys` into the extra keys; new values win
    pub fn store_extra_keys(&mut self, keys: Map<String, Value>) {
        self.extra_keys.extend(keys);
    }

    /// Post text to every active backend
    ///
    /// Backend failures end up as failure records, not as errors. A history
    /// save failure is logged and the record is still returned.
    pub async fn send(&mut self, text: &str) -> IterationRecord {
        let results = self.dispatch(Payload::Text(text)).await;
        self.record(results)
    }

    /// Post text with media to every active backend
    ///
    /// When a backend splits the media over several posts, the first post is
    /// stored for the backend and the rest in its `thread`.
    pub async fn send_with_media(
        &mut self,
        text: &str,
        files: &[String],
        captions: &[String],
    ) -> IterationRecord {
        let results = self
            .dispatch(Payload::Media {
                text,
                files,
                captions,
            })
            .await;
        self.record(results)
    }

    async fn dispatch(&self, payload: Payload<'_>) -> Vec<(BackendKind, OutputRecord)> {
        let active: Vec<&dyn Backend> = self
            .backends
            .iter()
            .map(|backend| backend.as_ref())
            .filter(|backend| {
                if !backend.is_active() {
                    debug!(backend = backend.name(), "Skipping inactive backend");
                }
                backend.is_active()
            })
            .collect();

        if active.is_empty() {
            warn!("No active backends, the post is only recorded");
        }

        let futures = active.into_iter().map(|backend| async move {
            info!(backend = backend.name(), "Posting");
            let record = post_to_backend(backend, payload).await;

            match record.error_summary() {
                None => info!(
                    backend = backend.name(),
                    post_id = %record.post_id.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "Posted"
                ),
                Some(message) => warn!(backend = backend.name(), "Failed to post: {}", message),
            }
            (backend.kind(), record)
        });

        join_all(futures).await
    }

    fn record(&mut self, results: Vec<(BackendKind, OutputRecord)>) -> IterationRecord {
        let mut iteration = IterationRecord::new(self.extra_keys.clone());
        for (kind, record) in results {
            iteration.insert_output(kind, record);
        }

        self.history.append(iteration.clone());
        if let Err(e) = self.history.save() {
            error!(path = %self.history.path().display(), "Failed to save history: {}", e);
        }

        iteration
    }
}

async fn post_to_backend(backend: &dyn Backend, payload: Payload<'_>) -> OutputRecord {
    let kind = backend.kind();
    match payload {
        Payload::Text(text) => match backend.send(text).await {
            Ok(record) => record,
            Err(e) => failure_record(kind, e),
        },
        Payload::Media {
            text,
            files,
            captions,
        } => match backend.send_with_media(text, files, captions).await {
            Ok(records) => collapse_thread(kind, records),
            Err(e) => failure_record(kind, e),
        },
    }
}

fn failure_record(kind: BackendKind, error: BotcastError) -> OutputRecord {
    match error {
        BotcastError::Backend(e) => OutputRecord::failure(kind, &e),
        other => OutputRecord::failure(kind, &BackendError::Posting(other.to_string())),
    }
}

/// Keep the first post and hang the follow-ups off it
fn collapse_thread(kind: BackendKind, records: Vec<OutputRecord>) -> OutputRecord {
    let mut posts = records.into_iter();
    match posts.next() {
        Some(mut head) => {
            head.thread.extend(posts);
            head
        }
        None => OutputRecord::failure(kind, &BackendError::Posting("No post was made".to_string())),
    }
}
