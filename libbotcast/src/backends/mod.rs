//! Backend abstraction
//!
//! A backend is one external posting destination. The wire protocol of each
//! service lives outside this crate; what the core needs from a backend is
//! captured by the [`Backend`] trait: post text, post text with media, and
//! report whether it was activated during setup.
//!
//! # Examples
//!
//! ```no_run
//! use libbotcast::backends::{mock::MockBackend, Backend, BackendKind};
//!
//! # async fn example() -> libbotcast::error::Result<()> {
//! let backend = MockBackend::success(BackendKind::Mastodon);
//!
//! if backend.is_active() {
//!     let record = backend.send("Hello from the bot").await?;
//!     println!("Posted: {:?}", record.post_id);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{BotcastError, Result};
use crate::records::{OutputRecord, PostId, RecordKind};

// Mock backend is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Backends the history format knows about
///
/// The lowercase name is the key used under `output_records`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The microblogging site
    Birdsite,
    /// The federated alternative
    Mastodon,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Birdsite, BackendKind::Mastodon];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Birdsite => "birdsite",
            BackendKind::Mastodon => "mastodon",
        }
    }

    /// Discriminator written on this backend's output records
    pub fn record_kind(&self) -> RecordKind {
        match self {
            BackendKind::Birdsite => RecordKind::Tweet,
            BackendKind::Mastodon => RecordKind::Toot,
        }
    }

    /// Most media items a single post accepts
    pub fn max_media_per_post(&self) -> usize {
        4
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "birdsite" => Ok(BackendKind::Birdsite),
            "mastodon" => Ok(BackendKind::Mastodon),
            _ => Err(format!(
                "Unknown backend: '{}'. Valid options: birdsite, mastodon",
                s
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One post worth of media
#[derive(Debug, Clone, Copy)]
pub struct MediaBatch<'a> {
    /// Post text; only the first post of a split media post carries it
    pub text: Option<&'a str>,
    pub files: &'a [String],
    /// Same length as `files`
    pub captions: &'a [String],
    /// Previous post of the same media post
    pub in_reply_to: Option<&'a PostId>,
}

/// Backend trait for posting to one external service
///
/// Implementations return `Err` for failures they cannot describe better;
/// the dispatcher turns those into failure records. A backend may also
/// return a record with `error` populated itself.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this is; decides the key in `output_records`
    fn kind(&self) -> BackendKind;

    /// Whether setup found what this backend needs to post
    ///
    /// Inactive backends are skipped by the dispatcher.
    fn is_active(&self) -> bool;

    /// Get the backend name
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Get the maximum number of media items per post
    fn max_media_per_post(&self) -> usize {
        self.kind().max_media_per_post()
    }

    /// Post text without media
    ///
    /// # Errors
    ///
    /// Returns `BackendError` variants wrapped in `BotcastError::Backend`
    /// when the post could not be made.
    async fn send(&self, text: &str) -> Result<OutputRecord>;

    /// Upload one batch of media and post it
    ///
    /// The batch never holds more than `max_media_per_post()` files.
    ///
    /// # Errors
    ///
    /// Returns an error if an upload or the post fails.
    async fn send_media_batch(&self, batch: MediaBatch<'_>) -> Result<OutputRecord>;

    /// Post text with media
    ///
    /// Captions are padded with empty strings (or cut) to match `files`.
    /// When there are more files than one post accepts, they are posted as a
    /// chain of replies with the text on the first post only. The chain stops
    /// at the first failure, which is returned as a failure record.
    ///
    /// # Returns
    ///
    /// One record per post made, in posting order.
    async fn send_with_media(
        &self,
        text: &str,
        files: &[String],
        captions: &[String],
    ) -> Result<Vec<OutputRecord>> {
        if files.is_empty() {
            return Ok(vec![self.send(text).await?]);
        }

        let captions = normalize_captions(files.len(), captions);
        let per_post = self.max_media_per_post().max(1);
        let mut records: Vec<OutputRecord> = Vec::new();
        let mut in_reply_to: Option<PostId> = None;

        for (index, (file_slice, caption_slice)) in files
            .chunks(per_post)
            .zip(captions.chunks(per_post))
            .enumerate()
        {
            let batch = MediaBatch {
                text: if index == 0 { Some(text) } else { None },
                files: file_slice,
                captions: caption_slice,
                in_reply_to: in_reply_to.as_ref(),
            };
            debug!(
                backend = self.name(),
                batch = index,
                files = file_slice.len(),
                "Sending media batch"
            );

            let record = match self.send_media_batch(batch).await {
                Ok(record) => record,
                Err(BotcastError::Backend(e)) => OutputRecord::failure(self.kind(), &e),
                Err(e) => return Err(e),
            };

            let stop = record.post_id.is_none() || record.is_failure();
            in_reply_to = record.post_id.clone();
            records.push(record);
            if stop {
                break;
            }
        }

        Ok(records)
    }
}

/// Pad or cut captions so there is exactly one per file
pub fn normalize_captions(file_count: usize, captions: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = captions.iter().take(file_count).cloned().collect();
    normalized.resize(file_count, String::new());
    normalized
}
