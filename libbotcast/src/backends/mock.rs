//! Mock backend implementation for testing
//!
//! This module provides a configurable mock backend that can simulate
//! successes, failures, inactive setups and delays. It's designed for use in
//! integration tests to verify dispatching and history recording without any
//! credentials or network access.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::backends::{Backend, BackendKind, MediaBatch};
use crate::error::{BackendError, Result};
use crate::records::OutputRecord;

/// Configuration for mock backend behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Which backend the mock stands in for
    pub kind: BackendKind,

    /// Whether setup "found credentials"
    pub active: bool,

    /// Error returned by every send, if any
    pub post_error: Option<BackendError>,

    /// Zero-based media batch that fails, if any
    pub fail_on_batch: Option<usize>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Override for the media-per-post limit
    pub max_media_per_post: Option<usize>,

    /// Number of times send or send_media_batch has been called
    pub send_call_count: Arc<Mutex<usize>>,

    /// Text of every post made (for verification)
    pub posted_content: Arc<Mutex<Vec<String>>>,

    /// Files of every media batch, in order
    pub posted_batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Birdsite,
            active: true,
            post_error: None,
            fail_on_batch: None,
            delay: Duration::from_millis(0),
            max_media_per_post: None,
            send_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
            posted_batches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock backend for testing
pub struct MockBackend {
    config: MockConfig,
}

impl MockBackend {
    /// Create a new mock backend with the given configuration
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create an active mock backend that always succeeds
    pub fn success(kind: BackendKind) -> Self {
        Self::new(MockConfig {
            kind,
            ..Default::default()
        })
    }

    /// Create a mock backend whose setup found no credentials
    pub fn inactive(kind: BackendKind) -> Self {
        Self::new(MockConfig {
            kind,
            active: false,
            ..Default::default()
        })
    }

    /// Create a mock backend that fails every post
    pub fn failing(kind: BackendKind, error: BackendError) -> Self {
        Self::new(MockConfig {
            kind,
            post_error: Some(error),
            ..Default::default()
        })
    }

    /// Create a mock backend that fails one media batch
    pub fn failing_batch(kind: BackendKind, batch: usize) -> Self {
        Self::new(MockConfig {
            kind,
            fail_on_batch: Some(batch),
            ..Default::default()
        })
    }

    /// Create a mock backend with a delay
    pub fn with_delay(kind: BackendKind, delay: Duration) -> Self {
        Self::new(MockConfig {
            kind,
            delay,
            ..Default::default()
        })
    }

    /// Get the number of times a send method was called
    pub fn send_call_count(&self) -> usize {
        *lock(&self.config.send_call_count)
    }

    /// Get all text that was posted
    pub fn posted_content(&self) -> Vec<String> {
        lock(&self.config.posted_content).clone()
    }

    /// Get the files of every media batch posted
    pub fn posted_batches(&self) -> Vec<Vec<String>> {
        lock(&self.config.posted_batches).clone()
    }

    /// Shared handle to the call counter, usable after the mock is boxed
    pub fn call_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.config.send_call_count)
    }

    async fn begin_call(&self) {
        *lock(&self.config.send_call_count) += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }

    fn mock_post_id(&self) -> String {
        format!("{}:mock-{}", self.config.kind.name(), uuid::Uuid::new_v4())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.config.kind
    }

    fn is_active(&self) -> bool {
        self.config.active
    }

    fn max_media_per_post(&self) -> usize {
        self.config
            .max_media_per_post
            .unwrap_or_else(|| self.config.kind.max_media_per_post())
    }

    async fn send(&self, text: &str) -> Result<OutputRecord> {
        self.begin_call().await;

        if let Some(error) = &self.config.post_error {
            return Err(error.clone().into());
        }

        lock(&self.config.posted_content).push(text.to_string());
        Ok(OutputRecord::success(self.config.kind, self.mock_post_id(), Some(text)))
    }

    async fn send_media_batch(&self, batch: MediaBatch<'_>) -> Result<OutputRecord> {
        self.begin_call().await;

        let index = lock(&self.config.posted_batches).len();
        if let Some(error) = &self.config.post_error {
            return Err(error.clone().into());
        }
        if self.config.fail_on_batch == Some(index) {
            let message = format!("Mock upload failed for batch {}", index);
            return Err(BackendError::Upload(message).into());
        }

        lock(&self.config.posted_batches).push(batch.files.to_vec());
        if let Some(text) = batch.text {
            lock(&self.config.posted_content).push(text.to_string());
        }

        let media_ids = (0..batch.files.len())
            .map(|i| Value::String(format!("media-{}-{}", index, i)))
            .collect();

        Ok(OutputRecord::success(self.config.kind, self.mock_post_id(), batch.text)
            .with_media(batch.files, media_ids, batch.captions)
            .with_in_reply_to(batch.in_reply_to.cloned()))
    }
}
