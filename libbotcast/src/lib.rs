//! Botcast - post once, land everywhere, remember everything
//!
//! This library lets a single bot post the same content to several social
//! backends and keeps a durable JSON history of every attempt. The history
//! store repairs and migrates records written by older versions on load.

pub mod backends;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod logging;
pub mod records;

// Re-export commonly used types
pub use backends::{Backend, BackendKind};
pub use config::BotConfig;
pub use dispatcher::Dispatcher;
pub use error::{BotcastError, Result};
pub use history::{HistoryStore, LoadReport};
pub use records::{IterationRecord, OutputRecord, PostId, RecordKind};
