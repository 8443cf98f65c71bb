use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use std::path::{Path, PathBuf};

use libbotcast::logging::{self, LogFormat, LoggingConfig};
use libbotcast::{BackendKind, BotConfig, HistoryStore, IterationRecord, OutputRecord};

#[derive(Parser, Debug)]
#[command(name = "botcast-history")]
#[command(version, about = "Inspect a bot's posting history")]
#[command(long_about = r#"Inspect a bot's posting history with filtering and formatting options.

The history is read through the same repair and migration steps the bot uses,
so files written by older versions are shown in the current format.

EXAMPLES:
    # Show last 20 posts, newest first (default)
    botcast-history

    # Read a specific history file instead of the configured one
    botcast-history --file ~/bots/foobot/foobot-history.json

    # Filter by backend
    botcast-history --backend birdsite
    botcast-history --backend mastodon

    # Only posts where some backend failed
    botcast-history --failed

    # Filter by date
    botcast-history --since "2018-05-01"
    botcast-history --since "2018-05-01T09:00:00"

    # JSON output for scripting
    botcast-history --format json | jq '.[] | .output_records.mastodon.toot_id'

    # JSONL output (one record per line)
    botcast-history --format jsonl

    # Upgrade the file in place to the current format
    botcast-history --rewrite --limit 0

OUTPUT FORMATS:
    text  - Human-readable text with timestamps and backend status (default)
    json  - JSON array of records, as stored
    jsonl - JSON lines, one record per line (streaming-friendly)

EXIT CODES:
    0 - Success (including empty results)
    1 - Error (history file not found, unreadable, etc.)
"#)]
struct Args {
    /// History file to read
    #[arg(long, value_name = "PATH")]
    #[arg(help = "History file to read (default: the file named by the bot configuration)")]
    file: Option<PathBuf>,

    /// Filter by backend
    #[arg(short, long, value_name = "BACKEND")]
    #[arg(help = "Only show posts that went to this backend (birdsite or mastodon)")]
    #[arg(value_parser = ["birdsite", "mastodon"])]
    backend: Option<String>,

    /// Filter posts since this date
    #[arg(long, value_name = "DATE")]
    #[arg(help = "Show posts since this date (YYYY-MM-DD or ISO 8601 format)")]
    since: Option<String>,

    /// Only show posts with a failed backend
    #[arg(long)]
    failed: bool,

    /// Maximum number of posts to return
    #[arg(short, long, default_value = "20", value_name = "N")]
    #[arg(help = "Maximum number of posts to return (default: 20)")]
    limit: usize,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(help = "Output format: text (human-readable), json (array), or jsonl (streaming)")]
    #[arg(value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Save the history back in the current format
    #[arg(long)]
    #[arg(help = "Write the loaded history back to the file in the current format")]
    rewrite: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Filters applied to the loaded history
#[derive(Debug)]
struct HistoryQuery {
    backend: Option<BackendKind>,
    since: Option<NaiveDateTime>,
    failed: bool,
    limit: usize,
}

impl HistoryQuery {
    fn matches(&self, entry: &IterationRecord) -> bool {
        if let Some(backend) = self.backend {
            if entry.output(backend).is_none() {
                return false;
            }
        }
        if let Some(since) = self.since {
            match entry.parsed_timestamp() {
                Some(timestamp) if timestamp >= since => {}
                _ => return false,
            }
        }
        if self.failed && !entry.output_records.values().any(OutputRecord::is_failure) {
            return false;
        }
        true
    }

    /// Matching entries, newest first
    fn select<'a>(&self, entries: &'a [IterationRecord]) -> Vec<&'a IterationRecord> {
        entries
            .iter()
            .rev()
            .filter(|entry| self.matches(entry))
            .take(self.limit)
            .collect()
    }
}

/// Parse a date or date-time given on the command line
fn parse_since(date_str: &str) -> Result<NaiveDateTime> {
    if let Some(timestamp) = libbotcast::records::parse_timestamp(date_str) {
        return Ok(timestamp);
    }

    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .with_context(|| {
            format!(
                "Invalid date format: {}. Use YYYY-MM-DD or ISO 8601 (YYYY-MM-DDTHH:MM:SS)",
                date_str
            )
        })
}

/// The bot configuration, needed only when no `--file` is given
fn load_config(file: Option<&Path>) -> Result<Option<BotConfig>> {
    match file {
        Some(_) => Ok(None),
        None => BotConfig::load()
            .map(Some)
            .context("Failed to load configuration"),
    }
}

fn resolve_history_path(file: Option<&Path>, config: Option<&BotConfig>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(PathBuf::from(shellexpand::tilde(&file.to_string_lossy()).to_string()));
    }

    config
        .context("No history file given and no configuration loaded")?
        .history_path()
        .context("Configuration does not name a history file")
}

fn preview(text: &str) -> String {
    if text.chars().count() > 60 {
        format!("{}...", text.chars().take(60).collect::<String>())
    } else {
        text.to_string()
    }
}

fn print_text(entries: &[&IterationRecord]) {
    for entry in entries {
        let timestamp = entry
            .parsed_timestamp()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.timestamp().to_string());

        let text = entry
            .output_records
            .values()
            .find_map(|record| record.text.as_deref())
            .unwrap_or("");
        println!("{} | {}", timestamp, preview(text));

        if !entry.extra_keys.is_empty() {
            let extras: Vec<String> = entry
                .extra_keys
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            println!("  extra: {}", extras.join(", "));
        }

        for (backend, record) in &entry.output_records {
            let symbol = if record.is_failure() { "✗" } else { "✓" };
            let replies = if record.thread.is_empty() {
                String::new()
            } else {
                format!(" (+{} replies)", record.thread.len())
            };

            if let Some(message) = record.error_summary() {
                println!("  {} {}: {}", symbol, backend, message);
            } else if let Some(post_id) = &record.post_id {
                println!("  {} {}: {}{}", symbol, backend, post_id, replies);
            } else {
                println!("  {} {}", symbol, backend);
            }
        }
        for name in entry.other_outputs.keys() {
            println!("  ? {}", name);
        }
        println!(); // Blank line between entries
    }
}

/// Set up logging: `--verbose` wins, then the `[logging]` table, then env vars
fn init_logging(verbose: bool, config: Option<&BotConfig>) -> Result<()> {
    if verbose {
        // stderr cannot fail to open
        let _ = LoggingConfig::new(LogFormat::Text, "debug".to_string(), true).init();
        return Ok(());
    }

    match config {
        Some(config) => {
            let logging = LoggingConfig::from_settings(&config.logging);
            logging.init().with_context(|| match &logging.file {
                Some(file) => format!("Failed to open log file {}", file.display()),
                None => "Failed to initialize logging".to_string(),
            })
        }
        None => {
            logging::init_default();
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.file.as_deref())?;
    init_logging(args.verbose, config.as_ref())?;

    tracing::debug!("botcast-history started with args: {:?}", args);

    let path = resolve_history_path(args.file.as_deref(), config.as_ref())?;
    if !path.exists() {
        eprintln!("Error: History file not found at {}", path.display());
        eprintln!("Has the bot posted anything yet?");
        std::process::exit(1);
    }

    let mut store = HistoryStore::new(&path);
    let report = store.load().context("Failed to load history")?;
    tracing::debug!(
        entries = report.entries,
        repaired = report.repaired,
        migrated = report.migrated,
        skipped = report.skipped,
        "Loaded history"
    );

    if args.rewrite {
        store.save().context("Failed to write history")?;
        if report.needs_rewrite() {
            tracing::info!(path = %path.display(), "History rewritten in the current format");
        }
    }

    let backend = args
        .backend
        .as_deref()
        .map(str::parse::<BackendKind>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let since = args.since.as_deref().map(parse_since).transpose()?;

    let query = HistoryQuery {
        backend,
        since,
        failed: args.failed,
        limit: args.limit,
    };
    let entries = query.select(store.entries());

    match args.format.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&entries)?;
            println!("{}", json);
        }
        "jsonl" => {
            for entry in entries {
                let json = serde_json::to_string(entry)?;
                println!("{}", json);
            }
        }
        "text" => print_text(&entries),
        _ => {
            eprintln!(
                "Error: Invalid format '{}'. Valid formats: text, json, jsonl",
                args.format
            );
            std::process::exit(1);
        }
    }

    Ok(())
}
