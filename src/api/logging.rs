use anyhow::{anyhow, Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "RUNWIRE_LOG";
const LOG_PATH_ENV: &str = "RUNWIRE_LOG_PATH";
const DEFAULT_LOG_FILTER: &str = "runwire=info,runwatch=info";
const DATA_PREVIEW_CHARS: usize = 512;

/// Install the global `tracing` subscriber.
///
/// `RUNWIRE_LOG` takes an `EnvFilter` directive; `RUNWIRE_LOG_PATH` redirects
/// output from stderr to an append-only file.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match resolve_log_path() {
        Some(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| anyhow!("failed to install tracing subscriber: {error}")),
    }
}

pub fn resolve_log_path() -> Option<PathBuf> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open {LOG_PATH_ENV} '{}'", path.display()))
}

pub fn emit_sse_parse_error(event_type: Option<&str>, data: &str, parse_error: &str) {
    tracing::warn!(
        target: "runwire::sse",
        event_type = event_type.unwrap_or("<none>"),
        error = parse_error,
        data = %preview(data),
        "sse message could not be decoded"
    );
}

pub fn emit_unrecognized_event(event_type: &str) {
    tracing::warn!(
        target: "runwire::sse",
        event_type,
        "dropping event with unrecognized type"
    );
}

fn preview(data: &str) -> String {
    if data.chars().count() <= DATA_PREVIEW_CHARS {
        return data.to_string();
    }
    let mut truncated: String = data.chars().take(DATA_PREVIEW_CHARS).collect();
    truncated.push_str("...");
    truncated
}
