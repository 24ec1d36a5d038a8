use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "chat-stream.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Filter directive such as `info` or `chat_stream=debug`.
    pub filter: Option<String>,
    /// JSONL output file. Console output when unset.
    pub json_log_path: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            json_log_path: None,
        }
    }
}

impl ObservabilityConfig {
    /// Reads `CHAT_STREAM_OBSERVABILITY`, `CHAT_STREAM_LOG_LEVEL` and
    /// `CHAT_STREAM_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("CHAT_STREAM_OBSERVABILITY")
            .map(|value| parse_bool(&value).unwrap_or(true))
            .unwrap_or(true);
        let filter = lookup("CHAT_STREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty());
        let json_log_path = lookup("CHAT_STREAM_JSON_LOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            filter,
            json_log_path,
        }
    }

    /// Directory and file name of the JSONL log, when file output is configured.
    fn log_file(&self) -> Option<(PathBuf, String)> {
        let path = self.json_log_path.as_ref()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();
        Some((dir, file_name))
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.filter
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_OBSERVABILITY`: enable/disable flag (default enabled).
/// - `CHAT_STREAM_LOG_LEVEL`: filter override; falls back to `RUST_LOG`, then `info`.
/// - `CHAT_STREAM_JSON_LOG_PATH`: write JSONL to this file instead of compact stdout.
pub fn init_observability() {
    init_with(ObservabilityConfig::from_env());
}

/// Same as [`init_observability`] with explicit settings.
pub fn init_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }

        let (json_layer, console_layer) = match config.log_file() {
            Some((dir, file_name)) => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                (Some(layer), None)
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                (None, Some(layer))
            }
        };
        let _ = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(json_layer)
            .with(console_layer)
            .try_init();
    });
}
