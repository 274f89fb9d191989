//! Logging configuration.

use super::GUEST_LOG_TARGET;
use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON lines, one event per line.
    Json,
    /// Human-readable multi-line format with colors.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::default(),
        })
    }
}

/// How the host's tracing subscriber renders events.
///
/// Guest log text (control commands 1 and 2) is emitted under
/// [`GUEST_LOG_TARGET`], so a filter such as `"warn,kwasm::guest=info"` keeps
/// guest output while silencing host diagnostics. Worker threads are named
/// `kwasm-worker-{id}`; thread names are on unless turned off.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    format: LogFormat,
    filter: String,
    location: bool,
    thread_names: bool,
    thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: "info".to_string(),
            location: false,
            thread_names: true,
            thread_ids: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
}

impl TracingConfig {
    /// Host diagnostics at a level picked by a `-v` count, guest text always
    /// at `info`.
    ///
    /// 0 is `warn`, 1 `info`, 2 `debug`, 3 or more `trace`.
    pub fn for_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            filter: format!("{level},{GUEST_LOG_TARGET}=info"),
            ..Self::default()
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Apply environment overrides.
    ///
    /// - `KWASM_LOG_FORMAT`: `json`, `pretty` or `compact`; unset means
    ///   `pretty` on a terminal and the current format otherwise
    /// - `KWASM_LOG_LEVEL`, then `RUST_LOG`: replaces the filter
    /// - `KWASM_LOG_LOCATION`: include file and line
    /// - `KWASM_LOG_THREAD_NAMES`, `KWASM_LOG_THREAD_IDS`: include thread
    ///   names or ids
    pub fn apply_env(mut self) -> Self {
        self.format = match env::var("KWASM_LOG_FORMAT") {
            Ok(format) => format.parse().unwrap_or_default(),
            Err(_) if std::io::IsTerminal::is_terminal(&std::io::stdout()) => LogFormat::Pretty,
            Err(_) => self.format,
        };
        if let Ok(filter) = env::var("KWASM_LOG_LEVEL").or_else(|_| env::var("RUST_LOG")) {
            self.filter = filter;
        }
        if let Some(location) = env_flag("KWASM_LOG_LOCATION") {
            self.location = location;
        }
        if let Some(names) = env_flag("KWASM_LOG_THREAD_NAMES") {
            self.thread_names = names;
        }
        if let Some(ids) = env_flag("KWASM_LOG_THREAD_IDS") {
            self.thread_ids = ids;
        }
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the `EnvFilter` directive string.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Include or omit thread names.
    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.thread_names = enabled;
        self
    }

    /// Output format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// `EnvFilter` directives.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether events carry file and line.
    pub fn location(&self) -> bool {
        self.location
    }

    /// Whether events carry the thread name.
    pub fn thread_names(&self) -> bool {
        self.thread_names
    }

    /// Whether events carry the thread id.
    pub fn thread_ids(&self) -> bool {
        self.thread_ids
    }
}
