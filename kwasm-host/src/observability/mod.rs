//! Logging for the host and its guests.
//!
//! Host diagnostics and guest log messages both go through `tracing`. The
//! output format is controlled via `KWASM_LOG_FORMAT`:
//! - `json` - one JSON object per line
//! - `pretty` - human-readable colored output (default for TTY)
//! - `compact` - single-line format
//!
//! # Example
//!
//! ```ignore
//! use kwasm_host::observability::{LogFormat, TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//!
//! let config = TracingConfig::for_verbosity(2).with_format(LogFormat::Json);
//! let _guard = init_tracing(config)?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig};
pub use tracing_setup::{TracingGuard, init_tracing};

/// Target used for messages the guest logs through the control library.
pub const GUEST_LOG_TARGET: &str = "kwasm::guest";

/// Span covering everything one execution context does.
#[macro_export]
macro_rules! instrument_context {
    ($context_id:expr, $role:expr) => {
        tracing::info_span!("guest_context", context = $context_id, role = $role)
    };
}
