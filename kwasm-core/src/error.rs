//! Error types for the kwasm bridge.
//!
//! Every failure a guest call or a worker bootstrap can hit is a variant here,
//! carrying the identifiers (offsets, handles, library ids, export names)
//! needed to make the log line actionable. Errors produced while servicing a
//! single message never escape that message: the router logs them and hands
//! the guest a `0`.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for kwasm operations.
#[derive(Error, Debug)]
pub enum KwasmError {
    // =========================================================================
    // Memory Errors (E100-E199)
    // =========================================================================
    /// A view or write reached past the end of linear memory.
    #[error("E101: Memory access out of bounds: offset {offset}, length {length}, size {size}")]
    OutOfBounds {
        /// Start of the requested range.
        offset: u64,
        /// Length of the requested range.
        length: u64,
        /// Size of linear memory at the time of the check.
        size: u64,
    },

    /// Guest bytes were not valid UTF-8.
    #[error("E102: Invalid UTF-8 at offset {offset} (length {length}): {cause}")]
    InvalidEncoding {
        /// Start of the decoded range.
        offset: u32,
        /// Length of the decoded range.
        length: u32,
        /// Decoder diagnostic.
        cause: String,
    },

    /// No linear memory is bound to the calling context yet.
    #[error("E103: No linear memory bound to context {context}")]
    MemoryUnavailable {
        /// The context that tried to access memory.
        context: u32,
    },

    // =========================================================================
    // Object Table Errors (E200-E299)
    // =========================================================================
    /// Handle is not allocated, or its slot is empty.
    #[error("E201: Invalid handle {handle}")]
    InvalidHandle {
        /// The offending handle.
        handle: u32,
    },

    /// Handle refers to a slot that has since been recycled.
    #[error("E202: Stale handle {handle}: slot {slot} is now at generation {current}")]
    StaleHandle {
        /// The offending handle.
        handle: u32,
        /// Slot index encoded in the handle.
        slot: u32,
        /// Generation currently occupying the slot.
        current: u8,
    },

    /// No more slots can be addressed by a handle.
    #[error("E203: Object table full ({capacity} slots)")]
    TableFull {
        /// Maximum number of addressable slots.
        capacity: u32,
    },

    /// A host value did not have the shape an operation needed.
    #[error("E204: Type mismatch for handle {handle}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Handle of the value that was inspected.
        handle: u32,
        /// Expected kind of value.
        expected: &'static str,
        /// Kind of value actually found.
        found: &'static str,
    },

    // =========================================================================
    // Library / Protocol Errors (E300-E399)
    // =========================================================================
    /// No library is registered at this id.
    #[error("E301: Unknown library id {library_id}")]
    UnknownLibrary {
        /// The unresolved library id.
        library_id: u32,
    },

    /// The catalog has no library with this name.
    #[error("E302: No library named '{name}' in the host catalog")]
    UnknownLibraryName {
        /// The requested library name.
        name: String,
    },

    /// A library does not understand this command.
    #[error("E303: Library {library_id} has no command {command}")]
    UnknownCommand {
        /// Target library.
        library_id: u32,
        /// Unrecognized command id.
        command: u32,
    },

    /// Payload bytes did not match the layout a command expects.
    #[error("E304: Malformed payload for {what}: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        /// What was being decoded.
        what: &'static str,
        /// Expected byte count (or minimum).
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// A host library panicked while handling a command.
    #[error("E305: Library {library_id} panicked: {message}")]
    LibraryPanic {
        /// The library that panicked.
        library_id: u32,
        /// Panic payload, if it was a string.
        message: String,
    },

    // =========================================================================
    // Instance / Worker Errors (E400-E499)
    // =========================================================================
    /// Module instantiation failed in a context.
    #[error("E401: Failed to instantiate module in context {context}: {cause}")]
    InstantiationFailure {
        /// The context being instantiated.
        context: u32,
        /// Reason for the failure.
        cause: String,
    },

    /// A required guest export is absent or has the wrong signature.
    #[error("E402: Guest export '{export}' is missing or has the wrong type")]
    MissingExport {
        /// Name of the export.
        export: String,
    },

    /// Threads were requested but the context cannot run them.
    #[error("E403: Worker threads unavailable: {cause}")]
    ThreadsUnavailable {
        /// Why threads cannot be used.
        cause: String,
    },

    /// The OS refused to start a worker thread.
    #[error("E404: Failed to spawn worker {worker}: {cause}")]
    WorkerSpawn {
        /// Worker id that failed to start.
        worker: u32,
        /// Reason for the failure.
        cause: String,
    },

    /// A guest function trapped.
    #[error("E405: Guest function '{function}' trapped: {cause}")]
    GuestTrap {
        /// The guest export that was running.
        function: String,
        /// Trap description.
        cause: String,
    },

    // =========================================================================
    // Runtime / Configuration Errors (E500-E599)
    // =========================================================================
    /// Module compilation or validation failed.
    #[error("E501: Failed to load WASM module '{module}': {cause}")]
    WasmLoad {
        /// The module that failed to load.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Engine, store or linker setup failed.
    #[error("E502: Wasm engine error: {cause}")]
    Engine {
        /// Reason for the failure.
        cause: String,
    },

    /// Invalid configuration value.
    #[error("E503: Invalid configuration '{field}': {cause}")]
    Config {
        /// The configuration field with an invalid value.
        field: String,
        /// Why the value is invalid.
        cause: String,
    },

    /// File I/O error.
    #[error("E504: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

/// Result type alias for kwasm operations.
pub type Result<T> = std::result::Result<T, KwasmError>;

impl KwasmError {
    /// Stable error code (e.g. `"E301"`).
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfBounds { .. } => "E101",
            Self::InvalidEncoding { .. } => "E102",
            Self::MemoryUnavailable { .. } => "E103",
            Self::InvalidHandle { .. } => "E201",
            Self::StaleHandle { .. } => "E202",
            Self::TableFull { .. } => "E203",
            Self::TypeMismatch { .. } => "E204",
            Self::UnknownLibrary { .. } => "E301",
            Self::UnknownLibraryName { .. } => "E302",
            Self::UnknownCommand { .. } => "E303",
            Self::MalformedPayload { .. } => "E304",
            Self::LibraryPanic { .. } => "E305",
            Self::InstantiationFailure { .. } => "E401",
            Self::MissingExport { .. } => "E402",
            Self::ThreadsUnavailable { .. } => "E403",
            Self::WorkerSpawn { .. } => "E404",
            Self::GuestTrap { .. } => "E405",
            Self::WasmLoad { .. } => "E501",
            Self::Engine { .. } => "E502",
            Self::Config { .. } => "E503",
            Self::Io { .. } => "E504",
        }
    }

    /// Whether this error ends a worker rather than a single call.
    pub fn is_fatal_to_worker(&self) -> bool {
        matches!(
            self,
            Self::InstantiationFailure { .. } | Self::MissingExport { .. } | Self::GuestTrap { .. }
        )
    }

    /// Shorthand for a missing guest export.
    pub fn missing_export(export: impl Into<String>) -> Self {
        Self::MissingExport {
            export: export.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = KwasmError::OutOfBounds {
            offset: 65530,
            length: 16,
            size: 65536,
        };
        assert!(err.to_string().starts_with("E101"));
        assert_eq!(err.code(), "E101");

        let err = KwasmError::UnknownLibrary { library_id: 9 };
        assert_eq!(err.to_string(), "E301: Unknown library id 9");
    }

    #[test]
    fn worker_fatal_classification() {
        assert!(KwasmError::missing_export("main").is_fatal_to_worker());
        assert!(
            KwasmError::InstantiationFailure {
                context: 3,
                cause: "bad import".into()
            }
            .is_fatal_to_worker()
        );
        assert!(!KwasmError::InvalidHandle { handle: 4 }.is_fatal_to_worker());
    }
}
