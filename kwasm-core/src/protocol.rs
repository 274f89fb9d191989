//! Wire protocol between guest and host.
//!
//! The guest reaches the host through one import,
//! `kwasm_message_to_host(library, command, ptr, len) -> u32`. Library ids and
//! command ids travel as small integers; on the host they are decoded into
//! [`Envelope`] and, for the control library, into [`ControlCommand`].

use crate::error::{KwasmError, Result};

/// Library id 0: reserved, never dispatchable.
pub const NULL_LIBRARY: u32 = 0;

/// Library id 1: the built-in control surface.
pub const CONTROL_LIBRARY: u32 = 1;

/// First id handed out to a registered library.
pub const FIRST_DYNAMIC_LIBRARY: u32 = 2;

/// One guest-to-host message.
///
/// `data_ptr`/`data_len` describe a byte range in linear memory that is only
/// valid while the call is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Target library.
    pub library_id: u32,
    /// Command within the library.
    pub command_id: u32,
    /// Start of the payload in linear memory.
    pub data_ptr: u32,
    /// Payload length in bytes.
    pub data_len: u32,
}

impl Envelope {
    /// Create a new envelope.
    pub const fn new(library_id: u32, command_id: u32, data_ptr: u32, data_len: u32) -> Self {
        Self {
            library_id,
            command_id,
            data_ptr,
            data_len,
        }
    }

    /// Whether the message targets the control library.
    pub const fn is_control(&self) -> bool {
        self.library_id == CONTROL_LIBRARY
    }
}

/// Commands understood by the control library (id 1).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// Register a library from the host catalog; payload is its name.
    NewLibrary = 0,
    /// Log informational text.
    Log = 1,
    /// Log error text.
    LogError = 2,
    /// Report the thread-local-storage block size.
    TlsSize = 3,
    /// Report the thread-local-storage block alignment.
    TlsAlign = 4,
    /// Report how many worker threads are available.
    AvailableThreads = 5,
    /// Spawn a worker from a [`WorkerLaunch`] record.
    SpawnWorker = 6,
    /// Reserved; accepted and ignored.
    Reserved = 7,
    /// Read a property off an object: `(object handle, property handle)`.
    GetProperty = 8,
}

impl ControlCommand {
    /// All commands in wire order.
    pub const ALL: [ControlCommand; 9] = [
        Self::NewLibrary,
        Self::Log,
        Self::LogError,
        Self::TlsSize,
        Self::TlsAlign,
        Self::AvailableThreads,
        Self::SpawnWorker,
        Self::Reserved,
        Self::GetProperty,
    ];

    /// Wire value of this command.
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Human-readable command name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NewLibrary => "new_library",
            Self::Log => "log",
            Self::LogError => "log_error",
            Self::TlsSize => "tls_size",
            Self::TlsAlign => "tls_align",
            Self::AvailableThreads => "available_threads",
            Self::SpawnWorker => "spawn_worker",
            Self::Reserved => "reserved",
            Self::GetProperty => "get_property",
        }
    }
}

impl TryFrom<u32> for ControlCommand {
    type Error = KwasmError;

    fn try_from(value: u32) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(KwasmError::UnknownCommand {
                library_id: CONTROL_LIBRARY,
                command: value,
            })
    }
}

/// Everything a new worker needs from the spawning guest.
///
/// Sent as three little-endian 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLaunch {
    /// Opaque value passed to the guest's per-thread entry point.
    pub entry_point: u32,
    /// Initial stack pointer (top of the stack the guest allocated).
    pub stack_pointer: u32,
    /// Base of the thread-local-storage block the guest allocated.
    pub tls_pointer: u32,
}

impl WorkerLaunch {
    /// Size of the encoded record in bytes.
    pub const ENCODED_LEN: usize = 12;

    /// Create a launch record.
    pub const fn new(entry_point: u32, stack_pointer: u32, tls_pointer: u32) -> Self {
        Self {
            entry_point,
            stack_pointer,
            tls_pointer,
        }
    }

    /// Decode from a command payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::ENCODED_LEN {
            return Err(KwasmError::MalformedPayload {
                what: "worker launch record",
                expected: Self::ENCODED_LEN,
                actual: data.len(),
            });
        }
        let words = decode_words(data, "worker launch record")?;
        Ok(Self::new(words[0], words[1], words[2]))
    }

    /// Encode as a command payload.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.entry_point.to_le_bytes());
        out[4..8].copy_from_slice(&self.stack_pointer.to_le_bytes());
        out[8..12].copy_from_slice(&self.tls_pointer.to_le_bytes());
        out
    }
}

/// Split a payload into little-endian `u32` words.
pub fn decode_words(data: &[u8], what: &'static str) -> Result<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(KwasmError::MalformedPayload {
            what,
            expected: data.len().next_multiple_of(4),
            actual: data.len(),
        });
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Decode exactly `N` little-endian words.
pub fn decode_exact<const N: usize>(data: &[u8], what: &'static str) -> Result<[u32; N]> {
    let words = decode_words(data, what)?;
    words.try_into().map_err(|_| KwasmError::MalformedPayload {
        what,
        expected: N * 4,
        actual: data.len(),
    })
}

/// Encode words as a little-endian payload.
pub fn encode_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
