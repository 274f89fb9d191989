//! Convenient re-exports.

pub use crate::error::{KwasmError, Result};
pub use crate::objects::{GLOBAL_HANDLE, NULL_HANDLE, ObjectTable};
pub use crate::protocol::{
    CONTROL_LIBRARY, ControlCommand, Envelope, FIRST_DYNAMIC_LIBRARY, NULL_LIBRARY, WorkerLaunch,
    decode_exact, decode_words, encode_words,
};
pub use crate::value::{HostFunction, HostObject, HostValue};
