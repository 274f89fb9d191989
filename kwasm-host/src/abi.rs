//! Names and shapes of the guest ABI.
//!
//! Everything the host looks up by name in a guest module, or defines for it,
//! is listed here.

use kwasm_core::error::{KwasmError, Result};
use wasmtime::{Val, ValType};

/// Import module for everything the host provides.
pub const BRIDGE_MODULE: &str = "env";

/// `kwasm_message_to_host(library, command, ptr, len) -> u32`.
pub const DELIVER_IMPORT: &str = "kwasm_message_to_host";

/// Name of the linear memory import.
pub const MEMORY_IMPORT: &str = "memory";

/// Name of an exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// `kwasm_reserve_space(len) -> ptr`: guest-side buffer for host-to-guest data.
pub const RESERVE_SPACE_EXPORT: &str = "kwasm_reserve_space";

/// `kwasm_web_worker_entry_point(entry)`: per-thread entry on workers.
pub const WORKER_ENTRY_EXPORT: &str = "kwasm_web_worker_entry_point";

/// `kwasm_thread_start(stack_pointer, tls_pointer, entry)`: optional
/// replacement for the whole worker start sequence.
pub const THREAD_START_EXPORT: &str = "kwasm_thread_start";

/// `set_stack_pointer(sp)`.
pub const SET_STACK_POINTER_EXPORT: &str = "set_stack_pointer";

/// Mutable stack pointer global, used when `set_stack_pointer` is absent.
pub const STACK_POINTER_GLOBAL: &str = "__stack_pointer";

/// `__wasm_init_tls(ptr)`.
pub const INIT_TLS_EXPORT: &str = "__wasm_init_tls";

/// `kwasm_alloc_thread_local_storage() -> ptr`, main context only.
pub const ALLOC_TLS_EXPORT: &str = "kwasm_alloc_thread_local_storage";

/// Exported global holding the TLS block size.
pub const TLS_SIZE_GLOBAL: &str = "__tls_size";

/// Exported global holding the TLS block alignment.
pub const TLS_ALIGN_GLOBAL: &str = "__tls_align";

/// Program entry points, tried in order.
pub const MAIN_EXPORTS: [&str; 2] = ["main", "_start"];

/// Zero value for a Wasm type, if it has one a stub can return.
///
/// Reference types have no value the host can fabricate for an arbitrary
/// guest, so they yield `None`.
pub fn default_value(ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => Some(Val::I32(0)),
        ValType::I64 => Some(Val::I64(0)),
        ValType::F32 => Some(Val::F32(0)),
        ValType::F64 => Some(Val::F64(0)),
        ValType::V128 => Some(Val::V128(0u128.into())),
        ValType::Ref(_) => None,
    }
}

/// Attach the guest function name to a Wasmtime call result.
pub(crate) fn guest_call<R>(function: &str, result: wasmtime::Result<R>) -> Result<R> {
    result.map_err(|e| KwasmError::GuestTrap {
        function: function.to_string(),
        cause: format!("{e:#}"),
    })
}
