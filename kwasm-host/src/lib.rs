//! kwasm host - Wasmtime bridge for kwasm guests.
//!
//! This crate runs a WebAssembly guest that talks to its host through a
//! single message import:
//! - Memory bridge for copying bytes and strings across the boundary
//! - Message router with the built-in control library (id 1)
//! - Typed host libraries, registered by name from a catalog
//! - Worker threads sharing the guest's linear memory
//! - Module runtime with compilation cache and inspection
//! - Logging setup
//!
//! # Guest ABI
//!
//! ```text
//! // imports
//! env.memory                                              (shared for workers)
//! env.kwasm_message_to_host(library, command, ptr, len) -> u32
//!
//! // exports
//! main() / _start()
//! kwasm_reserve_space(len) -> ptr
//! kwasm_web_worker_entry_point(entry)                      (workers)
//! kwasm_thread_start(stack_pointer, tls_pointer, entry)    (optional)
//! set_stack_pointer(sp) or mut global __stack_pointer      (optional)
//! __wasm_init_tls(ptr), kwasm_alloc_thread_local_storage() (optional)
//! __tls_size, __tls_align                                  (optional globals)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kwasm_host::prelude::*;
//!
//! let host = Host::builder(BridgeConfig::default())
//!     .global("appName", "demo")
//!     .load("guest.wasm")
//!     .await?;
//! let _main = host.run()?;
//! host.join_workers();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod config;
pub mod context;
pub mod guest;
pub mod host;
pub mod libraries;
pub mod library;
pub mod memory;
pub mod observability;
pub mod router;
pub mod runtime;
pub mod worker;

pub use config::BridgeConfig;
pub use context::{ContextId, ContextState, GuestCall, MAIN_CONTEXT, SharedHost};
pub use guest::{GuestContext, Host, HostBuilder};
pub use library::{FnLibrary, HostLibrary, LibraryCatalog, LibraryRegistry};
pub use memory::{LinearMemory, MemoryBridge, WasmPtr};
pub use runtime::{CompiledModule, ModuleReport, WasmRuntime};
pub use worker::{WorkerPhase, WorkerPool};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::context::{ContextId, GuestCall, MAIN_CONTEXT};
    pub use crate::guest::{GuestContext, Host, HostBuilder};
    pub use crate::libraries::{OBJECTS_LIBRARY, ObjectsLibrary};
    pub use crate::library::{FnLibrary, HostLibrary, LibraryCatalog};
    pub use crate::memory::WasmPtr;
    pub use crate::observability::{TracingConfig, init_tracing};
    pub use crate::runtime::{ModuleReport, WasmRuntime};
    pub use crate::worker::WorkerPhase;
    pub use kwasm_core::prelude::*;
}
