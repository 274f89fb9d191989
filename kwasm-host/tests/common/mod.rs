//! Common test utilities for integration tests.

#![allow(dead_code)]

use kwasm_host::{BridgeConfig, FnLibrary, GuestContext, Host, HostLibrary};
use parking_lot::Mutex;
use std::sync::Arc;

/// Offset `kwasm_reserve_space` always hands out.
pub const RESERVE_AT: u32 = 8192;

/// Guest with shared memory, a `send` trampoline, a `grow` export and a
/// `__tls_size` global.
pub const BRIDGE_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16 shared))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (global (export "__tls_size") i32 (i32.const 32))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "kwasm_reserve_space") (param i32) (result i32)
        (i32.const 8192))
      (func (export "grow") (param i32) (result i32)
        (memory.grow (local.get 0)))
      (func (export "main")))
"#;

/// Same as [`BRIDGE_GUEST`] but with per-store memory.
pub const LOCAL_MEMORY_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "kwasm_reserve_space") (param i32) (result i32)
        (i32.const 8192))
      (func (export "grow") (param i32) (result i32)
        (memory.grow (local.get 0)))
      (func (export "main")))
"#;

/// Compile WAT text.
pub fn wasm(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("Failed to parse WAT")
}

/// Build a host for `wat` with the built-in libraries.
pub fn host(config: BridgeConfig, wat: &str) -> Host {
    Host::from_bytes(config, "test_guest", &wasm(wat)).expect("Failed to build host")
}

/// Instantiate the main context of a fresh host for `wat`.
pub fn main_context(config: BridgeConfig, wat: &str) -> (Host, GuestContext) {
    let host = host(config, wat);
    let context = host.instantiate_main().expect("Failed to instantiate main");
    (host, context)
}

/// Send a message through the guest's `send` export, as guest code would.
pub fn send(context: &mut GuestContext, library: u32, command: u32, ptr: u32, len: u32) -> u32 {
    context
        .call::<(u32, u32, u32, u32), u32>("send", (library, command, ptr, len))
        .expect("send trapped")
}

/// Write `bytes` at `ptr` and send them as a payload.
pub fn send_bytes(
    context: &mut GuestContext,
    library: u32,
    command: u32,
    ptr: u32,
    bytes: &[u8],
) -> u32 {
    context.write(ptr, bytes).expect("Failed to write payload");
    send(context, library, command, ptr, bytes.len() as u32)
}

/// Read a little-endian word from guest memory.
pub fn word(context: &GuestContext, offset: u32) -> u32 {
    let bytes = context.view(offset, 4).expect("Failed to read word");
    u32::from_le_bytes(bytes.try_into().expect("four bytes"))
}

/// Calls a recording library has seen.
pub type Calls = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

/// A library that records `(command, payload)` and returns `payload.len() + 100`.
pub fn recorder(name: &str) -> (Arc<dyn HostLibrary>, Calls) {
    let calls: Calls = Arc::default();
    let seen = Arc::clone(&calls);
    let library = FnLibrary::new(name, move |_call, command, data| {
        seen.lock().push((command, data.to_vec()));
        Ok(data.len() as u32 + 100)
    });
    (Arc::new(library), calls)
}

/// Grow guest memory by `pages` from inside the guest, returning the old page count.
pub fn grow(context: &mut GuestContext, pages: u32) -> u32 {
    context
        .call::<u32, u32>("grow", pages)
        .expect("grow trapped")
}
