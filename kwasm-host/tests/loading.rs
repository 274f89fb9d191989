//! Loading modules from disk and running the main context.

mod common;

use common::*;
use kwasm_core::error::KwasmError;
use kwasm_host::{BridgeConfig, Host};
use tempfile::TempDir;

/// Defines and exports its own memory; sets up TLS the way toolchain
/// output does.
const TLS_GUEST: &str = r#"
    (module
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (memory (export "memory") 1)
      (func (export "kwasm_alloc_thread_local_storage") (result i32)
        (i32.store (i32.const 16)
          (call $send (i32.const 1) (i32.const 3) (i32.const 0) (i32.const 0)))
        (i32.const 2048))
      (func (export "__wasm_init_tls") (param i32)
        (i32.store (i32.const 20) (local.get 0)))
      (func (export "main") (param i32 i32) (result i32)
        (i32.store (i32.const 24) (i32.const 1))
        (i32.const 0)))
"#;

const NO_MAIN_GUEST: &str = r#"
    (module
      (memory (export "memory") 1))
"#;

#[tokio::test]
async fn load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("guest.wasm");
    std::fs::write(&path, wasm(TLS_GUEST)).unwrap();

    let host = Host::load(BridgeConfig::testing().with_tls_size(64), &path)
        .await
        .unwrap();
    assert_eq!(host.shared().module().name(), "guest.wasm");
    assert!(host.shared_memory().is_none());

    let ctx = host.run().unwrap();
    assert_eq!(word(&ctx, 16), 64, "TLS size comes from configuration");
    assert_eq!(word(&ctx, 20), 2048, "allocated block is initialized");
    assert_eq!(word(&ctx, 24), 1, "main ran");
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = Host::load(BridgeConfig::testing(), dir.path().join("absent.wasm"))
        .await
        .unwrap_err();
    assert!(matches!(err, KwasmError::Io { .. }));
    assert_eq!(err.code(), "E504");
}

#[test]
fn missing_main_export() {
    let host = host(BridgeConfig::testing(), NO_MAIN_GUEST);
    let err = host.run().unwrap_err();
    assert!(matches!(err, KwasmError::MissingExport { .. }));
}

#[test]
fn invalid_module_bytes() {
    let err = Host::from_bytes(BridgeConfig::testing(), "junk", b"not wasm").unwrap_err();
    assert!(matches!(err, KwasmError::WasmLoad { .. }));
}

#[test]
fn shared_memory_needs_threads() {
    let err = Host::from_bytes(
        BridgeConfig::testing().with_threads(false),
        "guest",
        &wasm(BRIDGE_GUEST),
    )
    .unwrap_err();
    assert!(matches!(err, KwasmError::WasmLoad { .. } | KwasmError::ThreadsUnavailable { .. }));
}
