//! Integration tests for worker spawning.

mod common;

use common::*;
use kwasm_core::error::KwasmError;
use kwasm_core::protocol::WorkerLaunch;
use kwasm_host::{BridgeConfig, WorkerPhase};

/// Records what each step of the worker start sequence observed.
///
/// 100: stack pointer passed to `set_stack_pointer`
/// 104: stack pointer seen by `__wasm_init_tls`
/// 108: TLS pointer
/// 112: stack pointer seen by the entry point
/// 116: entry argument
/// 120: result of an import no host provides
/// 124: done flag
/// 128: TLS pointer as seen by the entry point
/// 132: library id the worker got for `kwasm.objects` (name at 700)
const WORKER_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16 shared))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (import "env" "unknown_host_fn" (func $unknown (param i32) (result i32)))
      (global $sp (mut i32) (i32.const 0))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "spawn") (param $entry i32) (param $stack i32) (param $tls i32) (result i32)
        (i32.store (i32.const 200) (local.get $entry))
        (i32.store (i32.const 204) (local.get $stack))
        (i32.store (i32.const 208) (local.get $tls))
        (call $send (i32.const 1) (i32.const 6) (i32.const 200) (i32.const 12)))
      (func (export "set_stack_pointer") (param i32)
        (global.set $sp (local.get 0))
        (i32.store (i32.const 100) (local.get 0)))
      (func (export "__wasm_init_tls") (param i32)
        (i32.store (i32.const 104) (global.get $sp))
        (i32.store (i32.const 108) (local.get 0)))
      (func (export "kwasm_web_worker_entry_point") (param i32)
        (i32.store (i32.const 112) (global.get $sp))
        (i32.store (i32.const 116) (local.get 0))
        (i32.store (i32.const 120) (call $unknown (i32.const 5)))
        (i32.store (i32.const 128) (i32.load (i32.const 108)))
        (i32.store (i32.const 132)
          (call $send (i32.const 1) (i32.const 0) (i32.const 700) (i32.const 13)))
        (i32.atomic.store (i32.const 124) (i32.const 1)))
      (func (export "main")))
"#;

const THREAD_START_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16 shared))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "kwasm_thread_start") (param i32 i32 i32)
        (i32.store (i32.const 300) (local.get 0))
        (i32.store (i32.const 304) (local.get 1))
        (i32.store (i32.const 308) (local.get 2)))
      (func (export "set_stack_pointer") (param i32)
        (i32.store (i32.const 320) (i32.const 999)))
      (func (export "kwasm_web_worker_entry_point") (param i32)
        (i32.store (i32.const 324) (i32.const 999)))
      (func (export "main")))
"#;

const STACK_GLOBAL_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16 shared))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (global $sp (export "__stack_pointer") (mut i32) (i32.const 0))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "kwasm_web_worker_entry_point") (param i32)
        (i32.store (i32.const 400) (global.get $sp)))
      (func (export "main")))
"#;

/// Shared memory but no worker entry point.
const NO_ENTRY_GUEST: &str = r#"
    (module
      (import "env" "memory" (memory 1 16 shared))
      (import "env" "kwasm_message_to_host" (func $send (param i32 i32 i32 i32) (result i32)))
      (func (export "send") (param i32 i32 i32 i32) (result i32)
        (call $send (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
      (func (export "main")))
"#;

fn spawn(ctx: &mut kwasm_host::GuestContext, launch: WorkerLaunch) -> u32 {
    send_bytes(ctx, 1, 6, 200, &launch.encode())
}

#[test]
fn worker_bootstrap_order() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), WORKER_GUEST);
    ctx.write(120, &[0xFF; 4]).unwrap();
    ctx.write(700, b"kwasm.objects").unwrap();
    // The main context registers first; the worker has its own registry.
    assert_eq!(send(&mut ctx, 1, 0, 700, 13), 2);
    assert_eq!(send(&mut ctx, 1, 0, 700, 13), 3);

    let result = ctx
        .call::<(u32, u32, u32), u32>("spawn", (1024, 65536, 4096))
        .unwrap();
    assert_eq!(result, 0);
    assert_eq!(host.join_workers(), 1);

    assert_eq!(word(&ctx, 124), 1, "entry point ran");
    assert_eq!(word(&ctx, 100), 65536);
    assert_eq!(word(&ctx, 104), 65536, "stack pointer set before TLS init");
    assert_eq!(word(&ctx, 108), 4096);
    assert_eq!(word(&ctx, 112), 65536);
    assert_eq!(word(&ctx, 116), 1024);
    assert_eq!(word(&ctx, 120), 0, "stubbed import returns zero");
    assert_eq!(word(&ctx, 128), 4096, "TLS initialized before entry");
    assert_eq!(word(&ctx, 132), 2, "worker registry starts at 2");

    assert_eq!(host.workers().phase(1), Some(WorkerPhase::Finished));
    assert_eq!(host.workers().live(), 0);
    assert_eq!(ctx.libraries().len(), 2);
}

#[test]
fn several_workers_get_distinct_ids() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), WORKER_GUEST);
    ctx.write(700, b"kwasm.objects").unwrap();
    for entry in 0..3 {
        assert_eq!(spawn(&mut ctx, WorkerLaunch::new(entry, 65536, 4096)), 0);
    }
    assert_eq!(host.join_workers(), 3);

    let snapshot = host.workers().snapshot();
    assert_eq!(
        snapshot,
        vec![
            (1, WorkerPhase::Finished),
            (2, WorkerPhase::Finished),
            (3, WorkerPhase::Finished)
        ]
    );
}

#[test]
fn thread_start_hook_replaces_sequence() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), THREAD_START_GUEST);
    assert_eq!(spawn(&mut ctx, WorkerLaunch::new(7, 65536, 4096)), 0);
    host.join_workers();

    assert_eq!(word(&ctx, 300), 65536);
    assert_eq!(word(&ctx, 304), 4096);
    assert_eq!(word(&ctx, 308), 7);
    assert_eq!(word(&ctx, 320), 0, "set_stack_pointer not called");
    assert_eq!(word(&ctx, 324), 0, "entry point not called");
    assert_eq!(host.workers().phase(1), Some(WorkerPhase::Finished));
}

#[test]
fn stack_pointer_global_fallback() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), STACK_GLOBAL_GUEST);
    assert_eq!(spawn(&mut ctx, WorkerLaunch::new(1, 32768, 0)), 0);
    host.join_workers();
    assert_eq!(word(&ctx, 400), 32768);
}

#[test]
fn worker_failure_is_isolated() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), NO_ENTRY_GUEST);
    assert_eq!(spawn(&mut ctx, WorkerLaunch::new(1, 65536, 4096)), 0);
    assert_eq!(host.join_workers(), 1);
    assert_eq!(host.workers().phase(1), Some(WorkerPhase::Failed));

    // The main context is untouched.
    assert_eq!(send_bytes(&mut ctx, 1, 1, 512, b"still here"), 0);
    ctx.call_main().unwrap();
}

#[test]
fn malformed_launch_record_spawns_nothing() {
    let (host, mut ctx) = main_context(BridgeConfig::testing(), WORKER_GUEST);
    assert_eq!(send_bytes(&mut ctx, 1, 6, 200, &[0; 8]), 0);
    assert_eq!(host.workers().spawned(), 0);
    assert_eq!(host.join_workers(), 0);
}

#[test]
fn main_without_stubs_rejects_unresolved_imports() {
    let host = host(BridgeConfig::testing().with_stub_imports(false), WORKER_GUEST);
    let err = host.instantiate_main().unwrap_err();
    assert!(matches!(err, KwasmError::InstantiationFailure { context: 0, .. }));
}

#[test]
fn run_calls_main() {
    let host = host(BridgeConfig::testing(), WORKER_GUEST);
    let ctx = host.run().unwrap();
    assert_eq!(word(&ctx, 124), 0);
    assert!(host.shared_memory().is_some());
}
