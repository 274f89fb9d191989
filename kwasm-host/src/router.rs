//! Message router: the host side of `kwasm_message_to_host`.
//!
//! Library 1 is the control table, handled here. Any other id is looked up in
//! the calling context's registry and forwarded with a copy of the payload.
//! Nothing that goes wrong while servicing one message reaches the guest as a
//! trap: the failure is logged and the guest gets 0.

use crate::abi::{TLS_ALIGN_GLOBAL, TLS_SIZE_GLOBAL};
use crate::context::{ContextState, GuestCall, decode_text};
use crate::libraries::objects::read_property;
use crate::observability::GUEST_LOG_TARGET;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::protocol::{ControlCommand, Envelope, WorkerLaunch, decode_exact};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use wasmtime::{Caller, Extern};

/// Entry point bound to `env.kwasm_message_to_host`.
pub(crate) fn deliver(mut caller: Caller<'_, ContextState>, envelope: Envelope) -> u32 {
    match route(&mut caller, envelope) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(
                context = caller.data().id(),
                library = envelope.library_id,
                command = envelope.command_id,
                code = err.code(),
                "message failed: {err}"
            );
            0
        }
    }
}

/// Route one message and return the value the guest should see.
pub fn route(caller: &mut Caller<'_, ContextState>, envelope: Envelope) -> Result<u32> {
    if envelope.is_control() {
        let command = ControlCommand::try_from(envelope.command_id)?;
        return control(caller, command, envelope);
    }

    let library = caller.data().libraries().resolve(envelope.library_id)?;
    let data = payload(caller, envelope)?;
    tracing::trace!(
        context = caller.data().id(),
        library = envelope.library_id,
        name = library.name(),
        command = envelope.command_id,
        len = data.len(),
        "dispatching"
    );

    let mut call = GuestCall::new(caller);
    catch_unwind(AssertUnwindSafe(|| {
        library.dispatch(&mut call, envelope.command_id, &data)
    }))
    .unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Err(KwasmError::LibraryPanic {
            library_id: envelope.library_id,
            message,
        })
    })
    .map_err(|err| match err {
        // Libraries do not know the id they were registered under.
        KwasmError::UnknownCommand { command, .. } => KwasmError::UnknownCommand {
            library_id: envelope.library_id,
            command,
        },
        other => other,
    })
}

/// Copy the payload out of guest memory. An empty payload needs no memory.
fn payload(caller: &Caller<'_, ContextState>, envelope: Envelope) -> Result<Vec<u8>> {
    if envelope.data_len == 0 {
        return Ok(Vec::new());
    }
    caller
        .data()
        .bridge()?
        .view(caller, envelope.data_ptr, envelope.data_len)
}

fn control(
    caller: &mut Caller<'_, ContextState>,
    command: ControlCommand,
    envelope: Envelope,
) -> Result<u32> {
    let context = caller.data().id();
    match command {
        ControlCommand::NewLibrary => {
            let data = payload(caller, envelope)?;
            let name = decode_text(&data, envelope.data_ptr)?;
            let library = caller.data().shared().catalog().get(name)?;
            let id = caller.data_mut().libraries_mut().register(library);
            tracing::info!(context, library = name, id, "registered library");
            Ok(id)
        }
        ControlCommand::Log | ControlCommand::LogError => {
            let data = payload(caller, envelope)?;
            let text = decode_text(&data, envelope.data_ptr)?;
            if command == ControlCommand::Log {
                tracing::info!(target: GUEST_LOG_TARGET, context, "{text}");
            } else {
                tracing::error!(target: GUEST_LOG_TARGET, context, "{text}");
            }
            Ok(0)
        }
        ControlCommand::TlsSize => {
            let configured = caller.data().shared().runtime().config().tls_size;
            Ok(configured
                .or_else(|| exported_u32(caller, TLS_SIZE_GLOBAL))
                .unwrap_or(0))
        }
        ControlCommand::TlsAlign => {
            let configured = caller.data().shared().runtime().config().tls_align;
            Ok(configured
                .or_else(|| exported_u32(caller, TLS_ALIGN_GLOBAL))
                .unwrap_or(0))
        }
        ControlCommand::AvailableThreads => Ok(available_threads(caller.data())),
        ControlCommand::SpawnWorker => {
            let data = payload(caller, envelope)?;
            let launch = WorkerLaunch::decode(&data)?;
            let shared = Arc::clone(caller.data().shared());
            let worker = shared.workers().spawn(&shared, launch)?;
            tracing::debug!(context, worker, ?launch, "spawn requested");
            Ok(0)
        }
        ControlCommand::Reserved => {
            tracing::warn!(context, "reserved control command ignored");
            Ok(0)
        }
        ControlCommand::GetProperty => {
            let data = payload(caller, envelope)?;
            let [object, property] = decode_exact::<2>(&data, "property lookup")?;
            let objects = caller.data_mut().objects_mut();
            let key = objects.get(property)?;
            let name = key
                .as_str()
                .ok_or(KwasmError::TypeMismatch {
                    handle: property,
                    expected: "string",
                    found: key.kind(),
                })?
                .to_owned();
            read_property(objects, object, &name)
        }
    }
}

/// Value of an exported `i32` global, if the guest has one.
fn exported_u32(caller: &mut Caller<'_, ContextState>, name: &str) -> Option<u32> {
    let global = caller.get_export(name).and_then(Extern::into_global)?;
    global.get(&mut *caller).i32().map(|v| v as u32)
}

/// Worker threads the guest may start.
///
/// Without shared memory or with threads disabled this is 1, the caller's
/// own thread.
pub fn available_threads(state: &ContextState) -> u32 {
    let shared = state.shared();
    let config = shared.runtime().config();
    if !config.threads_enabled || !shared.memory.is_shared() {
        return 1;
    }
    config.max_workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    })
}
