//! Host function bindings and import resolution.
//!
//! Every context links the same way: the bridge import
//! `env.kwasm_message_to_host`, the linear memory the module expects, and,
//! where enabled, logging stubs for every function import nobody provides.
//! Workers always stub, since host functions that only exist on the main
//! thread (or nowhere) must not keep a worker from starting.

use crate::abi::{BRIDGE_MODULE, DELIVER_IMPORT, default_value};
use crate::config::BridgeConfig;
use crate::context::{ContextState, SharedHost};
use crate::memory::LinearMemory;
use crate::router;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::protocol::Envelope;
use wasmtime::{
    Caller, Engine, ExternType, Func, Linker, Memory, MemoryType, Module, SharedMemory, Store,
    ValType,
};

/// Where a context's linear memory comes from.
#[derive(Clone)]
pub enum MemoryPlan {
    /// The module imports shared memory: one instance for every context.
    Shared {
        /// Import module.
        module: String,
        /// Import name.
        name: String,
        /// The memory itself.
        memory: SharedMemory,
    },
    /// The module imports non-shared memory: each store gets its own.
    Local {
        /// Import module.
        module: String,
        /// Import name.
        name: String,
        /// Type of the memory to create.
        ty: MemoryType,
    },
    /// The module defines its own memory.
    Exported,
}

impl std::fmt::Debug for MemoryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared { module, name, memory } => f
                .debug_struct("Shared")
                .field("import", &format_args!("{module}.{name}"))
                .field("bytes", &memory.data_size())
                .finish(),
            Self::Local { module, name, ty } => f
                .debug_struct("Local")
                .field("import", &format_args!("{module}.{name}"))
                .field("ty", ty)
                .finish(),
            Self::Exported => f.write_str("Exported"),
        }
    }
}

impl MemoryPlan {
    /// Decide how to provide memory for `module`.
    ///
    /// Memory the host creates starts at the larger of the module's minimum
    /// and the configured initial size, and is capped by the module's own
    /// maximum or, failing that, the configured maximum.
    pub fn for_module(engine: &Engine, module: &Module, config: &BridgeConfig) -> Result<Self> {
        let Some((import_module, import_name, ty)) = module.imports().find_map(|import| {
            match import.ty() {
                ExternType::Memory(ty) => Some((import.module(), import.name(), ty)),
                _ => None,
            }
        }) else {
            return Ok(Self::Exported);
        };

        if ty.is_64() {
            return Err(KwasmError::InstantiationFailure {
                context: crate::context::MAIN_CONTEXT,
                cause: "64-bit linear memory is not supported".to_string(),
            });
        }

        let maximum = ty
            .maximum()
            .unwrap_or(config.max_memory_pages as u64)
            .min(u32::MAX as u64) as u32;
        let minimum = (ty.minimum() as u32).max(config.initial_memory_pages).min(maximum);

        if ty.is_shared() {
            if !config.threads_enabled {
                return Err(KwasmError::ThreadsUnavailable {
                    cause: "module imports shared memory but threads are disabled".to_string(),
                });
            }
            let memory = SharedMemory::new(engine, MemoryType::shared(minimum, maximum))
                .map_err(|e| KwasmError::Engine {
                    cause: format!("failed to create shared memory: {e:#}"),
                })?;
            tracing::debug!(minimum, maximum, "created shared memory");
            Ok(Self::Shared {
                module: import_module.to_string(),
                name: import_name.to_string(),
                memory,
            })
        } else {
            Ok(Self::Local {
                module: import_module.to_string(),
                name: import_name.to_string(),
                ty: MemoryType::new(minimum, Some(maximum)),
            })
        }
    }

    /// Whether contexts share one memory.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }

    /// The shared memory, if any.
    pub fn shared(&self) -> Option<&SharedMemory> {
        match self {
            Self::Shared { memory, .. } => Some(memory),
            _ => None,
        }
    }
}

/// Register the bridge import with a linker.
pub fn register_host_functions(linker: &mut Linker<ContextState>) -> Result<()> {
    // kwasm_message_to_host(library: u32, command: u32, ptr: u32, len: u32) -> u32
    linker
        .func_wrap(
            BRIDGE_MODULE,
            DELIVER_IMPORT,
            |caller: Caller<'_, ContextState>,
             library_id: u32,
             command_id: u32,
             data_ptr: u32,
             data_len: u32|
             -> u32 {
                router::deliver(
                    caller,
                    Envelope::new(library_id, command_id, data_ptr, data_len),
                )
            },
        )
        .map_err(|e| KwasmError::Engine {
            cause: format!("failed to register {DELIVER_IMPORT}: {e}"),
        })?;

    Ok(())
}

/// Build a linker for one context and provide its memory.
///
/// Returns the memory the host created, or `None` when the module brings its
/// own.
pub(crate) fn link_context(
    store: &mut Store<ContextState>,
    shared: &SharedHost,
    stub_unresolved: bool,
) -> Result<(Linker<ContextState>, Option<LinearMemory>)> {
    let mut linker = Linker::new(shared.runtime().engine());
    register_host_functions(&mut linker)?;

    let memory = match &shared.memory {
        MemoryPlan::Shared {
            module,
            name,
            memory,
        } => {
            linker
                .define(&mut *store, module, name, memory.clone())
                .map_err(|e| KwasmError::Engine {
                    cause: format!("failed to define {module}.{name}: {e}"),
                })?;
            Some(LinearMemory::Shared(memory.clone()))
        }
        MemoryPlan::Local { module, name, ty } => {
            let memory = Memory::new(&mut *store, ty.clone()).map_err(|e| KwasmError::Engine {
                cause: format!("failed to create memory: {e:#}"),
            })?;
            linker
                .define(&mut *store, module, name, memory)
                .map_err(|e| KwasmError::Engine {
                    cause: format!("failed to define {module}.{name}: {e}"),
                })?;
            Some(LinearMemory::Local(memory))
        }
        MemoryPlan::Exported => None,
    };

    if stub_unresolved {
        let stubbed = define_stub_imports(&mut linker, store, shared.module().module())?;
        if stubbed > 0 {
            tracing::debug!(context = store.data().id(), stubbed, "stubbed unresolved imports");
        }
    }

    Ok((linker, memory))
}

/// Define a stub for every function import the linker cannot resolve.
///
/// A stub logs a warning naming the import and returns zero for each result.
/// Results without a zero value (references) make the stub trap. Non-function
/// imports are left alone, so instantiation reports them.
pub fn define_stub_imports(
    linker: &mut Linker<ContextState>,
    store: &mut Store<ContextState>,
    module: &Module,
) -> Result<usize> {
    let mut stubbed = 0;
    for import in module.imports() {
        if linker
            .get(&mut *store, import.module(), import.name())
            .is_some()
        {
            continue;
        }
        let ExternType::Func(ty) = import.ty() else {
            continue;
        };

        let qualified = format!("{}.{}", import.module(), import.name());
        let results: Vec<ValType> = ty.results().collect();
        let func = Func::new(&mut *store, ty, move |caller, _params, out| {
            tracing::warn!(
                context = caller.data().id(),
                import = %qualified,
                "unimplemented import called; returning defaults"
            );
            for (slot, ty) in out.iter_mut().zip(&results) {
                *slot = default_value(ty).ok_or_else(|| {
                    anyhow::anyhow!("stub for {qualified} cannot produce a default {ty}")
                })?;
            }
            Ok(())
        });

        linker
            .define(&mut *store, import.module(), import.name(), func)
            .map_err(|e| KwasmError::Engine {
                cause: format!(
                    "failed to stub {}.{}: {e}",
                    import.module(),
                    import.name()
                ),
            })?;
        stubbed += 1;
    }
    Ok(stubbed)
}
