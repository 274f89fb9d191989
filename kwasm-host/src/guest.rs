//! Host construction and the main guest context.
//!
//! [`HostBuilder`] collects configuration, catalog libraries and globals,
//! then compiles the module into a [`Host`]. The host owns everything the
//! contexts share; [`Host::instantiate_main`] creates the main context, whose
//! guest may then spawn workers through the control library.

use crate::abi::{
    ALLOC_TLS_EXPORT, INIT_TLS_EXPORT, MAIN_EXPORTS, MEMORY_EXPORT, default_value, guest_call,
};
use crate::config::BridgeConfig;
use crate::context::{ContextState, MAIN_CONTEXT, SharedHost};
use crate::host::{MemoryPlan, link_context};
use crate::library::{HostLibrary, LibraryCatalog, LibraryRegistry};
use crate::memory::{LinearMemory, MemoryBridge, WasmPtr};
use crate::runtime::{WasmRuntime, module_name};
use crate::worker::{WorkerPool, bind_bridge};
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::objects::ObjectTable;
use kwasm_core::value::{HostObject, HostValue};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Instance, SharedMemory, Store, Val, WasmParams, WasmResults};

/// Builder for a [`Host`].
pub struct HostBuilder {
    config: BridgeConfig,
    runtime: Option<Arc<WasmRuntime>>,
    catalog: LibraryCatalog,
    globals: HostObject,
}

impl HostBuilder {
    /// Start from a configuration, with the built-in libraries in the catalog.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            runtime: None,
            catalog: LibraryCatalog::with_defaults(),
            globals: HostObject::new(),
        }
    }

    /// Compile with an existing runtime (and its module cache). The runtime's
    /// configuration replaces the builder's.
    pub fn runtime(mut self, runtime: Arc<WasmRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Make a library available to the guest under `name`.
    pub fn library(mut self, name: impl Into<String>, library: Arc<dyn HostLibrary>) -> Self {
        self.catalog.insert_as(name, library);
        self
    }

    /// Set a property on the global object.
    pub fn global(self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.globals.set(name, value);
        self
    }

    /// Compile `wasm_bytes` and build the host. Blocks while compiling.
    pub fn build(self, name: &str, wasm_bytes: &[u8]) -> Result<Host> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(WasmRuntime::new(self.config)?),
        };
        let module = runtime.compile(name, wasm_bytes)?;
        let memory = MemoryPlan::for_module(runtime.engine(), module.module(), runtime.config())?;

        tracing::info!(
            module = name,
            shared_memory = memory.is_shared(),
            libraries = self.catalog.len(),
            "host ready"
        );

        Ok(Host {
            shared: Arc::new(SharedHost {
                runtime,
                module,
                catalog: self.catalog,
                globals: self.globals,
                memory,
                workers: WorkerPool::new(),
            }),
        })
    }

    /// Read and compile a module file without blocking the async runtime.
    pub async fn load(self, path: impl AsRef<Path>) -> Result<Host> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await.map_err(|e| KwasmError::Io {
            path: path.clone(),
            cause: e.to_string(),
        })?;
        let name = module_name(&path);

        tokio::task::spawn_blocking(move || self.build(&name, &bytes))
            .await
            .map_err(|e| KwasmError::Engine {
                cause: format!("compile task failed: {e}"),
            })?
    }
}

impl std::fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuilder")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// A compiled guest plus everything its contexts share.
#[derive(Debug, Clone)]
pub struct Host {
    shared: Arc<SharedHost>,
}

impl Host {
    /// Start building a host.
    pub fn builder(config: BridgeConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    /// Build a host from module bytes with the built-in libraries only.
    pub fn from_bytes(config: BridgeConfig, name: &str, wasm_bytes: &[u8]) -> Result<Self> {
        HostBuilder::new(config).build(name, wasm_bytes)
    }

    /// Load a host from a module file with the built-in libraries only.
    pub async fn load(config: BridgeConfig, path: impl AsRef<Path>) -> Result<Self> {
        HostBuilder::new(config).load(path).await
    }

    /// State shared by every context.
    pub fn shared(&self) -> &Arc<SharedHost> {
        &self.shared
    }

    /// The host configuration.
    pub fn config(&self) -> &BridgeConfig {
        self.shared.runtime().config()
    }

    /// The global object.
    pub fn globals(&self) -> &HostObject {
        self.shared.globals()
    }

    /// The shared linear memory, if the module imports one.
    pub fn shared_memory(&self) -> Option<&SharedMemory> {
        self.shared.memory.shared()
    }

    /// Workers spawned so far.
    pub fn workers(&self) -> &WorkerPool {
        self.shared.workers()
    }

    /// Wait for all workers. Returns how many threads were joined.
    pub fn join_workers(&self) -> usize {
        self.shared.workers().join_all()
    }

    /// Instantiate the module as the main context and set up its TLS.
    pub fn instantiate_main(&self) -> Result<GuestContext> {
        GuestContext::instantiate(Arc::clone(&self.shared))
    }

    /// Instantiate the main context and run its entry point.
    ///
    /// Workers the guest spawned may still be running on return.
    pub fn run(&self) -> Result<GuestContext> {
        let mut context = self.instantiate_main()?;
        context.call_main()?;
        Ok(context)
    }
}

/// The main execution context: one store and instance.
pub struct GuestContext {
    store: Store<ContextState>,
    instance: Instance,
}

impl GuestContext {
    fn instantiate(shared: Arc<SharedHost>) -> Result<Self> {
        let span = crate::instrument_context!(MAIN_CONTEXT, "main");
        let _enter = span.enter();

        let stub = shared.runtime().config().stub_unresolved_imports;
        let mut store = Store::new(
            shared.runtime().engine(),
            ContextState::new(MAIN_CONTEXT, Arc::clone(&shared)),
        );
        let (linker, memory) = link_context(&mut store, &shared, stub)?;
        let instance = linker
            .instantiate(&mut store, shared.module().module())
            .map_err(|e| KwasmError::InstantiationFailure {
                context: MAIN_CONTEXT,
                cause: format!("{e:#}"),
            })?;

        let memory = match memory {
            Some(memory) => Some(memory),
            None => exported_memory(&mut store, &instance),
        };
        match memory {
            Some(memory) => bind_bridge(&mut store, &instance, memory),
            None => tracing::warn!("guest has no linear memory; memory access will fail"),
        }

        let mut context = Self { store, instance };
        context.init_tls()?;
        Ok(context)
    }

    /// Allocate and initialize the main thread's TLS block, if the guest
    /// supports it.
    fn init_tls(&mut self) -> Result<()> {
        let alloc = self
            .instance
            .get_typed_func::<(), u32>(&mut self.store, ALLOC_TLS_EXPORT);
        let init = self
            .instance
            .get_typed_func::<u32, ()>(&mut self.store, INIT_TLS_EXPORT);
        if let (Ok(alloc), Ok(init)) = (alloc, init) {
            let block = guest_call(ALLOC_TLS_EXPORT, alloc.call(&mut self.store, ()))?;
            guest_call(INIT_TLS_EXPORT, init.call(&mut self.store, block))?;
            tracing::debug!(block, "main thread TLS initialized");
        }
        Ok(())
    }

    /// Call the guest's `main` (or `_start`).
    ///
    /// Parameters are passed as zeros and results are discarded, so both
    /// `main()` and `main(argc, argv) -> i32` work.
    pub fn call_main(&mut self) -> Result<()> {
        let (name, func) = MAIN_EXPORTS
            .iter()
            .find_map(|name| {
                self.instance
                    .get_func(&mut self.store, name)
                    .map(|func| (*name, func))
            })
            .ok_or_else(|| KwasmError::missing_export(MAIN_EXPORTS.join(" or ")))?;

        let ty = func.ty(&self.store);
        let params = ty
            .params()
            .map(|ty| {
                default_value(&ty).ok_or_else(|| KwasmError::GuestTrap {
                    function: name.to_string(),
                    cause: format!("entry point takes a {ty} parameter"),
                })
            })
            .collect::<Result<Vec<Val>>>()?;
        let mut results = vec![Val::I32(0); ty.results().len()];

        tracing::debug!(entry = name, "calling guest entry point");
        guest_call(name, func.call(&mut self.store, &params, &mut results))
    }

    /// Call a typed guest export.
    pub fn call<Params, Results>(&mut self, name: &str, params: Params) -> Result<Results>
    where
        Params: WasmParams,
        Results: WasmResults,
    {
        let func = self
            .instance
            .get_typed_func::<Params, Results>(&mut self.store, name)
            .map_err(|_| KwasmError::missing_export(name))?;
        guest_call(name, func.call(&mut self.store, params))
    }

    fn bridge(&self) -> Result<MemoryBridge> {
        self.store.data().bridge().cloned()
    }

    /// Copy bytes out of linear memory.
    pub fn view(&self, offset: u32, length: u32) -> Result<Vec<u8>> {
        self.bridge()?.view(&self.store, offset, length)
    }

    /// Write bytes into linear memory.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.bridge()?.write(&mut self.store, offset, bytes)
    }

    /// Decode a UTF-8 string from linear memory.
    pub fn read_string(&self, offset: u32, length: u32) -> Result<String> {
        self.bridge()?.read_string(&self.store, offset, length)
    }

    /// Hand a string to the guest through `kwasm_reserve_space`.
    pub fn write_string(&mut self, text: &str) -> Result<WasmPtr> {
        self.bridge()?.write_string(&mut self.store, text)
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> Result<usize> {
        Ok(self.bridge()?.size(&self.store))
    }

    /// This context's object table.
    pub fn objects(&self) -> &ObjectTable {
        self.store.data().objects()
    }

    /// Mutable access to the object table.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        self.store.data_mut().objects_mut()
    }

    /// Libraries registered in this context.
    pub fn libraries(&self) -> &LibraryRegistry {
        self.store.data().libraries()
    }

    /// Register a library directly, without going through the catalog.
    pub fn register_library(&mut self, library: Arc<dyn HostLibrary>) -> u32 {
        self.store.data_mut().libraries_mut().register(library)
    }

    /// The Wasmtime store.
    pub fn store(&self) -> &Store<ContextState> {
        &self.store
    }

    /// Mutable access to the Wasmtime store.
    pub fn store_mut(&mut self) -> &mut Store<ContextState> {
        &mut self.store
    }

    /// The Wasmtime instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

impl std::fmt::Debug for GuestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestContext")
            .field("state", self.store.data())
            .finish_non_exhaustive()
    }
}

fn exported_memory(store: &mut Store<ContextState>, instance: &Instance) -> Option<LinearMemory> {
    if let Some(memory) = instance.get_memory(&mut *store, MEMORY_EXPORT) {
        return Some(LinearMemory::Local(memory));
    }
    instance
        .get_shared_memory(&mut *store, MEMORY_EXPORT)
        .map(LinearMemory::Shared)
}
