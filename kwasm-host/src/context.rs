//! Execution contexts.
//!
//! A context is one Wasmtime store plus instance: the main context, or one
//! worker. Each has its own object table and library registry, held in the
//! store as [`ContextState`]. What all contexts share (engine, module, shared
//! memory, catalog, globals, worker pool) lives in [`SharedHost`] behind an
//! `Arc`.

use crate::host::MemoryPlan;
use crate::library::{LibraryCatalog, LibraryRegistry};
use crate::memory::{MemoryBridge, WasmPtr};
use crate::runtime::{CompiledModule, WasmRuntime};
use crate::worker::WorkerPool;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::objects::ObjectTable;
use kwasm_core::value::{HostObject, HostValue};
use std::sync::Arc;
use wasmtime::Caller;

/// Identifier of an execution context.
pub type ContextId = u32;

/// The main context's id; workers count up from 1.
pub const MAIN_CONTEXT: ContextId = 0;

/// State shared by every context of one host.
pub struct SharedHost {
    pub(crate) runtime: Arc<WasmRuntime>,
    pub(crate) module: Arc<CompiledModule>,
    pub(crate) catalog: LibraryCatalog,
    pub(crate) globals: HostObject,
    pub(crate) memory: MemoryPlan,
    pub(crate) workers: WorkerPool,
}

impl SharedHost {
    /// The runtime owning the engine.
    pub fn runtime(&self) -> &Arc<WasmRuntime> {
        &self.runtime
    }

    /// The compiled guest module.
    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// Libraries the guest may register by name.
    pub fn catalog(&self) -> &LibraryCatalog {
        &self.catalog
    }

    /// The global object every context sees at handle 1.
    pub fn globals(&self) -> &HostObject {
        &self.globals
    }

    /// Workers spawned so far.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }
}

impl std::fmt::Debug for SharedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHost")
            .field("module", &self.module.name())
            .field("catalog", &self.catalog)
            .field("memory", &self.memory)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

/// Per-context data stored in the Wasmtime store.
#[derive(Debug)]
pub struct ContextState {
    id: ContextId,
    shared: Arc<SharedHost>,
    bridge: Option<MemoryBridge>,
    objects: ObjectTable,
    libraries: LibraryRegistry,
}

impl ContextState {
    pub(crate) fn new(id: ContextId, shared: Arc<SharedHost>) -> Self {
        let objects = ObjectTable::new(HostValue::Object(shared.globals.clone()));
        Self {
            id,
            shared,
            bridge: None,
            objects,
            libraries: LibraryRegistry::new(),
        }
    }

    /// This context's id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// State shared with the other contexts.
    pub fn shared(&self) -> &Arc<SharedHost> {
        &self.shared
    }

    /// The memory bridge, once the instance's memory is bound.
    pub fn bridge(&self) -> Result<&MemoryBridge> {
        self.bridge
            .as_ref()
            .ok_or(KwasmError::MemoryUnavailable { context: self.id })
    }

    pub(crate) fn bind_bridge(&mut self, bridge: MemoryBridge) {
        self.bridge = Some(bridge);
    }

    /// This context's object table.
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Mutable access to the object table.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Libraries registered in this context.
    pub fn libraries(&self) -> &LibraryRegistry {
        &self.libraries
    }

    /// Mutable access to the library registry.
    pub fn libraries_mut(&mut self) -> &mut LibraryRegistry {
        &mut self.libraries
    }
}

/// What a library sees while handling one message.
///
/// Wraps the Wasmtime caller, so memory access reaches the calling context's
/// instance and reentrant guest calls (`write_string`) are possible.
pub struct GuestCall<'a, 'c> {
    caller: &'a mut Caller<'c, ContextState>,
}

impl<'a, 'c> GuestCall<'a, 'c> {
    pub(crate) fn new(caller: &'a mut Caller<'c, ContextState>) -> Self {
        Self { caller }
    }

    fn bridge(&self) -> Result<MemoryBridge> {
        self.caller.data().bridge().cloned()
    }

    /// Id of the calling context.
    pub fn context_id(&self) -> ContextId {
        self.caller.data().id()
    }

    /// The context's object table.
    pub fn objects(&self) -> &ObjectTable {
        self.caller.data().objects()
    }

    /// Mutable access to the context's object table.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        self.caller.data_mut().objects_mut()
    }

    /// Resolve a handle.
    pub fn object(&self, handle: u32) -> Result<&HostValue> {
        self.objects().get(handle)
    }

    /// Store a value, returning its handle.
    pub fn insert(&mut self, value: HostValue) -> Result<u32> {
        self.objects_mut().insert(value)
    }

    /// Release a handle.
    pub fn release(&mut self, handle: u32) -> Option<HostValue> {
        self.objects_mut().release(handle)
    }

    /// The global object.
    pub fn global(&self) -> &HostObject {
        self.caller.data().shared().globals()
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> Result<usize> {
        Ok(self.bridge()?.size(&*self.caller))
    }

    /// Copy bytes out of linear memory.
    pub fn view(&self, offset: u32, length: u32) -> Result<Vec<u8>> {
        self.bridge()?.view(&*self.caller, offset, length)
    }

    /// Write bytes into linear memory.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.bridge()?.write(&mut *self.caller, offset, bytes)
    }

    /// Decode a UTF-8 string from linear memory.
    pub fn read_string(&self, offset: u32, length: u32) -> Result<String> {
        self.bridge()?.read_string(&*self.caller, offset, length)
    }

    /// Hand bytes to the guest through `kwasm_reserve_space`.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<WasmPtr> {
        self.bridge()?.write_bytes(&mut *self.caller, bytes)
    }

    /// Hand a string to the guest through `kwasm_reserve_space`.
    pub fn write_string(&mut self, text: &str) -> Result<WasmPtr> {
        self.bridge()?.write_string(&mut *self.caller, text)
    }

    /// The underlying Wasmtime caller.
    pub fn caller(&mut self) -> &mut Caller<'c, ContextState> {
        &mut *self.caller
    }
}

/// Decode payload bytes as strict UTF-8.
///
/// `offset` is only used to make the error point at guest memory.
pub fn decode_text(bytes: &[u8], offset: u32) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| KwasmError::InvalidEncoding {
        offset,
        length: bytes.len() as u32,
        cause: e.to_string(),
    })
}
