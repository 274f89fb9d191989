//! WASM runtime management using Wasmtime.
//!
//! Provides engine configuration, module compilation, caching and module
//! inspection. One runtime can back many hosts; the engine is shared by the
//! main context and every worker.

use crate::abi;
use crate::config::BridgeConfig;
use dashmap::DashMap;
use kwasm_core::error::{KwasmError, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, ExternType, Module};

impl BridgeConfig {
    /// Create a Wasmtime Config from this configuration.
    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();

        // Shared memories and atomics come with the threads proposal.
        config.wasm_threads(self.threads_enabled);

        config.debug_info(self.debug_info);

        config.strategy(wasmtime::Strategy::Cranelift);

        config
    }
}

/// A compiled WASM module ready for instantiation.
#[derive(Debug)]
pub struct CompiledModule {
    name: String,
    module: Module,
    hash: u64,
}

impl CompiledModule {
    /// Get the underlying Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Name the module was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the hash of the module bytes.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// One import or export of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleItem {
    /// Import module, empty for exports.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub module: String,
    /// Field name.
    pub name: String,
    /// `func`, `global`, `table` or `memory`.
    pub kind: &'static str,
}

/// What a module imports, exports, and which bridge ABI entries it provides.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    /// Module name.
    pub name: String,
    /// All imports.
    pub imports: Vec<ModuleItem>,
    /// All exports.
    pub exports: Vec<ModuleItem>,
    /// The module imports a shared linear memory.
    pub shared_memory: bool,
    /// The module imports the bridge message function.
    pub uses_bridge: bool,
    /// The module exports `kwasm_reserve_space`.
    pub reserve_space: bool,
    /// The module can run as a worker.
    pub worker_entry: bool,
    /// The module exports `main` or `_start`.
    pub main_entry: bool,
}

fn kind_name(ty: &ExternType) -> &'static str {
    match ty {
        ExternType::Func(_) => "func",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        ExternType::Memory(_) => "memory",
    }
}

/// WASM runtime managing the Wasmtime engine and compiled modules.
pub struct WasmRuntime {
    engine: Engine,
    config: BridgeConfig,
    module_cache: DashMap<u64, Module>,
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("config", &self.config)
            .field("cached_modules", &self.module_cache.len())
            .finish_non_exhaustive()
    }
}

impl WasmRuntime {
    /// Create a new WASM runtime with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| KwasmError::Engine {
            cause: e.to_string(),
        })?;

        Ok(Self {
            engine,
            config,
            module_cache: DashMap::new(),
        })
    }

    /// Create a new runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(BridgeConfig::default())
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Compile WASM bytes (binary or text) into a module.
    ///
    /// If caching is enabled and the module was previously compiled,
    /// returns the cached version.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let hash = hash_bytes(wasm_bytes);

        let cached = if self.config.cache_modules {
            self.module_cache.get(&hash).map(|entry| entry.value().clone())
        } else {
            None
        };

        // The cache holds code only; every lookup gets its own name.
        let module = match cached {
            Some(module) => {
                tracing::debug!(module = name, hash, "module cache hit");
                module
            }
            None => {
                let module = Module::new(&self.engine, wasm_bytes).map_err(|e| {
                    KwasmError::WasmLoad {
                        module: name.to_string(),
                        cause: format!("{e:#}"),
                    }
                })?;
                if self.config.cache_modules {
                    self.module_cache.insert(hash, module.clone());
                }
                tracing::debug!(module = name, hash, "compiled module");
                module
            }
        };

        Ok(Arc::new(CompiledModule {
            name: name.to_string(),
            module,
            hash,
        }))
    }

    /// Compile WASM bytes from a file.
    pub fn compile_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        let wasm_bytes = std::fs::read(path).map_err(|e| KwasmError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;

        self.compile(&module_name(path), &wasm_bytes)
    }

    /// Validate WASM bytes without keeping the result.
    pub fn validate(&self, wasm_bytes: &[u8]) -> Result<()> {
        Module::validate(&self.engine, wasm_bytes).map_err(|e| KwasmError::WasmLoad {
            module: "validation".to_string(),
            cause: format!("{e:#}"),
        })
    }

    /// Describe a compiled module's imports and exports.
    pub fn inspect(&self, compiled: &CompiledModule) -> ModuleReport {
        let module = compiled.module();
        let imports: Vec<ModuleItem> = module
            .imports()
            .map(|import| ModuleItem {
                module: import.module().to_string(),
                name: import.name().to_string(),
                kind: kind_name(&import.ty()),
            })
            .collect();
        let exports: Vec<ModuleItem> = module
            .exports()
            .map(|export| ModuleItem {
                module: String::new(),
                name: export.name().to_string(),
                kind: kind_name(&export.ty()),
            })
            .collect();

        let shared_memory = module
            .imports()
            .any(|import| matches!(import.ty(), ExternType::Memory(ty) if ty.is_shared()));
        let uses_bridge = imports
            .iter()
            .any(|i| i.module == abi::BRIDGE_MODULE && i.name == abi::DELIVER_IMPORT);
        let exports_func = |name: &str| exports.iter().any(|e| e.name == name && e.kind == "func");

        ModuleReport {
            name: compiled.name().to_string(),
            shared_memory,
            uses_bridge,
            reserve_space: exports_func(abi::RESERVE_SPACE_EXPORT),
            worker_entry: exports_func(abi::WORKER_ENTRY_EXPORT)
                || exports_func(abi::THREAD_START_EXPORT),
            main_entry: abi::MAIN_EXPORTS.iter().any(|name| exports_func(name)),
            imports,
            exports,
        }
    }

    /// Clear the module cache.
    pub fn clear_cache(&self) {
        self.module_cache.clear();
    }

    /// Get the number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.module_cache.len()
    }
}

/// Name a module after its file.
pub(crate) fn module_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
