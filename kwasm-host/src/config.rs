//! Host configuration.

use kwasm_core::error::{KwasmError, Result};
use std::env;
use std::str::FromStr;

/// Initial linear memory size in 64 KiB pages (2 MiB).
pub const DEFAULT_INITIAL_MEMORY_PAGES: u32 = 32;

/// Maximum linear memory size in 64 KiB pages (1 GiB).
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 16384;

/// Configuration for a bridge host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Minimum pages for memory the host creates; raised to the module's own
    /// minimum when that is larger.
    pub initial_memory_pages: u32,
    /// Maximum pages for memory the host creates when the module leaves it
    /// open.
    pub max_memory_pages: u32,
    /// Enable the threads proposal and worker spawning.
    pub threads_enabled: bool,
    /// Cap on concurrently live workers, also reported as the available
    /// thread count. `None` reports the machine's parallelism and does not cap.
    pub max_workers: Option<u32>,
    /// Override for the TLS block size reported to the guest.
    pub tls_size: Option<u32>,
    /// Override for the TLS block alignment reported to the guest.
    pub tls_align: Option<u32>,
    /// Replace unresolved function imports on the main context with logging
    /// stubs. Workers always stub.
    pub stub_unresolved_imports: bool,
    /// Whether to cache compiled modules.
    pub cache_modules: bool,
    /// Enable debug info in compiled modules.
    pub debug_info: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_memory_pages: DEFAULT_INITIAL_MEMORY_PAGES,
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            threads_enabled: true,
            max_workers: None,
            tls_size: None,
            tls_align: None,
            stub_unresolved_imports: true,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl BridgeConfig {
    /// Configuration for hosts that never spawn workers.
    pub fn single_threaded() -> Self {
        Self {
            threads_enabled: false,
            ..Self::default()
        }
    }

    /// Configuration for tests: small memories, no cache, debug info.
    pub fn testing() -> Self {
        Self {
            initial_memory_pages: 1,
            max_memory_pages: 256,
            cache_modules: false,
            debug_info: true,
            ..Self::default()
        }
    }

    /// Read overrides from the environment on top of the defaults.
    ///
    /// Environment variables:
    /// - `KWASM_THREADS`: "true"/"false" (or 1/0)
    /// - `KWASM_MAX_WORKERS`: positive integer
    /// - `KWASM_MEMORY_PAGES`: initial memory pages
    /// - `KWASM_MAX_MEMORY_PAGES`: maximum memory pages
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(threads) = env_parse::<Toggle>("KWASM_THREADS")? {
            config.threads_enabled = threads.0;
        }
        if let Some(workers) = env_parse::<u32>("KWASM_MAX_WORKERS")? {
            config.max_workers = Some(workers);
        }
        if let Some(pages) = env_parse::<u32>("KWASM_MEMORY_PAGES")? {
            config.initial_memory_pages = pages;
        }
        if let Some(pages) = env_parse::<u32>("KWASM_MAX_MEMORY_PAGES")? {
            config.max_memory_pages = pages;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for contradictory values.
    pub fn validate(&self) -> Result<()> {
        if self.initial_memory_pages > self.max_memory_pages {
            return Err(KwasmError::Config {
                field: "initial_memory_pages".to_string(),
                cause: format!(
                    "{} exceeds max_memory_pages {}",
                    self.initial_memory_pages, self.max_memory_pages
                ),
            });
        }
        if self.max_memory_pages > 65536 {
            return Err(KwasmError::Config {
                field: "max_memory_pages".to_string(),
                cause: format!("{} exceeds the 32-bit limit of 65536", self.max_memory_pages),
            });
        }
        if self.max_workers == Some(0) {
            return Err(KwasmError::Config {
                field: "max_workers".to_string(),
                cause: "must be at least 1".to_string(),
            });
        }
        if let Some(align) = self.tls_align {
            if !align.is_power_of_two() {
                return Err(KwasmError::Config {
                    field: "tls_align".to_string(),
                    cause: format!("{align} is not a power of two"),
                });
            }
        }
        Ok(())
    }

    /// Set the initial memory pages.
    pub fn with_initial_memory_pages(mut self, pages: u32) -> Self {
        self.initial_memory_pages = pages;
        self
    }

    /// Set the maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Enable or disable threads.
    pub fn with_threads(mut self, enabled: bool) -> Self {
        self.threads_enabled = enabled;
        self
    }

    /// Cap the number of live workers.
    pub fn with_max_workers(mut self, workers: u32) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Override the TLS block size reported to the guest.
    pub fn with_tls_size(mut self, size: u32) -> Self {
        self.tls_size = Some(size);
        self
    }

    /// Override the TLS block alignment reported to the guest.
    pub fn with_tls_align(mut self, align: u32) -> Self {
        self.tls_align = Some(align);
        self
    }

    /// Enable or disable stubbing of unresolved imports on the main context.
    pub fn with_stub_imports(mut self, enabled: bool) -> Self {
        self.stub_unresolved_imports = enabled;
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Enable or disable debug info.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }
}

struct Toggle(bool);

impl FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Self(true)),
            "0" | "false" | "no" | "off" => Ok(Self(false)),
            other => Err(format!("expected a boolean, got '{other}'")),
        }
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| KwasmError::Config {
                field: name.to_string(),
                cause: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
