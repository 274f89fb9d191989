//! Host libraries and the per-context registry.
//!
//! A library is a typed plugin: it has a name and handles `(command, payload)`
//! pairs. The host collects the libraries a guest may load in a
//! [`LibraryCatalog`]; when the guest asks for one by name (control command
//! 0), the context's [`LibraryRegistry`] assigns it the next id.

use crate::context::GuestCall;
use crate::libraries::ObjectsLibrary;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::protocol::FIRST_DYNAMIC_LIBRARY;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A host-side library the guest can send messages to.
///
/// Implementations must be thread-safe: one instance is shared by every
/// context that registers it.
pub trait HostLibrary: Send + Sync {
    /// Catalog name of this library.
    fn name(&self) -> &str;

    /// Handle one command.
    ///
    /// `data` is a copy of the message payload. The return value is handed to
    /// the guest unchanged; errors are logged by the router and the guest
    /// receives 0.
    fn dispatch(&self, call: &mut GuestCall<'_, '_>, command: u32, data: &[u8]) -> Result<u32>;
}

type DispatchFn = dyn Fn(&mut GuestCall<'_, '_>, u32, &[u8]) -> Result<u32> + Send + Sync;

/// A library built from a closure.
pub struct FnLibrary {
    name: String,
    dispatch: Box<DispatchFn>,
}

impl FnLibrary {
    /// Wrap a dispatch closure as a library.
    pub fn new<F>(name: impl Into<String>, dispatch: F) -> Self
    where
        F: Fn(&mut GuestCall<'_, '_>, u32, &[u8]) -> Result<u32> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dispatch: Box::new(dispatch),
        }
    }
}

impl std::fmt::Debug for FnLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLibrary")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl HostLibrary for FnLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, call: &mut GuestCall<'_, '_>, command: u32, data: &[u8]) -> Result<u32> {
        (self.dispatch)(call, command, data)
    }
}

/// Libraries registered in one context, addressed by id.
///
/// Ids start at 2, increase by one per registration and are never reused.
/// Registering the same library twice yields two ids.
#[derive(Default)]
pub struct LibraryRegistry {
    entries: Vec<Arc<dyn HostLibrary>>,
}

impl LibraryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a library and return its id.
    pub fn register(&mut self, library: Arc<dyn HostLibrary>) -> u32 {
        self.entries.push(library);
        FIRST_DYNAMIC_LIBRARY + (self.entries.len() as u32 - 1)
    }

    /// Resolve an id to its library.
    pub fn resolve(&self, library_id: u32) -> Result<Arc<dyn HostLibrary>> {
        library_id
            .checked_sub(FIRST_DYNAMIC_LIBRARY)
            .and_then(|index| self.entries.get(index as usize))
            .cloned()
            .ok_or(KwasmError::UnknownLibrary { library_id })
    }

    /// Id the next registration will receive.
    pub fn next_id(&self) -> u32 {
        FIRST_DYNAMIC_LIBRARY + self.entries.len() as u32
    }

    /// Registered `(id, name)` pairs in id order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, lib)| (FIRST_DYNAMIC_LIBRARY + i as u32, lib.name()))
    }

    /// Number of registered libraries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for LibraryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

/// Named libraries a guest may register at runtime.
#[derive(Clone)]
pub struct LibraryCatalog {
    libraries: BTreeMap<String, Arc<dyn HostLibrary>>,
}

impl LibraryCatalog {
    /// A catalog with no libraries at all.
    pub fn empty() -> Self {
        Self {
            libraries: BTreeMap::new(),
        }
    }

    /// A catalog holding the built-in libraries.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(Arc::new(ObjectsLibrary));
        catalog
    }

    /// Add a library under its own name, replacing any previous entry.
    pub fn insert(&mut self, library: Arc<dyn HostLibrary>) {
        self.insert_as(library.name().to_string(), library);
    }

    /// Add a library under an explicit name.
    pub fn insert_as(&mut self, name: impl Into<String>, library: Arc<dyn HostLibrary>) {
        let name = name.into();
        if self.libraries.insert(name.clone(), library).is_some() {
            tracing::debug!(library = %name, "replaced catalog entry");
        }
    }

    /// Look up a library by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn HostLibrary>> {
        self.libraries
            .get(name)
            .cloned()
            .ok_or_else(|| KwasmError::UnknownLibraryName {
                name: name.to_string(),
            })
    }

    /// Catalog names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}

impl Default for LibraryCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for LibraryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
