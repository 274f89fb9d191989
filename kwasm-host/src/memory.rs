//! Memory bridge for guest <-> host data transfer.
//!
//! The bridge copies bytes between host buffers and guest linear memory. For
//! shared memory, other workers may be writing while the host copies, so the
//! bridge never forms a Rust reference to guest bytes: it bounds-checks the
//! whole range first and then copies exactly that range with raw pointer
//! copies. A range that does not fit copies nothing.

use kwasm_core::error::{KwasmError, Result};
use std::cell::UnsafeCell;
use wasmtime::{AsContext, AsContextMut, Memory, SharedMemory, TypedFunc};

use crate::abi::{RESERVE_SPACE_EXPORT, guest_call};

/// A pointer within WASM linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmPtr {
    /// Offset within WASM linear memory.
    pub offset: u32,
    /// Size of the data in bytes.
    pub size: u32,
}

impl WasmPtr {
    /// Create a new WASM pointer.
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Create a null pointer.
    pub const fn null() -> Self {
        Self { offset: 0, size: 0 }
    }

    /// Check if this is a null pointer.
    pub const fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    /// End offset, widened so it cannot overflow.
    pub const fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// Linear memory of one context.
#[derive(Clone)]
pub enum LinearMemory {
    /// Memory shared by the main context and all workers.
    Shared(SharedMemory),
    /// Memory owned by a single store.
    Local(Memory),
}

impl std::fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared(memory) => f
                .debug_struct("Shared")
                .field("bytes", &memory.data_size())
                .finish(),
            Self::Local(_) => f.write_str("Local"),
        }
    }
}

impl LinearMemory {
    /// Whether workers can attach to this memory.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// The shared memory, if this is one.
    pub fn as_shared(&self) -> Option<&SharedMemory> {
        match self {
            Self::Shared(memory) => Some(memory),
            Self::Local(_) => None,
        }
    }

    /// Current size in bytes.
    pub fn data_size(&self, store: impl AsContext) -> usize {
        match self {
            Self::Shared(memory) => memory.data_size(),
            Self::Local(memory) => memory.data_size(store),
        }
    }
}

fn check_range(offset: u32, length: usize, size: usize) -> Result<()> {
    let end = offset as u64 + length as u64;
    if end > size as u64 {
        return Err(KwasmError::OutOfBounds {
            offset: offset as u64,
            length: length as u64,
            size: size as u64,
        });
    }
    Ok(())
}

fn copy_from_shared(memory: &SharedMemory, offset: u32, out: &mut [u8]) -> Result<()> {
    let cells = memory.data();
    check_range(offset, out.len(), cells.len())?;
    let start = offset as usize;
    let src = &cells[start..start + out.len()];
    // SAFETY: `src` is in bounds of the shared memory, which never shrinks.
    // Bytes are read through the cells' raw pointer without creating
    // references to them; concurrent guest writes can only tear the copy.
    unsafe {
        std::ptr::copy_nonoverlapping(
            UnsafeCell::raw_get(src.as_ptr()).cast_const(),
            out.as_mut_ptr(),
            out.len(),
        );
    }
    Ok(())
}

fn copy_into_shared(memory: &SharedMemory, offset: u32, bytes: &[u8]) -> Result<()> {
    let cells = memory.data();
    check_range(offset, bytes.len(), cells.len())?;
    let start = offset as usize;
    let dst = &cells[start..start + bytes.len()];
    // SAFETY: as in `copy_from_shared`; the destination is guest-owned
    // interior-mutable memory.
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            UnsafeCell::raw_get(dst.as_ptr()),
            bytes.len(),
        );
    }
    Ok(())
}

/// Bridge for memory operations between host and guest.
///
/// Cloning is cheap; callers inside a host function clone the bridge out of
/// the store data before handing the store to it.
#[derive(Clone)]
pub struct MemoryBridge {
    memory: LinearMemory,
    reserve: Option<TypedFunc<u32, u32>>,
}

impl std::fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("memory", &self.memory)
            .field("reserve", &self.reserve.is_some())
            .finish()
    }
}

impl MemoryBridge {
    /// Create a bridge with no reserve-space export bound.
    pub fn new(memory: LinearMemory) -> Self {
        Self {
            memory,
            reserve: None,
        }
    }

    /// Bind the guest's `kwasm_reserve_space` export.
    pub fn with_reserve(mut self, reserve: TypedFunc<u32, u32>) -> Self {
        self.reserve = Some(reserve);
        self
    }

    /// Get the linear memory.
    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Whether `write_string` can be used.
    pub fn can_reserve(&self) -> bool {
        self.reserve.is_some()
    }

    /// Current size of linear memory in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(store)
    }

    /// Copy `length` bytes starting at `offset` out of linear memory.
    ///
    /// The copy is a snapshot: later guest writes are not reflected.
    pub fn view(&self, store: impl AsContext, offset: u32, length: u32) -> Result<Vec<u8>> {
        let mut out = vec![0u8; length as usize];
        match &self.memory {
            LinearMemory::Shared(memory) => copy_from_shared(memory, offset, &mut out)?,
            LinearMemory::Local(memory) => {
                check_range(offset, out.len(), memory.data_size(&store))?;
                memory
                    .read(&store, offset as usize, &mut out)
                    .map_err(|_| KwasmError::OutOfBounds {
                        offset: offset as u64,
                        length: length as u64,
                        size: memory.data_size(&store) as u64,
                    })?;
            }
        }
        Ok(out)
    }

    /// Write bytes at `offset`. Nothing is written unless the whole range fits.
    pub fn write(&self, mut store: impl AsContextMut, offset: u32, bytes: &[u8]) -> Result<()> {
        match &self.memory {
            LinearMemory::Shared(memory) => copy_into_shared(memory, offset, bytes),
            LinearMemory::Local(memory) => {
                let size = memory.data_size(&store);
                check_range(offset, bytes.len(), size)?;
                memory
                    .write(&mut store, offset as usize, bytes)
                    .map_err(|_| KwasmError::OutOfBounds {
                        offset: offset as u64,
                        length: bytes.len() as u64,
                        size: size as u64,
                    })
            }
        }
    }

    /// Decode `length` bytes at `offset` as strict UTF-8.
    pub fn read_string(&self, store: impl AsContext, offset: u32, length: u32) -> Result<String> {
        let bytes = self.view(store, offset, length)?;
        String::from_utf8(bytes).map_err(|e| KwasmError::InvalidEncoding {
            offset,
            length,
            cause: e.utf8_error().to_string(),
        })
    }

    /// Copy bytes into a guest buffer obtained from `kwasm_reserve_space`.
    ///
    /// The guest owns the returned range; the host keeps nothing.
    pub fn write_bytes(&self, mut store: impl AsContextMut, bytes: &[u8]) -> Result<WasmPtr> {
        let reserve = self
            .reserve
            .as_ref()
            .ok_or_else(|| KwasmError::missing_export(RESERVE_SPACE_EXPORT))?;
        let length = u32::try_from(bytes.len()).map_err(|_| KwasmError::OutOfBounds {
            offset: 0,
            length: bytes.len() as u64,
            size: self.size(&store) as u64,
        })?;

        let offset = guest_call(RESERVE_SPACE_EXPORT, reserve.call(&mut store, length))?;
        self.write(&mut store, offset, bytes)?;
        Ok(WasmPtr::new(offset, length))
    }

    /// Hand a string to the guest as UTF-8 bytes.
    pub fn write_string(&self, store: impl AsContextMut, text: &str) -> Result<WasmPtr> {
        self.write_bytes(store, text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Config, Engine, MemoryType, Store};

    fn threaded_engine() -> Engine {
        let mut config = Config::new();
        config.wasm_threads(true);
        Engine::new(&config).unwrap()
    }

    fn local_bridge() -> (Store<()>, MemoryBridge) {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, Some(1))).unwrap();
        (store, MemoryBridge::new(LinearMemory::Local(memory)))
    }

    fn shared_bridge() -> (Store<()>, MemoryBridge) {
        let engine = threaded_engine();
        let store = Store::new(&engine, ());
        let memory = SharedMemory::new(&engine, MemoryType::shared(1, 2)).unwrap();
        (store, MemoryBridge::new(LinearMemory::Shared(memory)))
    }

    #[test]
    fn wasm_ptr_basic() {
        let ptr = WasmPtr::new(100, 50);
        assert_eq!(ptr.end(), 150);
        assert!(!ptr.is_null());
        assert!(WasmPtr::null().is_null());
        assert_eq!(WasmPtr::new(u32::MAX, 2).end(), u32::MAX as u64 + 2);
    }

    #[test]
    fn view_and_write_local() {
        let (mut store, bridge) = local_bridge();
        bridge.write(&mut store, 64, b"hello").unwrap();
        assert_eq!(bridge.view(&store, 64, 5).unwrap(), b"hello");
        assert_eq!(bridge.read_string(&store, 64, 5).unwrap(), "hello");
        assert_eq!(bridge.size(&store), 65536);
        assert!(bridge.view(&store, 64, 0).unwrap().is_empty());
    }

    #[test]
    fn view_and_write_shared() {
        let (mut store, bridge) = shared_bridge();
        assert!(bridge.memory().is_shared());
        bridge.write(&mut store, 10, &[1, 2, 3, 4]).unwrap();
        assert_eq!(bridge.view(&store, 10, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(bridge.view(&store, 8, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn out_of_bounds_copies_nothing() {
        for (mut store, bridge) in [local_bridge(), shared_bridge()] {
            let size = bridge.size(&store) as u32;
            let err = bridge.view(&store, size - 4, 8).unwrap_err();
            assert!(matches!(
                err,
                KwasmError::OutOfBounds { offset, length: 8, size: s }
                    if offset == (size - 4) as u64 && s == size as u64
            ));

            let err = bridge.write(&mut store, size - 4, &[0xAA; 8]).unwrap_err();
            assert_eq!(err.code(), "E101");
            assert_eq!(bridge.view(&store, size - 4, 4).unwrap(), vec![0; 4]);

            assert!(bridge.view(&store, u32::MAX, 2).is_err());
        }
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let (mut store, bridge) = local_bridge();
        bridge.write(&mut store, 0, &[0x68, 0xFF, 0xFE]).unwrap();
        let err = bridge.read_string(&store, 0, 3).unwrap_err();
        assert!(matches!(
            err,
            KwasmError::InvalidEncoding {
                offset: 0,
                length: 3,
                ..
            }
        ));
    }

    #[test]
    fn write_string_needs_reserve_export() {
        let (mut store, bridge) = local_bridge();
        assert!(!bridge.can_reserve());
        let err = bridge.write_string(&mut store, "hi").unwrap_err();
        assert!(matches!(
            err,
            KwasmError::MissingExport { ref export } if export == RESERVE_SPACE_EXPORT
        ));
    }
}
