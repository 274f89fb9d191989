//! Object table: integer handles for host values.
//!
//! The guest holds `u32` handles; the table owns the values. A handle packs
//! the slot index in its low 24 bits and the slot's generation in the high 8
//! bits. Releasing a slot bumps its generation, so a handle kept past its
//! release is reported as [`KwasmError::StaleHandle`] once the slot is
//! reused, instead of silently aliasing the new occupant.
//!
//! Slots 0 and 1 are pinned: 0 is null, 1 is the host's global object.

use crate::error::{KwasmError, Result};
use crate::value::HostValue;
use std::collections::BTreeSet;

/// Handle denoting "no value".
pub const NULL_HANDLE: u32 = 0;

/// Handle of the host's top-level (global) object.
pub const GLOBAL_HANDLE: u32 = 1;

const SLOT_BITS: u32 = 24;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const PINNED_SLOTS: u32 = 2;

static NULL_VALUE: HostValue = HostValue::Null;

/// Build a handle from a slot index and generation.
#[inline]
pub const fn make_handle(slot: u32, generation: u8) -> u32 {
    ((generation as u32) << SLOT_BITS) | (slot & SLOT_MASK)
}

/// Slot index encoded in a handle.
#[inline]
pub const fn handle_slot(handle: u32) -> u32 {
    handle & SLOT_MASK
}

/// Generation encoded in a handle.
#[inline]
pub const fn handle_generation(handle: u32) -> u8 {
    (handle >> SLOT_BITS) as u8
}

#[derive(Debug)]
struct Slot {
    generation: u8,
    value: Option<HostValue>,
}

/// Slot table mapping handles to host values, with lowest-slot-first reuse.
#[derive(Debug)]
pub struct ObjectTable {
    slots: Vec<Slot>,
    free: BTreeSet<u32>,
}

impl ObjectTable {
    /// Create a table whose handle 1 refers to `global`.
    pub fn new(global: HostValue) -> Self {
        Self {
            slots: vec![
                Slot {
                    generation: 0,
                    value: Some(HostValue::Null),
                },
                Slot {
                    generation: 0,
                    value: Some(global),
                },
            ],
            free: BTreeSet::new(),
        }
    }

    /// Maximum number of addressable slots.
    pub const fn capacity() -> u32 {
        SLOT_MASK + 1
    }

    /// Store a value and return its handle.
    ///
    /// Reuses the lowest released slot if there is one, otherwise appends.
    pub fn insert(&mut self, value: HostValue) -> Result<u32> {
        if let Some(index) = self.free.pop_first() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Ok(make_handle(index, slot.generation));
        }

        let index = self.slots.len() as u32;
        if index > SLOT_MASK {
            return Err(KwasmError::TableFull {
                capacity: Self::capacity(),
            });
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Ok(make_handle(index, 0))
    }

    /// Look up the value behind a handle.
    pub fn get(&self, handle: u32) -> Result<&HostValue> {
        let index = handle_slot(handle);
        let generation = handle_generation(handle);
        let slot = self
            .slots
            .get(index as usize)
            .ok_or(KwasmError::InvalidHandle { handle })?;

        match &slot.value {
            None => Err(KwasmError::InvalidHandle { handle }),
            Some(_) if index < PINNED_SLOTS && generation != 0 => {
                Err(KwasmError::InvalidHandle { handle })
            }
            Some(value) if slot.generation == generation => Ok(value),
            Some(_) => Err(KwasmError::StaleHandle {
                handle,
                slot: index,
                current: slot.generation,
            }),
        }
    }

    /// Release a handle, returning the value it held.
    ///
    /// Releasing the null or global handle, an already released handle, or a
    /// stale handle does nothing.
    pub fn release(&mut self, handle: u32) -> Option<HostValue> {
        let index = handle_slot(handle);
        if index < PINNED_SLOTS {
            return None;
        }
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != handle_generation(handle) {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.insert(index);
        Some(value)
    }

    /// Check whether a handle currently resolves.
    pub fn is_live(&self, handle: u32) -> bool {
        self.get(handle).is_ok()
    }

    /// The global object (handle 1).
    pub fn global(&self) -> &HostValue {
        self.slots[GLOBAL_HANDLE as usize]
            .value
            .as_ref()
            .unwrap_or(&NULL_VALUE)
    }

    /// Number of live handles, excluding the two pinned ones.
    pub fn len(&self) -> usize {
        self.slots.len() - PINNED_SLOTS as usize - self.free.len()
    }

    /// Check if no handles beyond the pinned ones are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new(HostValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HostObject;

    #[test]
    fn insert_get_release() {
        let mut table = ObjectTable::default();
        let h = table.insert(HostValue::string("hello")).unwrap();
        assert_eq!(h, 2);
        assert_eq!(table.get(h).unwrap(), &HostValue::string("hello"));
        assert_eq!(table.len(), 1);

        assert_eq!(table.release(h), Some(HostValue::string("hello")));
        assert!(matches!(
            table.get(h),
            Err(KwasmError::InvalidHandle { handle }) if handle == h
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn lowest_free_slot_is_reused() {
        let mut table = ObjectTable::default();
        let a = table.insert(HostValue::Number(1.0)).unwrap();
        let b = table.insert(HostValue::Number(2.0)).unwrap();
        let c = table.insert(HostValue::Number(3.0)).unwrap();

        table.release(c);
        table.release(a);

        let d = table.insert(HostValue::Number(4.0)).unwrap();
        assert_eq!(handle_slot(d), handle_slot(a));
        assert_eq!(handle_generation(d), 1);
        let e = table.insert(HostValue::Number(5.0)).unwrap();
        assert_eq!(handle_slot(e), handle_slot(c));

        assert_eq!(table.get(b).unwrap(), &HostValue::Number(2.0));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn stale_handle_detected_after_reuse() {
        let mut table = ObjectTable::default();
        let old = table.insert(HostValue::string("first")).unwrap();
        table.release(old);
        let new = table.insert(HostValue::string("second")).unwrap();

        assert_ne!(old, new);
        assert!(matches!(
            table.get(old),
            Err(KwasmError::StaleHandle { slot: 2, current: 1, .. })
        ));
        // Releasing the stale handle must not free the new occupant.
        assert!(table.release(old).is_none());
        assert_eq!(table.get(new).unwrap(), &HostValue::string("second"));
    }

    #[test]
    fn sentinels_are_pinned() {
        let global = HostObject::new().with("name", "host");
        let mut table = ObjectTable::new(HostValue::Object(global.clone()));

        assert_eq!(table.get(NULL_HANDLE).unwrap(), &HostValue::Null);
        assert_eq!(
            table.get(GLOBAL_HANDLE).unwrap(),
            &HostValue::Object(global)
        );

        assert!(table.release(NULL_HANDLE).is_none());
        assert!(table.release(GLOBAL_HANDLE).is_none());
        assert!(table.is_live(NULL_HANDLE));
        assert!(table.is_live(GLOBAL_HANDLE));

        // A fresh insert never lands on a pinned slot.
        let h = table.insert(HostValue::Bool(true)).unwrap();
        assert_eq!(h, 2);
    }

    #[test]
    fn double_release_is_noop() {
        let mut table = ObjectTable::default();
        let h = table.insert(HostValue::Null).unwrap();
        assert!(table.release(h).is_some());
        assert!(table.release(h).is_none());
        // Slot only appears once on the free list.
        let a = table.insert(HostValue::Number(1.0)).unwrap();
        let b = table.insert(HostValue::Number(2.0)).unwrap();
        assert_ne!(handle_slot(a), handle_slot(b));
    }

    #[test]
    fn unknown_handles_are_invalid() {
        let table = ObjectTable::default();
        assert!(matches!(
            table.get(99),
            Err(KwasmError::InvalidHandle { handle: 99 })
        ));
        // Negative i32 handles arrive as large u32 values.
        assert!(table.get(-1i32 as u32).is_err());
        assert!(table.get(make_handle(1, 3)).is_err());
    }
}
