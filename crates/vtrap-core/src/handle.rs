//! Generation-checked handle table.
//!
//! Pools that hand out opaque identities to other components (client
//! imprints in particular) must reject identities that outlived their
//! entry. Every slot carries a generation that is bumped on removal, and
//! a handle is only valid while its generation matches. Slots are
//! reclaimed through a free list.

use std::marker::PhantomData;

use crate::error::{Error, Result};

/// Typed handle into a [`HandleTable`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _owner: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Packs the handle into a single word suitable as an opaque imprint.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpacks a handle from its imprint form. Validity is only decided by
    /// the owning table.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: (raw & 0xFFFF_FFFF) as u32,
            generation: (raw >> 32) as u32,
            _owner: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Bounded arena with generation-checked handles and slot reclamation.
pub struct HandleTable<T> {
    name: &'static str,
    capacity: usize,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    /// Creates an empty table. `name` shows up in exhaustion errors.
    #[must_use]
    pub const fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts `value` and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TableFull`] once `capacity` live entries exist.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Ok(Handle {
                index,
                generation: slot.generation,
                _owner: PhantomData,
            });
        }
        if self.slots.len() >= self.capacity {
            return Err(Error::TableFull(self.name));
        }
        let index = u32::try_from(self.slots.len()).map_err(|_| Error::TableFull(self.name))?;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Ok(Handle {
            index,
            generation: 1,
            _owner: PhantomData,
        })
    }

    /// Resolves `handle` if it names a live entry of the current generation.
    #[must_use]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Removes the entry named by `handle`, bumping the slot generation so
    /// the handle goes stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(value)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether the table holds no live entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
