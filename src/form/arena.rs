//! Generation-checked arena with free list for slot reuse.

use std::fmt;
use std::marker::PhantomData;

/// A typed index into an arena.
///
/// The generation makes an index stale once its slot is freed, even if the
/// slot is later reused by another value.
pub struct Idx<T> {
    slot: u32,
    generation: u32,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for Idx<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Idx<T> {}

impl<T> PartialEq for Idx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Idx<T> {}

impl<T> PartialOrd for Idx<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Idx<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.slot, self.generation).cmp(&(other.slot, other.generation))
    }
}

impl<T> std::hash::Hash for Idx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

impl<T> fmt::Display for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena with free list for slot reuse.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub fn alloc(&mut self, value: T) -> Idx<T> {
        let (slot, generation) = if let Some(slot) = self.free_list.pop() {
            let entry = &mut self.slots[slot as usize];
            debug_assert!(entry.value.is_none());
            entry.generation = entry.generation.wrapping_add(1);
            entry.value = Some(value);
            (slot, entry.generation)
        } else {
            let slot = self.slots.len();
            assert!(slot < u32::MAX as usize, "arena full");
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            (slot as u32, 0)
        };
        Idx {
            slot,
            generation,
            _ty: PhantomData,
        }
    }

    /// Frees the slot behind `id`. Returns `None` for a stale index.
    pub fn free(&mut self, id: Idx<T>) -> Option<T> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let value = entry.value.take()?;
        self.free_list.push(id.slot);
        Some(value)
    }

    pub fn get(&self, id: Idx<T>) -> Option<&T> {
        self.slots
            .get(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, id: Idx<T>) -> Option<&mut T> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, id: Idx<T>) -> bool {
        self.get(id).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get() {
        let mut arena = Arena::new();
        let id = arena.alloc(42u32);

        assert_eq!(arena.live_count(), 1);
        assert_eq!(arena.get(id), Some(&42));
    }

    #[test]
    fn free_and_reuse_invalidates_old_index() {
        let mut arena = Arena::new();

        let id1 = arena.alloc(1u32);
        let _id2 = arena.alloc(2u32);
        assert_eq!(arena.free(id1), Some(1));
        assert_eq!(arena.live_count(), 1);

        // Next alloc reuses the freed slot under a new generation.
        let id3 = arena.alloc(3u32);
        assert_eq!(id3.slot, id1.slot);
        assert_ne!(id3, id1);
        assert_eq!(arena.get(id1), None);
        assert_eq!(arena.get(id3), Some(&3));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut arena = Arena::new();
        let id = arena.alloc(1u32);
        assert_eq!(arena.free(id), Some(1));
        assert_eq!(arena.free(id), None);
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn get_mut() {
        let mut arena = Arena::new();
        let id = arena.alloc(1u32);

        if let Some(value) = arena.get_mut(id) {
            *value = 99;
        }
        assert_eq!(arena.get(id), Some(&99));
    }
}
