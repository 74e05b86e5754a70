use crate::command::Handle;

enum Slot<T> {
    Occupied { value: T, generation: u64 },
    Vacant { next_free: Option<usize>, generation: u64 },
}

/// Generation-checked, handle-indexed storage for the reactor's
/// sessions, engines, and listeners (spec §9's handle-indirection note).
///
/// Removing a slot bumps its generation before returning it to the free
/// list, so a `Handle` captured before a remove-then-reuse cycle is
/// detected as stale by `get`/`get_mut` instead of silently aliasing
/// whatever was inserted into the reused slot.
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.insert_with(|_| value)
    }

    /// Insert a value built from the handle it will be stored under —
    /// useful for self-referential objects (e.g. a [`crate::session::Session`]
    /// that records its own reactor handle) that would otherwise need a
    /// two-phase construct-then-patch dance.
    pub fn insert_with(&mut self, f: impl FnOnce(Handle) -> T) -> Handle {
        match self.free_head {
            Some(index) => {
                let generation = match self.slots[index] {
                    Slot::Vacant { generation, .. } => generation,
                    Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
                };
                let next_free = match self.slots[index] {
                    Slot::Vacant { next_free, .. } => next_free,
                    Slot::Occupied { .. } => unreachable!(),
                };
                self.free_head = next_free;
                let handle = Handle::new(index, generation);
                self.slots[index] = Slot::Occupied { value: f(handle), generation };
                self.len += 1;
                handle
            }
            None => {
                let index = self.slots.len();
                let handle = Handle::new(index, 0);
                self.slots.push(Slot::Occupied { value: f(handle), generation: 0 });
                self.len += 1;
                handle
            }
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index) {
            Some(Slot::Occupied { value, generation }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index) {
            Some(Slot::Occupied { value, generation }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Remove and return the value at `handle`, if the handle is still
    /// live. Bumps the slot's generation so any other copy of this handle
    /// is rejected by future `get`/`get_mut` calls.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let occupied = matches!(
            self.slots.get(handle.index),
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation
        );
        if !occupied {
            return None;
        }
        let next_free = self.free_head;
        let old = std::mem::replace(
            &mut self.slots[handle.index],
            Slot::Vacant {
                next_free,
                generation: handle.generation.wrapping_add(1),
            },
        );
        self.free_head = Some(handle.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => Some((Handle::new(index, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => Some((Handle::new(index, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let mut slab: Slab<&str> = Slab::new();
        let h = slab.insert("a");
        assert_eq!(slab.get(h), Some(&"a"));
        assert_eq!(slab.remove(h), Some("a"));
        assert_eq!(slab.get(h), None);
    }

    #[test]
    fn stale_handle_after_reuse_is_rejected() {
        let mut slab: Slab<i32> = Slab::new();
        let h1 = slab.insert(1);
        slab.remove(h1).unwrap();
        let h2 = slab.insert(2);
        assert_eq!(h2.index, h1.index);
        assert_ne!(h2.generation, h1.generation);
        assert_eq!(slab.get(h1), None);
        assert_eq!(slab.get(h2), Some(&2));
    }

    #[test]
    fn iter_visits_only_occupied_slots() {
        let mut slab: Slab<i32> = Slab::new();
        let h1 = slab.insert(1);
        let _h2 = slab.insert(2);
        slab.remove(h1);
        let remaining: Vec<_> = slab.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2]);
    }
}
