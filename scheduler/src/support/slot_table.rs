//! Dense Tables with Stable Handles
//!
//! `SlotTable` hands out generation-tagged row handles that stay valid across
//! unrelated inserts and removals. Freed rows are recycled, so a steady-state
//! workload does not allocate. `SlottedIdTable` is the simpler variant keyed by a
//! bounded integer identifier (UE index, cell index).

use std::ops::{Index, IndexMut};

/// Opaque handle to a row of a [`SlotTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of rows addressed by [`RowId`]
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Create a table that can hold `capacity` rows before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::with_capacity(capacity),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> RowId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return RowId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        RowId {
            index,
            generation: 0,
        }
    }

    /// Remove a row. Panics if the handle is stale.
    pub fn remove(&mut self, id: RowId) -> T {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation && e.value.is_some());
        let Some(entry) = entry else {
            panic!("Removing stale row {:?}", id);
        };
        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.len -= 1;
        match value {
            Some(v) => v,
            None => unreachable!(),
        }
    }

    pub fn get(&self, id: RowId) -> Option<&T> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.value.as_ref())
    }

    pub fn get_mut(&mut self, id: RowId) -> Option<&mut T> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.value.as_mut())
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            e.value.as_ref().map(|v| {
                (
                    RowId {
                        index: i as u32,
                        generation: e.generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RowId, &mut T)> {
        self.entries.iter_mut().enumerate().filter_map(|(i, e)| {
            let generation = e.generation;
            e.value.as_mut().map(|v| {
                (
                    RowId {
                        index: i as u32,
                        generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Index<RowId> for SlotTable<T> {
    type Output = T;

    fn index(&self, id: RowId) -> &T {
        match self.get(id) {
            Some(v) => v,
            None => panic!("Access to stale row {:?}", id),
        }
    }
}

impl<T> IndexMut<RowId> for SlotTable<T> {
    fn index_mut(&mut self, id: RowId) -> &mut T {
        match self.get_mut(id) {
            Some(v) => v,
            None => panic!("Access to stale row {:?}", id),
        }
    }
}

/// Table of optional values indexed by a bounded integer id
#[derive(Debug, Clone)]
pub struct SlottedIdTable<T> {
    slots: Vec<Option<T>>,
    len: usize,
}

impl<T> SlottedIdTable<T> {
    /// Create a table accepting ids in `0..max_ids`
    pub fn new(max_ids: usize) -> Self {
        let mut slots = Vec::with_capacity(max_ids);
        slots.resize_with(max_ids, || None);
        Self { slots, len: 0 }
    }

    /// Insert a value. Panics if the id is out of range or already present.
    pub fn emplace(&mut self, id: usize, value: T) -> &mut T {
        assert!(id < self.slots.len(), "Id {} out of range", id);
        assert!(self.slots[id].is_none(), "Id {} already present", id);
        self.len += 1;
        self.slots[id].insert(value)
    }

    pub fn erase(&mut self, id: usize) -> Option<T> {
        let value = self.slots.get_mut(id).and_then(Option::take);
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    pub fn contains(&self, id: usize) -> bool {
        self.slots.get(id).is_some_and(Option::is_some)
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (i, v)))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

impl<T> Index<usize> for SlottedIdTable<T> {
    type Output = T;

    fn index(&self, id: usize) -> &T {
        match self.get(id) {
            Some(v) => v,
            None => panic!("Id {} not present", id),
        }
    }
}

impl<T> IndexMut<usize> for SlottedIdTable<T> {
    fn index_mut(&mut self, id: usize) -> &mut T {
        match self.get_mut(id) {
            Some(v) => v,
            None => panic!("Id {} not present", id),
        }
    }
}
