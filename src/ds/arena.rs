//! Slot arena with generation-tagged `TaskId` handles.
//!
//! Arena-style storage where registered items are addressed through stable
//! handles ([`TaskId`]) rather than object identity. A handle carries both a
//! slot index and the slot's *generation* at issue time; removal bumps the
//! generation, so a handle held across removal goes stale and every later
//! lookup through it misses — even after the slot has been reissued to a
//! different item.
//!
//! ```text
//! Slot Lifecycle
//! ──────────────
//!
//!   Occupied{gen} ──remove()──► Vacant{gen+1} ──insert()──► Occupied{gen+1}
//!                                    │
//!                                    └── threaded onto the free list
//!                                        (next_free link inside the slot)
//!
//!   lookup(id): slots[id.index] must be Occupied AND carry id's generation;
//!   a reissued slot carries a newer generation, so the stale id misses.
//! ```
//!
//! This lets side tables (such as the scheduler's membership index)
//! reference items without owning them and without any reliance on weak
//! references, while a stale handle can never address the wrong item.

/// Opaque handle for stable O(1) access to arena slots.
///
/// A `TaskId` pairs a slot index with the generation the slot had when the
/// item was inserted. It stays valid until that item is removed; afterwards
/// the handle misses on every operation, including once the slot has been
/// reused for a new item.
///
/// # Example
///
/// ```
/// use framekit::ds::{HandleArena, TaskId};
///
/// let mut arena: HandleArena<&str> = HandleArena::new();
/// let id: TaskId = arena.insert("render-shadow-map");
/// assert_eq!(arena.get(id), Some(&"render-shadow-map"));
///
/// arena.remove(id);
/// arena.insert("render-bloom"); // reuses the slot
/// assert_eq!(arena.get(id), None); // stale handle still misses
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    /// Returns the raw slot index, for logging and debugging.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// One arena slot. Vacant slots double as free-list links.
#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, item: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Arena handing out generation-tagged [`TaskId`] handles.
///
/// Insertion reoccupies the head of the free list before growing the
/// backing storage, so churny register/remove workloads settle into a fixed
/// footprint. Each removal bumps the slot's generation, invalidating every
/// handle issued for the departed item.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> HandleArena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Creates an arena pre-sized for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Stores `item` and returns its handle, reoccupying a vacant slot if
    /// one is free.
    pub fn insert(&mut self, item: T) -> TaskId {
        self.len += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                match slot {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => {
                        let generation = *generation;
                        self.free_head = *next_free;
                        *slot = Slot::Occupied { generation, item };
                        TaskId { index, generation }
                    },
                    Slot::Occupied { .. } => {
                        unreachable!("free list links to an occupied slot")
                    },
                }
            },
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    item,
                });
                TaskId {
                    index,
                    generation: 0,
                }
            },
        }
    }

    /// Removes and returns the item behind `id`, vacating its slot.
    ///
    /// The slot's generation is bumped, so `id` (and any copy of it) misses
    /// from here on. Returns `None` for an already-removed or otherwise
    /// stale handle; the slot's current occupant, if any, is untouched.
    pub fn remove(&mut self, id: TaskId) -> Option<T> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, .. }) if *generation == id.generation => {},
            _ => return None,
        }
        let vacated = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        match std::mem::replace(&mut self.slots[id.index as usize], vacated) {
            Slot::Occupied { item, .. } => {
                self.free_head = Some(id.index);
                self.len -= 1;
                Some(item)
            },
            Slot::Vacant { .. } => unreachable!("occupancy checked above"),
        }
    }

    /// Returns a reference to the item behind `id`.
    pub fn get(&self, id: TaskId) -> Option<&T> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, item }) if *generation == id.generation => {
                Some(item)
            },
            _ => None,
        }
    }

    /// Returns a mutable reference to the item behind `id`.
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, item }) if *generation == id.generation => {
                Some(item)
            },
            _ => None,
        }
    }

    /// Returns `true` if `id` addresses a live item.
    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no items are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes all items.
    ///
    /// Every occupied slot is vacated with a bumped generation, so handles
    /// issued before the clear miss afterwards.
    pub fn clear(&mut self) {
        self.free_head = None;
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            let generation = match slot {
                Slot::Occupied { generation, .. } => generation.wrapping_add(1),
                Slot::Vacant { generation, .. } => *generation,
            };
            *slot = Slot::Vacant {
                generation,
                next_free: self.free_head,
            };
            self.free_head = Some(index as u32);
        }
        self.len = 0;
    }

    /// Iterates over live items in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, item } => Some((
                    TaskId {
                        index: index as u32,
                        generation: *generation,
                    },
                    item,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
