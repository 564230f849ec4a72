//! Dense entry table
//!
//! The table is a densely packed, growable array of capability entries
//! indexed directly by the numeric part of a name. Free slots form an
//! intrusive singly-linked list through `next_free`, kept in ascending
//! index order so allocation prefers low indices.
//!
//! # Growth
//!
//! The table only ever grows, doubling through the configured size
//! classes; it never shrinks. Growth builds a fresh table (allocation
//! happens outside the space lock) and then adopts the old contents
//! plus any tree entries migrating into the enlarged index range.
//!
//! # Generations
//!
//! Each slot carries the generation its current name was minted with.
//! The generation is bumped when a slot is returned to the free list,
//! so any name captured before the free fails the generation check
//! against the slot's next occupant.

use alloc::vec::Vec;

use crate::entry::Entry;
use crate::error::{IpcError, IpcResult};
use crate::name::{Generation, Name};

/// Configured table size classes.
///
/// Growth always moves to the next class; the first class is the
/// smallest space a task can be created with.
pub const TABLE_SIZES: &[u32] = &[
    4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536,
];

/// The size class following `current`, if any.
#[must_use]
pub fn next_table_size(current: u32) -> Option<u32> {
    TABLE_SIZES.iter().copied().find(|&size| size > current)
}

/// Free-list terminator.
const NO_INDEX: u32 = u32::MAX;

#[derive(Clone, Debug)]
struct Slot {
    entry: Entry,
    /// Next free slot when this slot is free; unused otherwise.
    next_free: u32,
}

/// A densely packed array of capability entries.
///
/// Owned exclusively by a space and guarded by its lock; the table
/// itself performs no synchronisation.
pub struct EntryTable {
    slots: Vec<Slot>,
    free_head: u32,
    live: u32,
}

impl EntryTable {
    /// Allocate a zeroed table of `size` entries.
    ///
    /// Fails with [`IpcError::ResourceShortage`] if storage cannot be
    /// reserved. Must not be called while a spin-style lock is held.
    pub fn with_size(size: u32) -> IpcResult<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(size as usize)
            .map_err(|_| IpcError::ResourceShortage)?;
        for index in 0..size {
            slots.push(Slot {
                entry: Entry::free(Generation::FIRST),
                next_free: if index + 1 < size { index + 1 } else { NO_INDEX },
            });
        }
        Ok(Self {
            slots,
            free_head: if size > 0 { 0 } else { NO_INDEX },
            live: 0,
        })
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub fn live(&self) -> u32 {
        self.live
    }

    /// Check if no free slot remains.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_head == NO_INDEX
    }

    /// Pop the lowest free slot.
    ///
    /// Returns the name the new entry will be known by; the caller
    /// must install a live right into the slot under the same lock.
    pub fn alloc(&mut self) -> Option<Name> {
        let index = self.free_head;
        if index == NO_INDEX {
            return None;
        }
        self.free_head = self.slots[index as usize].next_free;
        self.live += 1;
        Some(Name::new(index, self.slots[index as usize].entry.gen))
    }

    /// Claim a specific free slot for a caller-chosen name.
    ///
    /// The slot's generation is forced to the name's generation, as the
    /// caller picked the full name. Fails with [`IpcError::NameInUse`]
    /// if the slot is occupied.
    pub fn alloc_at(&mut self, index: u32, gen: Generation) -> IpcResult<()> {
        if !self.slots[index as usize].entry.is_free() {
            return Err(IpcError::NameInUse);
        }
        // Unlink from the free list.
        let mut cursor = self.free_head;
        let mut prev = NO_INDEX;
        while cursor != NO_INDEX {
            if cursor == index {
                let next = self.slots[cursor as usize].next_free;
                if prev == NO_INDEX {
                    self.free_head = next;
                } else {
                    self.slots[prev as usize].next_free = next;
                }
                self.slots[index as usize].entry.gen = gen;
                self.live += 1;
                return Ok(());
            }
            prev = cursor;
            cursor = self.slots[cursor as usize].next_free;
        }
        // Free entry not on the free list: corrupted table.
        panic!("free slot missing from free list");
    }

    /// Return a slot to the free list, bumping its generation.
    pub fn free(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.entry.is_free(), "double free of table slot");
        let next_gen = slot.entry.gen.next();
        slot.entry = Entry::free(next_gen);
        slot.next_free = self.free_head;
        self.free_head = index;
        self.live -= 1;
    }

    /// Borrow the entry at `index`, free or live.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Entry> {
        self.slots.get(index as usize).map(|slot| &slot.entry)
    }

    /// Mutably borrow the entry at `index`, free or live.
    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Entry> {
        self.slots.get_mut(index as usize).map(|slot| &mut slot.entry)
    }

    /// Iterate over live entries in ascending index order.
    pub fn iter_live(&self) -> impl Iterator<Item = (Name, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.entry.is_free())
            .map(|(index, slot)| (Name::new(index as u32, slot.entry.gen), &slot.entry))
    }

    /// Drain every live entry, leaving the table empty.
    ///
    /// Used at space teardown; the freed slots keep bumped generations
    /// although the space will never hand out names again.
    pub fn drain_live(&mut self, mut sink: impl FnMut(Name, Entry)) {
        for index in 0..self.size() {
            if !self.slots[index as usize].entry.is_free() {
                let entry = self.slots[index as usize].entry;
                self.free(index);
                sink(Name::new(index, entry.gen), entry);
            }
        }
    }

    /// Adopt the contents of a smaller table plus tree entries
    /// migrating into the enlarged range.
    ///
    /// `self` must be freshly built (all slots free) and strictly
    /// larger than `old`. `migrated` must be sorted by index, with
    /// every index inside `old.size()..self.size()`. Entry bit
    /// patterns, including generations of both live and free slots,
    /// are preserved.
    pub fn adopt(&mut self, old: &EntryTable, migrated: &[(Name, Entry)]) {
        debug_assert!(self.live == 0 && self.size() > old.size());
        for index in 0..old.size() {
            self.slots[index as usize].entry = old.slots[index as usize].entry;
        }
        for &(name, entry) in migrated {
            debug_assert!(name.index >= old.size() && name.index < self.size());
            let slot = &mut self.slots[name.index as usize];
            slot.entry = entry;
            slot.entry.gen = name.gen;
        }
        // Rebuild the free list in ascending order.
        self.free_head = NO_INDEX;
        self.live = 0;
        for index in (0..self.size()).rev() {
            let slot = &mut self.slots[index as usize];
            if slot.entry.is_free() {
                slot.next_free = self.free_head;
                self.free_head = index;
            } else {
                self.live += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Right, UserRefs};
    use crate::object::PortRef;

    fn send_entry(gen: Generation) -> Entry {
        Entry::new(
            Right::Send {
                refs: UserRefs::ONE,
            },
            PortRef::from_index(9),
            gen,
        )
    }

    #[test]
    fn test_size_classes_double() {
        assert_eq!(next_table_size(4), Some(8));
        assert_eq!(next_table_size(5), Some(8));
        assert_eq!(next_table_size(65536), None);
    }

    #[test]
    fn test_alloc_prefers_low_indices() {
        let mut table = EntryTable::with_size(4).unwrap();
        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert_eq!((a.index, b.index), (0, 1));
        assert_eq!(a.gen, Generation::FIRST);
    }

    #[test]
    fn test_free_bumps_generation() {
        let mut table = EntryTable::with_size(4).unwrap();
        let name = table.alloc().unwrap();
        *table.get_mut(name.index).unwrap() = send_entry(name.gen);
        table.free(name.index);
        let reused = table.alloc().unwrap();
        assert_eq!(reused.index, name.index);
        assert_eq!(reused.gen, name.gen.next());
    }

    #[test]
    fn test_alloc_exhaustion() {
        let mut table = EntryTable::with_size(2).unwrap();
        assert!(table.alloc().is_some());
        assert!(table.alloc().is_some());
        assert!(table.is_full());
        assert!(table.alloc().is_none());
    }

    #[test]
    fn test_alloc_at_unlinks_middle_of_free_list() {
        let mut table = EntryTable::with_size(4).unwrap();
        table.alloc_at(2, Generation::new(7)).unwrap();
        *table.get_mut(2).unwrap() = send_entry(Generation::new(7));
        // Remaining free slots still allocate in ascending order,
        // skipping the claimed index.
        assert_eq!(table.alloc().unwrap().index, 0);
        assert_eq!(table.alloc().unwrap().index, 1);
        assert_eq!(table.alloc().unwrap().index, 3);
        assert!(table.is_full());
    }

    #[test]
    fn test_alloc_at_occupied_fails() {
        let mut table = EntryTable::with_size(4).unwrap();
        let name = table.alloc().unwrap();
        *table.get_mut(name.index).unwrap() = send_entry(name.gen);
        assert_eq!(
            table.alloc_at(name.index, Generation::FIRST),
            Err(IpcError::NameInUse)
        );
    }

    #[test]
    fn test_adopt_preserves_entries_and_generations() {
        let mut old = EntryTable::with_size(4).unwrap();
        let name = old.alloc().unwrap();
        *old.get_mut(name.index).unwrap() = send_entry(name.gen);
        // Cycle index 1 once so its generation differs from fresh.
        let cycled = old.alloc().unwrap();
        *old.get_mut(cycled.index).unwrap() = send_entry(cycled.gen);
        old.free(cycled.index);

        let migrated_name = Name::new(5, Generation::new(2));
        let migrated = [(migrated_name, send_entry(migrated_name.gen))];

        let mut grown = EntryTable::with_size(8).unwrap();
        grown.adopt(&old, &migrated);

        assert_eq!(grown.live(), 2);
        assert_eq!(grown.get(0).unwrap().gen, name.gen);
        assert!(!grown.get(0).unwrap().is_free());
        // Freed slot keeps its bumped generation across the copy.
        assert_eq!(grown.get(1).unwrap().gen, cycled.gen.next());
        assert!(grown.get(1).unwrap().is_free());
        assert_eq!(grown.get(5).unwrap().gen, migrated_name.gen);
        assert!(!grown.get(5).unwrap().is_free());

        // Free slots allocate in ascending order: 1, 2, 3, 4, 6, 7.
        assert_eq!(grown.alloc().unwrap().index, 1);
        assert_eq!(grown.alloc().unwrap().index, 2);
    }

    #[test]
    fn test_iter_live() {
        let mut table = EntryTable::with_size(4).unwrap();
        let a = table.alloc().unwrap();
        *table.get_mut(a.index).unwrap() = send_entry(a.gen);
        let names: Vec<Name> = table.iter_live().map(|(name, _)| name).collect();
        assert_eq!(names, [a]);
    }
}
