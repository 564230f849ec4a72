//! Per-task capability space
//!
//! A [`Space`] owns one dense entry table and one sparse tree behind a
//! single lock, plus the growth bookkeeping that moves entries between
//! the two. Shared ownership is expressed through `Arc`; dropping the
//! last reference to a space that was never deactivated is a contract
//! violation and panics.
//!
//! # Locking
//!
//! One `spin::Mutex` guards the table, the tree, the reverse map, and
//! every entry inside them. Table growth is the only path allowed to
//! allocate, and it does so with the lock released, serialised by the
//! `growing` flag.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};

use crate::entry::Entry;
use crate::error::{IpcError, IpcResult};
use crate::name::{index_in_range, Generation, Name};
use crate::object::PortRef;
use crate::table::{next_table_size, EntryTable, TABLE_SIZES};
use crate::tree::SplayTree;

/// Monotonic source of space identifiers. Identifier 0 is never used.
static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one space, stable for the kernel's lifetime.
///
/// Keys the deferred-send registry and tags notifications, so the
/// identifier of a destroyed space is never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SpaceId(u64);

impl SpaceId {
    /// Get the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lock-guarded interior of a space.
pub struct SpaceInner {
    /// Dense entries, indexed by name index.
    pub(crate) table: EntryTable,
    /// Sparse entries beyond the table range, keyed by full name.
    pub(crate) tree: SplayTree,
    /// Port to name back-map for coalescing send/receive rights.
    ///
    /// A port has at most one coalesced name per space; send-once and
    /// dead-name entries are never in this map.
    pub(crate) reverse: BTreeMap<PortRef, Name>,
    /// Tree entries whose index falls below the next table size class:
    /// the entries one growth step would absorb.
    pub(crate) tree_small: u32,
    /// Tree entries currently present in the reverse map.
    pub(crate) tree_hash: u32,
    /// Lowest index auto-allocation may spill to: one past the highest
    /// index ever inserted into the tree. The tree keeps no generation
    /// history for freed indices, so spilled indices are never reused;
    /// monotonicity is what keeps stale names from re-validating.
    pub(crate) spill_next: u32,
}

impl SpaceInner {
    fn index_is_small(&self, index: u32) -> bool {
        match next_table_size(self.table.size()) {
            Some(next) => index < next,
            None => false,
        }
    }

    /// Resolve a name to a copy of its entry.
    ///
    /// A live entry under a different generation of the same index is
    /// [`IpcError::InvalidName`] (the caller's name is stale); an
    /// absent entry is [`IpcError::NameNotFound`].
    pub(crate) fn lookup(&mut self, name: Name) -> IpcResult<Entry> {
        if name.index < self.table.size() {
            let entry = match self.table.get(name.index) {
                Some(entry) => *entry,
                None => return Err(IpcError::NameNotFound),
            };
            if entry.is_free() {
                return Err(IpcError::NameNotFound);
            }
            if entry.gen != name.gen {
                return Err(IpcError::InvalidName);
            }
            Ok(entry)
        } else {
            match self.tree.lookup(name) {
                Some(entry) => Ok(*entry),
                None => Err(IpcError::NameNotFound),
            }
        }
    }

    /// Write back a (possibly mutated) entry under an existing name.
    ///
    /// Keeps the reverse map and tree counters consistent when the
    /// right's coalescing class changed, e.g. a send right turning
    /// into a dead name.
    ///
    /// # Panics
    ///
    /// Panics if the name no longer resolves; callers hold the lock
    /// from lookup to write-back, so that is a contract violation.
    pub(crate) fn put(&mut self, name: Name, entry: Entry) {
        debug_assert_eq!(entry.gen, name.gen);
        let in_tree = name.index >= self.table.size();
        let old = if in_tree {
            match self.tree.lookup_mut(name) {
                Some(slot) => core::mem::replace(slot, entry),
                None => panic!("entry vanished during write-back"),
            }
        } else {
            match self.table.get_mut(name.index) {
                Some(slot) if !slot.is_free() && slot.gen == name.gen => {
                    core::mem::replace(slot, entry)
                }
                _ => panic!("entry vanished during write-back"),
            }
        };
        let was_mapped = old.right.is_reverse_mapped();
        let is_mapped = entry.right.is_reverse_mapped();
        if was_mapped && !is_mapped {
            self.reverse.remove(&old.object);
            if in_tree {
                self.tree_hash -= 1;
            }
        } else if !was_mapped && is_mapped {
            self.reverse.insert(entry.object, name);
            if in_tree {
                self.tree_hash += 1;
            }
        }
    }

    /// Remove the entry under `name`, returning it.
    ///
    /// Returns `None` if the name does not resolve (free slot, stale
    /// generation, or absent tree key). Table slots get their
    /// generation bumped for the next occupant.
    pub(crate) fn remove(&mut self, name: Name) -> Option<Entry> {
        if name.index < self.table.size() {
            let entry = *self.table.get(name.index)?;
            if entry.is_free() || entry.gen != name.gen {
                return None;
            }
            self.table.free(name.index);
            if entry.right.is_reverse_mapped() {
                self.reverse.remove(&entry.object);
            }
            Some(entry)
        } else {
            let entry = self.tree.remove(name)?;
            if self.index_is_small(name.index) {
                self.tree_small -= 1;
            }
            if entry.right.is_reverse_mapped() {
                self.reverse.remove(&entry.object);
                self.tree_hash -= 1;
            }
            Some(entry)
        }
    }

    /// Insert a new tree entry, maintaining counters and reverse map.
    pub(crate) fn tree_insert(&mut self, name: Name, mut entry: Entry) -> IpcResult<()> {
        entry.gen = name.gen;
        self.tree.insert(name, entry)?;
        self.spill_next = self.spill_next.max(name.index + 1);
        if self.index_is_small(name.index) {
            self.tree_small += 1;
        }
        if entry.right.is_reverse_mapped() {
            self.reverse.insert(entry.object, name);
            self.tree_hash += 1;
        }
        Ok(())
    }

    /// Install an entry at a caller-chosen name.
    ///
    /// The index must be representable; any live entry at the same
    /// index, under any generation, is [`IpcError::NameInUse`]: an
    /// index has at most one occupant across table and tree.
    pub(crate) fn install_at(&mut self, name: Name, mut entry: Entry) -> IpcResult<()> {
        if !index_in_range(name.index) {
            return Err(IpcError::InvalidName);
        }
        if name.index < self.table.size() {
            self.table.alloc_at(name.index, name.gen)?;
            entry.gen = name.gen;
            match self.table.get_mut(name.index) {
                Some(slot) => *slot = entry,
                None => panic!("allocated index out of range"),
            }
            if entry.right.is_reverse_mapped() {
                self.reverse.insert(entry.object, name);
            }
            Ok(())
        } else {
            // Reject index twins: a tree occupant under any generation
            // of this index blocks the install.
            let floor = Name::floor_of(name.index);
            if let (_, Some(upper)) = self.tree.bounds(floor) {
                if upper.index == name.index {
                    return Err(IpcError::NameInUse);
                }
            }
            self.tree_insert(name, entry)
        }
    }

    /// Check whether `name` could be installed right now.
    ///
    /// Mirrors the [`install_at`](Self::install_at) collision rules
    /// without mutating anything, so multi-step operations can
    /// validate their destination before touching the source.
    pub(crate) fn name_available(&mut self, name: Name) -> bool {
        if !index_in_range(name.index) {
            return false;
        }
        if name.index < self.table.size() {
            match self.table.get(name.index) {
                Some(entry) => entry.is_free(),
                None => false,
            }
        } else {
            match self.tree.bounds(Name::floor_of(name.index)) {
                (_, Some(upper)) if upper.index == name.index => false,
                _ => true,
            }
        }
    }

    /// Visit every live entry, table first then tree, in ascending
    /// name order within each structure.
    pub fn for_each_live(&self, mut f: impl FnMut(Name, &Entry)) {
        for (name, entry) in self.table.iter_live() {
            f(name, entry);
        }
        self.tree.in_order(|name, entry| f(name, entry));
    }

    /// Number of live entries across both structures.
    #[must_use]
    pub fn live_total(&self) -> u32 {
        self.table.live() + self.tree.total()
    }

    /// Number of entries currently held in the tree.
    #[must_use]
    pub fn tree_total(&self) -> u32 {
        self.tree.total()
    }

    /// Back-lookup: the coalesced name a port is known by, if any.
    #[must_use]
    pub(crate) fn reverse_lookup(&self, port: PortRef) -> Option<Name> {
        self.reverse.get(&port).copied()
    }
}

/// A per-task capability name space.
///
/// Created as `Arc<Space>`; every holder (the owning task, in-flight
/// capability transfers) keeps a clone. [`Space::deactivate`] must run
/// before the last clone drops.
pub struct Space {
    id: SpaceId,
    active: AtomicBool,
    /// Serialises table growth; set while one thread grows with the
    /// space lock released.
    growing: AtomicBool,
    inner: Mutex<SpaceInner>,
}

impl Space {
    /// Create an active space with a table of `initial_size` slots.
    ///
    /// `initial_size` should be a configured size class; the smallest
    /// class ([`TABLE_SIZES`]`[0]`) suits freshly created tasks.
    pub fn create(initial_size: u32) -> IpcResult<Arc<Self>> {
        let table = EntryTable::with_size(initial_size)?;
        let id = SpaceId(NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(Self {
            id,
            active: AtomicBool::new(true),
            growing: AtomicBool::new(false),
            inner: Mutex::new(SpaceInner {
                table,
                tree: SplayTree::new(),
                reverse: BTreeMap::new(),
                tree_small: 0,
                tree_hash: 0,
                spill_next: 0,
            }),
        }))
    }

    /// Create an active space with the smallest configured table.
    pub fn create_default() -> IpcResult<Arc<Self>> {
        Self::create(TABLE_SIZES[0])
    }

    /// This space's identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Check whether the space still accepts operations.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the space inactive. Returns whether this call was the one
    /// that deactivated it; all lookups fail from then on.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Lock the interior without checking liveness; teardown uses this
    /// after deactivation.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SpaceInner> {
        self.inner.lock()
    }

    /// Lock the interior of an active space.
    ///
    /// The liveness check runs before any other validation so callers
    /// racing teardown fail with [`IpcError::SpaceInactive`] alone.
    pub(crate) fn lock_active(&self) -> IpcResult<MutexGuard<'_, SpaceInner>> {
        if !self.is_active() {
            return Err(IpcError::SpaceInactive);
        }
        let inner = self.inner.lock();
        // Recheck: teardown may have won the lock first.
        if !self.is_active() {
            return Err(IpcError::SpaceInactive);
        }
        Ok(inner)
    }

    /// Allocate a fresh name for `entry`, growing the table or
    /// spilling into the tree as the growth policy decides.
    ///
    /// Takes and returns the space guard because growth must release
    /// the lock to allocate. On error the guard is dropped and no
    /// entry was installed.
    pub(crate) fn alloc_name<'s>(
        &'s self,
        mut inner: MutexGuard<'s, SpaceInner>,
        mut entry: Entry,
    ) -> IpcResult<(Name, MutexGuard<'s, SpaceInner>)> {
        loop {
            if let Some(name) = inner.table.alloc() {
                entry.gen = name.gen;
                match inner.table.get_mut(name.index) {
                    Some(slot) => *slot = entry,
                    None => panic!("allocated index out of range"),
                }
                if entry.right.is_reverse_mapped() {
                    inner.reverse.insert(entry.object, name);
                }
                return Ok((name, inner));
            }
            // Table full. Grow when one growth step would absorb every
            // tree entry (in particular when the tree is empty);
            // otherwise spill past the spill watermark. Freed spill
            // indices are never re-picked: the tree has no generation
            // memory, so reissuing one would re-validate stale names.
            let size = inner.table.size();
            let absorbs_all = inner.tree_small == inner.tree.total();
            match next_table_size(size) {
                Some(new_size) if absorbs_all => {
                    inner = self.grow_table(inner, new_size)?;
                }
                _ => {
                    let index = inner.spill_next.max(size);
                    if !index_in_range(index) {
                        return Err(IpcError::ResourceShortage);
                    }
                    let name = Name::new(index, Generation::FIRST);
                    inner.tree_insert(name, entry)?;
                    return Ok((name, inner));
                }
            }
        }
    }

    /// Grow the table to `new_size`, migrating tree entries that fall
    /// inside the enlarged range.
    ///
    /// Storage for the new table is allocated with the space lock
    /// released; the `growing` flag keeps a second grower out of that
    /// window. A loser of the flag race waits for the winner and
    /// retries against the grown table.
    fn grow_table<'s>(
        &'s self,
        inner: MutexGuard<'s, SpaceInner>,
        new_size: u32,
    ) -> IpcResult<MutexGuard<'s, SpaceInner>> {
        if self.growing.swap(true, Ordering::Acquire) {
            drop(inner);
            while self.growing.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
            return self.lock_active();
        }
        drop(inner);

        // Allocate outside the lock: the fresh table and the migration
        // buffer (at most new_size entries can sit below the boundary).
        let allocated = EntryTable::with_size(new_size).and_then(|fresh| {
            let mut migrated: Vec<(Name, Entry)> = Vec::new();
            migrated
                .try_reserve(new_size as usize)
                .map_err(|_| IpcError::ResourceShortage)?;
            Ok((fresh, migrated))
        });
        let (mut fresh, mut migrated) = match allocated {
            Ok(pair) => pair,
            Err(err) => {
                self.growing.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let mut inner = self.inner.lock();
        if !self.is_active() {
            self.growing.store(false, Ordering::Release);
            return Err(IpcError::SpaceInactive);
        }
        debug_assert!(inner.table.size() < new_size);

        // Pull tree entries into the enlarged range, in ascending
        // order. Popping only frees arena nodes; nothing allocates
        // while the lock is held.
        let boundary = Name::floor_of(new_size);
        while let Some((name, entry)) = inner.tree.pop_below(boundary) {
            if entry.right.is_reverse_mapped() {
                inner.tree_hash -= 1;
            }
            migrated.push((name, entry));
        }
        fresh.adopt(&inner.table, &migrated);
        let old = core::mem::replace(&mut inner.table, fresh);
        inner.tree_small = match next_table_size(new_size) {
            Some(next) => inner.tree.count_below(Name::floor_of(next)),
            None => 0,
        };

        // Free the old storage with the lock released, then relock
        // for the caller's retry.
        drop(inner);
        drop(old);
        drop(migrated);
        self.growing.store(false, Ordering::Release);
        self.lock_active()
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        // Dropping an active space means someone released the last
        // reference without tearing it down: memory-safety-relevant
        // misuse, not a recoverable condition.
        assert!(
            !self.is_active(),
            "space {} dropped while still active",
            self.id
        );
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Right, UserRefs};

    fn send_entry(port: u32) -> Entry {
        Entry::new(
            Right::Send {
                refs: UserRefs::ONE,
            },
            PortRef::from_index(port),
            Generation::FIRST,
        )
    }

    fn teardown(space: &Arc<Space>) {
        space.deactivate();
    }

    #[test]
    fn test_create_and_deactivate() {
        let space = Space::create(4).unwrap();
        assert!(space.is_active());
        assert!(space.deactivate());
        assert!(!space.deactivate());
        assert!(space.lock_active().is_err());
    }

    #[test]
    fn test_space_ids_unique() {
        let a = Space::create(4).unwrap();
        let b = Space::create(4).unwrap();
        assert_ne!(a.id(), b.id());
        teardown(&a);
        teardown(&b);
    }

    #[test]
    fn test_alloc_fills_table_then_grows() {
        let space = Space::create(4).unwrap();
        let mut names = Vec::new();
        let mut guard = space.lock();
        for port in 1..=5u32 {
            let (name, back) = space.alloc_name(guard, send_entry(port)).unwrap();
            names.push(name);
            guard = back;
        }
        // First four fill the size-4 table; the fifth forced growth.
        assert_eq!(guard.table.size(), 8);
        assert_eq!(names[4].index, 4);
        assert_eq!(guard.live_total(), 5);
        drop(guard);
        teardown(&space);
    }

    #[test]
    fn test_lookup_distinguishes_stale_and_absent() {
        let space = Space::create(4).unwrap();
        let guard = space.lock();
        let (name, mut guard) = space.alloc_name(guard, send_entry(1)).unwrap();
        assert!(guard.lookup(name).is_ok());

        let absent = Name::new(2, Generation::FIRST);
        assert_eq!(guard.lookup(absent), Err(IpcError::NameNotFound));

        let stale = Name::new(name.index, name.gen.next());
        assert_eq!(guard.lookup(stale), Err(IpcError::InvalidName));
        drop(guard);
        teardown(&space);
    }

    #[test]
    fn test_remove_bumps_generation() {
        let space = Space::create(4).unwrap();
        let guard = space.lock();
        let (name, mut guard) = space.alloc_name(guard, send_entry(1)).unwrap();
        assert!(guard.remove(name).is_some());
        assert!(guard.remove(name).is_none());
        drop(guard);

        let guard = space.lock();
        let (reused, guard) = space.alloc_name(guard, send_entry(2)).unwrap();
        assert_eq!(reused.index, name.index);
        assert_eq!(reused.gen, name.gen.next());
        drop(guard);
        teardown(&space);
    }

    #[test]
    fn test_install_at_rejects_index_twin_in_tree() {
        let space = Space::create(4).unwrap();
        let mut guard = space.lock();
        let name = Name::new(10, Generation::new(3));
        guard.install_at(name, send_entry(1)).unwrap();
        // Same index under another generation is still a collision.
        let twin = Name::new(10, Generation::new(4));
        assert_eq!(
            guard.install_at(twin, send_entry(2)),
            Err(IpcError::NameInUse)
        );
        assert_eq!(guard.tree_total(), 1);
        drop(guard);
        teardown(&space);
    }

    #[test]
    fn test_growth_migrates_tree_entries() {
        let space = Space::create(4).unwrap();
        let mut guard = space.lock();
        // Two sparse entries that fall inside a size-8 table.
        guard
            .install_at(Name::new(5, Generation::FIRST), send_entry(1))
            .unwrap();
        guard
            .install_at(Name::new(6, Generation::FIRST), send_entry(2))
            .unwrap();
        assert_eq!(guard.tree_total(), 2);
        // Fill the table so the next alloc grows.
        let mut guard = guard;
        for port in 3..=6u32 {
            let (_, back) = space.alloc_name(guard, send_entry(port)).unwrap();
            guard = back;
        }
        let (name, guard) = space.alloc_name(guard, send_entry(7)).unwrap();
        assert_eq!(guard.table.size(), 8);
        assert_eq!(guard.tree_total(), 0);
        // Migrated entries resolve from the table under the same names.
        let mut guard = guard;
        assert!(guard.lookup(Name::new(5, Generation::FIRST)).is_ok());
        assert!(guard.lookup(Name::new(6, Generation::FIRST)).is_ok());
        // The new allocation took the remaining free slot.
        assert_eq!(name.index, 4);
        drop(guard);
        teardown(&space);
    }

    #[test]
    fn test_reverse_map_tracks_coalesced_rights() {
        let space = Space::create(4).unwrap();
        let guard = space.lock();
        let port = PortRef::from_index(9);
        let (name, mut guard) = space.alloc_name(guard, send_entry(9)).unwrap();
        assert_eq!(guard.reverse_lookup(port), Some(name));

        // Turning the right into a dead name drops the mapping.
        let mut entry = guard.lookup(name).unwrap();
        entry.right = Right::DeadName {
            refs: UserRefs::ONE,
        };
        entry.object = PortRef::NULL;
        guard.put(name, entry);
        assert_eq!(guard.reverse_lookup(port), None);
        drop(guard);
        teardown(&space);
    }

    #[test]
    #[should_panic(expected = "dropped while still active")]
    fn test_dropping_active_space_panics() {
        let space = Space::create(4).unwrap();
        drop(space);
    }
}
