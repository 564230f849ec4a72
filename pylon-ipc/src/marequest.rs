//! Deferred-send registry
//!
//! A marequest records that the next attempt to deliver a message to a
//! name must be diverted into a notification on a send-once right. At
//! most one record exists per `(space, name)` pair, mirrored by the
//! entry's `marequest` flag.
//!
//! Records live in chains inside a fixed-size bucket array keyed by
//! `(space, name)`. Each bucket has its own lock, taken after the
//! space lock when both are needed; the registry never takes a space
//! lock itself.
//!
//! A cancelled record is returned by value; the caller releases the
//! held notify-port reference exactly once by consuming it. There is
//! no second destroy to guard against.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{IpcError, IpcResult};
use crate::name::Name;
use crate::object::PortRef;
use crate::space::SpaceId;

/// Number of hash buckets. Power of two, fixed at build time.
const BUCKET_COUNT: usize = 64;

/// One outstanding deferred-send record.
///
/// Holds one reference on `notify` (the send-once port the diverted
/// notification goes to) for its whole lifetime; whoever removes the
/// record from the registry owns that reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Marequest {
    /// Space the watched name lives in.
    pub space: SpaceId,
    /// The watched name.
    pub name: Name,
    /// Port the diverted notification is sent to.
    pub notify: PortRef,
}

/// Fixed-size hash table of deferred-send records.
pub struct MarequestTable {
    buckets: [Mutex<Vec<Marequest>>; BUCKET_COUNT],
}

fn bucket_index(space: SpaceId, name: Name) -> usize {
    let mixed = space
        .value()
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(u64::from(name.index));
    (mixed as usize) & (BUCKET_COUNT - 1)
}

impl MarequestTable {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: Mutex<Vec<Marequest>> = Mutex::new(Vec::new());
        Self {
            buckets: [EMPTY; BUCKET_COUNT],
        }
    }

    /// Record a deferred-send request for `(space, name)`.
    ///
    /// Fails with [`IpcError::AlreadyPending`] if a record exists, and
    /// with [`IpcError::ResourceShortage`] if the chain cannot grow;
    /// neither failure takes ownership of the notify reference.
    pub fn create(&self, space: SpaceId, name: Name, notify: PortRef) -> IpcResult<()> {
        let mut chain = self.buckets[bucket_index(space, name)].lock();
        if chain
            .iter()
            .any(|req| req.space == space && req.name == name)
        {
            return Err(IpcError::AlreadyPending);
        }
        chain
            .try_reserve(1)
            .map_err(|_| IpcError::ResourceShortage)?;
        chain.push(Marequest {
            space,
            name,
            notify,
        });
        Ok(())
    }

    /// Check whether a record exists for `(space, name)`.
    #[must_use]
    pub fn exists(&self, space: SpaceId, name: Name) -> bool {
        let chain = self.buckets[bucket_index(space, name)].lock();
        chain
            .iter()
            .any(|req| req.space == space && req.name == name)
    }

    /// Remove and return the record for `(space, name)`, if any.
    ///
    /// The caller takes over the record's notify-port reference and
    /// must release or consume it.
    pub fn cancel(&self, space: SpaceId, name: Name) -> Option<Marequest> {
        let mut chain = self.buckets[bucket_index(space, name)].lock();
        let at = chain
            .iter()
            .position(|req| req.space == space && req.name == name)?;
        Some(chain.swap_remove(at))
    }

    /// Re-key a record after its name was renamed.
    ///
    /// Returns whether a record was moved. The record keeps its
    /// notify-port reference across the move.
    pub fn rename(&self, space: SpaceId, old: Name, new: Name) -> IpcResult<bool> {
        let Some(req) = self.cancel(space, old) else {
            return Ok(false);
        };
        match self.create(space, new, req.notify) {
            Ok(()) => Ok(true),
            Err(err) => {
                // Restore under the old key; the slot it came from is
                // still reserved in its chain.
                let mut chain = self.buckets[bucket_index(space, old)].lock();
                chain.push(req);
                Err(err)
            }
        }
    }
}

impl Default for MarequestTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Generation;

    fn space_id_pair() -> (SpaceId, SpaceId) {
        // Space ids are only constructible through Space::create; tests
        // use two real spaces for distinct ids.
        let a = crate::space::Space::create(4).unwrap();
        let b = crate::space::Space::create(4).unwrap();
        let ids = (a.id(), b.id());
        a.deactivate();
        b.deactivate();
        ids
    }

    fn name(index: u32) -> Name {
        Name::new(index, Generation::FIRST)
    }

    #[test]
    fn test_create_and_cancel() {
        let table = MarequestTable::new();
        let (space, _) = space_id_pair();
        let notify = PortRef::from_index(7);

        table.create(space, name(3), notify).unwrap();
        assert!(table.exists(space, name(3)));

        let req = table.cancel(space, name(3)).unwrap();
        assert_eq!(req.notify, notify);
        assert!(!table.exists(space, name(3)));
        assert!(table.cancel(space, name(3)).is_none());
    }

    #[test]
    fn test_duplicate_is_already_pending() {
        let table = MarequestTable::new();
        let (space, _) = space_id_pair();
        table.create(space, name(1), PortRef::from_index(1)).unwrap();
        assert_eq!(
            table.create(space, name(1), PortRef::from_index(2)),
            Err(IpcError::AlreadyPending)
        );
        // The original record is untouched.
        assert_eq!(
            table.cancel(space, name(1)).unwrap().notify,
            PortRef::from_index(1)
        );
    }

    #[test]
    fn test_same_name_different_spaces() {
        let table = MarequestTable::new();
        let (a, b) = space_id_pair();
        table.create(a, name(2), PortRef::from_index(1)).unwrap();
        table.create(b, name(2), PortRef::from_index(2)).unwrap();
        assert!(table.exists(a, name(2)));
        assert!(table.exists(b, name(2)));
        assert_eq!(
            table.cancel(a, name(2)).unwrap().notify,
            PortRef::from_index(1)
        );
        assert!(table.exists(b, name(2)));
    }

    #[test]
    fn test_rename_follows_record() {
        let table = MarequestTable::new();
        let (space, _) = space_id_pair();
        let notify = PortRef::from_index(5);
        table.create(space, name(4), notify).unwrap();

        assert!(table.rename(space, name(4), name(9)).unwrap());
        assert!(!table.exists(space, name(4)));
        assert_eq!(table.cancel(space, name(9)).unwrap().notify, notify);

        // Renaming an unwatched name is a no-op.
        assert!(!table.rename(space, name(4), name(10)).unwrap());
    }

    #[test]
    fn test_rename_onto_pending_target_fails_and_restores() {
        let table = MarequestTable::new();
        let (space, _) = space_id_pair();
        table.create(space, name(1), PortRef::from_index(1)).unwrap();
        table.create(space, name(2), PortRef::from_index(2)).unwrap();
        assert_eq!(
            table.rename(space, name(1), name(2)),
            Err(IpcError::AlreadyPending)
        );
        // Both records survive under their original keys.
        assert!(table.exists(space, name(1)));
        assert!(table.exists(space, name(2)));
    }
}
