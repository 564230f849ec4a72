//! Capability rights engine
//!
//! Implements the right state machine over space entries:
//! `Free -> {Send, Receive, SendOnce, PortSet, DeadName} -> Free`.
//! Copy-in consumes a name into an in-flight capability, copy-out
//! installs a capability as a name, delta adjusts user reference
//! counts, and destroy tears a name down unconditionally.
//!
//! # Dead names
//!
//! A port can die while names for it are still held. Conversion to the
//! dead-name state is lazy: every operation that resolves an entry
//! first checks the port and, if it was destroyed, rewrites the entry
//! as a dead name, releases the port reference, cancels any
//! deferred-send record, and fires the registered dead-name
//! notification. The registered request is cleared under the space
//! lock before delivery, which is what makes every notification
//! at-most-once even under destruction races.
//!
//! # Failure policy
//!
//! Every operation either fully succeeds or leaves the targeted entry
//! untouched. A capability passed to a failing copy-out stays with the
//! caller, reference included.
//!
//! # Side effects
//!
//! Port releases and notification delivery happen after the space lock
//! is dropped; operations accumulate them in an [`Effects`] record
//! while locked and run them on the way out.

use alloc::vec::Vec;

use pylon_abi::{NameDump, RightKind};

use crate::entry::{Entry, Right, UserRefs};
use crate::error::{IpcError, IpcResult};
use crate::marequest::{Marequest, MarequestTable};
use crate::name::{index_in_range, Generation, Name};
use crate::object::{NotifyDispatch, PortOps, PortRef, RequestId};
use crate::space::{Space, SpaceId, SpaceInner};

/// How a capability moves through a copy-in.
///
/// Move variants consume the named right; copy and make variants leave
/// it in place and mint a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    /// Move the receive right out of the name.
    MoveReceive,
    /// Move one send reference out of the name.
    MoveSend,
    /// Move the send-once right out of the name.
    MoveSendOnce,
    /// Duplicate a send right, leaving the name unchanged.
    CopySend,
    /// Mint a send right from the receive right.
    MakeSend,
    /// Mint a send-once right from the receive right.
    MakeSendOnce,
}

impl TransferKind {
    /// Get a short description of the transfer kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MoveReceive => "move-receive",
            Self::MoveSend => "move-send",
            Self::MoveSendOnce => "move-send-once",
            Self::CopySend => "copy-send",
            Self::MakeSend => "make-send",
            Self::MakeSendOnce => "make-send-once",
        }
    }
}

impl core::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An in-flight capability produced by copy-in.
///
/// The live variant carries one port reference, owned by whoever holds
/// the value; copy-out or an explicit release consumes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopiedCap {
    /// A live capability on the port.
    Live(PortRef),
    /// The name was dead and the caller admitted dead names.
    Dead,
}

/// Outcome of a copy-out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyoutResult {
    /// The capability is now known by this name.
    Named(Name),
    /// The port died in flight; no entry was created. The boundary
    /// layer reports the reserved dead encoding.
    Dead,
}

/// State needed to reverse or finalise one copy-in.
#[derive(Debug)]
struct CopyinUndo {
    name: Name,
    /// The entry exactly as it was before the copy-in mutated it
    /// (after any lazy dead-name conversion, which is permanent).
    snapshot: Entry,
    /// The copy-in freed the entry; its port reference travelled into
    /// the capability.
    freed: bool,
    /// The copy-in took a fresh port reference for the capability.
    took_ref: bool,
    /// Deferred-send record cancelled by the copy-in. Destroyed on
    /// commit, re-registered on undo.
    marequest: Option<Marequest>,
    /// Pending port-deleted notification, delivered only on commit.
    port_deleted: Option<(SpaceId, Name)>,
}

/// A completed copy-in, pending commit or undo.
///
/// Notifications and deferred-send teardown triggered by the copy-in
/// are held back until [`RightsEngine::copyin_commit`], so a larger
/// operation that aborts halfway can reverse everything with
/// [`RightsEngine::copyin_undo`] without having published anything.
#[derive(Debug)]
pub struct Copyin {
    /// The capability that was copied in.
    pub cap: CopiedCap,
    undo: CopyinUndo,
}

impl Copyin {
    /// The capability without consuming the undo state.
    #[inline]
    #[must_use]
    pub fn cap(&self) -> CopiedCap {
        self.cap
    }
}

/// Side effects accumulated under the space lock, run after it drops.
#[derive(Default)]
struct Effects {
    release_port: Option<PortRef>,
    release_notify: Option<PortRef>,
    port_deleted: Option<(SpaceId, Name)>,
    dead_name: Option<(SpaceId, Name)>,
    send_once: Option<PortRef>,
}

/// The rights state machine, bound to its collaborators.
///
/// The port layer and notification dispatch are injected as trait
/// objects; the engine itself is stateless beyond those seams and can
/// be constructed per call path.
pub struct RightsEngine<'a> {
    ports: &'a dyn PortOps,
    notify: &'a dyn NotifyDispatch,
    marequests: &'a MarequestTable,
}

impl<'a> RightsEngine<'a> {
    /// Bind an engine to its collaborators.
    #[must_use]
    pub fn new(
        ports: &'a dyn PortOps,
        notify: &'a dyn NotifyDispatch,
        marequests: &'a MarequestTable,
    ) -> Self {
        Self {
            ports,
            notify,
            marequests,
        }
    }

    fn run_effects(&self, effects: Effects) {
        if let Some((space, name)) = effects.port_deleted {
            self.notify.port_deleted(space, name.to_raw());
        }
        if let Some((space, name)) = effects.dead_name {
            self.notify.dead_name(space, name.to_raw());
        }
        if let Some(port) = effects.send_once {
            self.notify.send_once(port);
        }
        if let Some(port) = effects.release_port {
            self.ports.release(port);
        }
        if let Some(port) = effects.release_notify {
            self.ports.release(port);
        }
    }

    /// Resolve a name, converting the entry to a dead name first if
    /// its port died. The conversion is permanent and its effects fire
    /// even when the surrounding operation subsequently fails.
    fn resolve_checked(
        &self,
        space_id: SpaceId,
        inner: &mut SpaceInner,
        name: Name,
        effects: &mut Effects,
    ) -> IpcResult<Entry> {
        let mut entry = inner.lookup(name)?;
        if entry.object.is_valid() && self.ports.is_destroyed(entry.object) {
            let refs = entry.right.user_refs();
            let refs = if refs.is_zero() { UserRefs::ONE } else { refs };
            effects.release_port = Some(entry.object);
            if entry.marequest {
                if let Some(req) = self.marequests.cancel(space_id, name) {
                    effects.release_notify = Some(req.notify);
                }
                entry.marequest = false;
            }
            if entry.request.is_valid() {
                entry.request = RequestId::NULL;
                effects.dead_name = Some((space_id, name));
            }
            entry.right = Right::DeadName { refs };
            entry.object = PortRef::NULL;
            inner.put(name, entry);
        }
        Ok(entry)
    }

    /// Remove an entry whose right is being destroyed while its port
    /// is (as far as we know) alive, queueing the cleanup effects.
    fn release_right(
        &self,
        space_id: SpaceId,
        inner: &mut SpaceInner,
        name: Name,
        entry: &Entry,
        effects: &mut Effects,
    ) {
        if inner.remove(name).is_none() {
            panic!("entry vanished while locked");
        }
        if entry.marequest {
            if let Some(req) = self.marequests.cancel(space_id, name) {
                effects.release_notify = Some(req.notify);
            }
        }
        if entry.request.is_valid() {
            effects.port_deleted = Some((space_id, name));
        }
        if entry.object.is_valid() {
            effects.release_port = Some(entry.object);
        }
    }

    // ------------------------------------------------------------------
    // copyin

    /// Consume a name into an in-flight capability.
    ///
    /// `deadok` admits dead names for the send dispositions, yielding
    /// [`CopiedCap::Dead`]; the move variants consume one dead
    /// reference in that case.
    ///
    /// The returned [`Copyin`] must be passed to either
    /// [`copyin_commit`](Self::copyin_commit) or
    /// [`copyin_undo`](Self::copyin_undo).
    pub fn copyin(
        &self,
        space: &Space,
        name: Name,
        kind: TransferKind,
        deadok: bool,
    ) -> IpcResult<Copyin> {
        let mut effects = Effects::default();
        let result = self.copyin_locked(space, name, kind, deadok, &mut effects);
        self.run_effects(effects);
        result
    }

    fn copyin_locked(
        &self,
        space: &Space,
        name: Name,
        kind: TransferKind,
        deadok: bool,
        effects: &mut Effects,
    ) -> IpcResult<Copyin> {
        let space_id = space.id();
        let mut inner = space.lock_active()?;
        let snapshot = self.resolve_checked(space_id, &mut inner, name, effects)?;
        let mut entry = snapshot;

        let mut freed = false;
        let mut took_ref = false;
        let mut marequest = None;
        let mut port_deleted = None;

        // Frees the entry and transfers its port reference into the
        // capability; the notification side is deferred to commit.
        let mut free_entry = |inner: &mut SpaceInner, entry: &Entry| {
            if inner.remove(name).is_none() {
                panic!("entry vanished while locked");
            }
            if entry.marequest {
                marequest = self.marequests.cancel(space_id, name);
            }
            if entry.request.is_valid() {
                port_deleted = Some((space_id, name));
            }
            freed = true;
        };

        let cap = match kind {
            TransferKind::MakeSend | TransferKind::MakeSendOnce => {
                if !entry.right.has_receive() {
                    return Err(IpcError::InvalidRight);
                }
                self.ports.reference(entry.object);
                took_ref = true;
                CopiedCap::Live(entry.object)
            }
            TransferKind::CopySend => match entry.right {
                Right::DeadName { .. } if deadok => CopiedCap::Dead,
                right if right.has_send() => {
                    self.ports.reference(entry.object);
                    took_ref = true;
                    CopiedCap::Live(entry.object)
                }
                _ => return Err(IpcError::InvalidRight),
            },
            TransferKind::MoveSend => match entry.right {
                Right::DeadName { refs } if deadok => {
                    let remaining = refs.checked_delta(-1)?;
                    if remaining.is_zero() {
                        free_entry(&mut inner, &snapshot);
                    } else {
                        entry.right = Right::DeadName { refs: remaining };
                        inner.put(name, entry);
                    }
                    CopiedCap::Dead
                }
                Right::Send { refs } => {
                    if refs == UserRefs::ONE {
                        free_entry(&mut inner, &snapshot);
                        CopiedCap::Live(entry.object)
                    } else {
                        entry.right = Right::Send {
                            refs: refs.checked_delta(-1)?,
                        };
                        inner.put(name, entry);
                        self.ports.reference(entry.object);
                        took_ref = true;
                        CopiedCap::Live(entry.object)
                    }
                }
                Right::Receive { send_refs } if !send_refs.is_zero() => {
                    entry.right = Right::Receive {
                        send_refs: send_refs.checked_delta(-1)?,
                    };
                    inner.put(name, entry);
                    self.ports.reference(entry.object);
                    took_ref = true;
                    CopiedCap::Live(entry.object)
                }
                _ => return Err(IpcError::InvalidRight),
            },
            TransferKind::MoveReceive => match entry.right {
                Right::Receive { send_refs } => {
                    if send_refs.is_zero() {
                        free_entry(&mut inner, &snapshot);
                        CopiedCap::Live(entry.object)
                    } else {
                        // The name keeps its coalesced send rights and
                        // therefore its port reference.
                        entry.right = Right::Send { refs: send_refs };
                        inner.put(name, entry);
                        self.ports.reference(entry.object);
                        took_ref = true;
                        CopiedCap::Live(entry.object)
                    }
                }
                _ => return Err(IpcError::InvalidRight),
            },
            TransferKind::MoveSendOnce => match entry.right {
                Right::SendOnce => {
                    free_entry(&mut inner, &snapshot);
                    CopiedCap::Live(entry.object)
                }
                Right::DeadName { refs } if deadok => {
                    let remaining = refs.checked_delta(-1)?;
                    if remaining.is_zero() {
                        free_entry(&mut inner, &snapshot);
                    } else {
                        entry.right = Right::DeadName { refs: remaining };
                        inner.put(name, entry);
                    }
                    CopiedCap::Dead
                }
                _ => return Err(IpcError::InvalidRight),
            },
        };

        Ok(Copyin {
            cap,
            undo: CopyinUndo {
                name,
                snapshot,
                freed,
                took_ref,
                marequest,
                port_deleted,
            },
        })
    }

    /// Finalise a copy-in: destroy the cancelled deferred-send record
    /// and deliver the pending port-deleted notification.
    pub fn copyin_commit(&self, copyin: Copyin) -> CopiedCap {
        if let Some(req) = copyin.undo.marequest {
            self.ports.release(req.notify);
        }
        if let Some((space, name)) = copyin.undo.port_deleted {
            self.notify.port_deleted(space, name.to_raw());
        }
        copyin.cap
    }

    /// Reverse a copy-in exactly, restoring the entry bit-for-bit.
    ///
    /// Consumes the capability: its port reference is either given
    /// back to the reinstalled entry or released.
    ///
    /// # Panics
    ///
    /// Panics if the freed name was reoccupied in the meantime; a
    /// caller that interleaves foreign operations between copy-in and
    /// undo has violated the contract.
    pub fn copyin_undo(&self, space: &Space, copyin: Copyin) {
        let Copyin { cap, undo } = copyin;
        let Ok(mut inner) = space.lock_active() else {
            // Teardown owns the entries now; just drop our references.
            if let CopiedCap::Live(port) = cap {
                if undo.freed || undo.took_ref {
                    self.ports.release(port);
                }
            }
            if let Some(req) = undo.marequest {
                self.ports.release(req.notify);
            }
            return;
        };

        let mut release_cap = false;
        if undo.freed {
            // The capability's reference becomes the entry's again.
            match inner.install_at(undo.name, undo.snapshot) {
                Ok(()) => {}
                Err(_) => panic!("copy-in undo target reoccupied"),
            }
        } else {
            inner.put(undo.name, undo.snapshot);
            release_cap = undo.took_ref;
        }
        drop(inner);

        if release_cap {
            if let CopiedCap::Live(port) = cap {
                self.ports.release(port);
            }
        }
        if let Some(req) = undo.marequest {
            // The record's chain slot was only just vacated, so the
            // re-registration cannot fail.
            match self.marequests.create(req.space, req.name, req.notify) {
                Ok(()) => {}
                Err(_) => panic!("deferred-send record restore failed"),
            }
        }
    }

    // ------------------------------------------------------------------
    // copyout

    /// Install a capability into the space at a freshly chosen name.
    ///
    /// Send and receive rights coalesce with an existing name for the
    /// same port; a destroyed port yields [`CopyoutResult::Dead`] and
    /// the capability's reference is dropped. On error the capability
    /// stays with the caller, reference included.
    pub fn copyout(
        &self,
        space: &Space,
        port: PortRef,
        kind: RightKind,
    ) -> IpcResult<CopyoutResult> {
        let mut effects = Effects::default();
        let result = self.copyout_locked(space, port, kind, None, &mut effects);
        self.run_effects(effects);
        result
    }

    /// Install a capability at a caller-chosen name.
    ///
    /// Fails with [`IpcError::NameInUse`] if the name (or any other
    /// generation of its index) is occupied, or if the port is already
    /// coalesced under a different name.
    pub fn copyout_named(
        &self,
        space: &Space,
        port: PortRef,
        kind: RightKind,
        name: Name,
    ) -> IpcResult<CopyoutResult> {
        let mut effects = Effects::default();
        let result = self.copyout_locked(space, port, kind, Some(name), &mut effects);
        self.run_effects(effects);
        result
    }

    fn copyout_locked(
        &self,
        space: &Space,
        port: PortRef,
        kind: RightKind,
        at: Option<Name>,
        effects: &mut Effects,
    ) -> IpcResult<CopyoutResult> {
        if !matches!(
            kind,
            RightKind::Send | RightKind::Receive | RightKind::SendOnce
        ) {
            return Err(IpcError::InvalidRight);
        }
        let mut inner = space.lock_active()?;
        if self.ports.is_destroyed(port) {
            effects.release_port = Some(port);
            return Ok(CopyoutResult::Dead);
        }

        if kind == RightKind::SendOnce {
            // Send-once rights never coalesce; every copy-out gets its
            // own name.
            let entry = Entry::new(Right::SendOnce, port, Generation::FIRST);
            let name = match at {
                Some(name) => {
                    inner.install_at(name, entry)?;
                    name
                }
                None => {
                    let (name, _inner) = space.alloc_name(inner, entry)?;
                    return Ok(CopyoutResult::Named(name));
                }
            };
            return Ok(CopyoutResult::Named(name));
        }

        if let Some(existing) = inner.reverse_lookup(port) {
            if let Some(name) = at {
                if name != existing {
                    return Err(IpcError::NameInUse);
                }
            }
            let mut entry = match inner.lookup(existing) {
                Ok(entry) => entry,
                Err(_) => panic!("reverse map out of sync"),
            };
            entry.right = match (kind, entry.right) {
                (RightKind::Send, Right::Send { refs }) => Right::Send {
                    refs: refs.checked_delta(1)?,
                },
                (RightKind::Send, Right::Receive { send_refs }) => Right::Receive {
                    send_refs: send_refs.checked_delta(1)?,
                },
                (RightKind::Receive, Right::Send { refs }) => Right::Receive { send_refs: refs },
                (RightKind::Receive, Right::Receive { .. }) => {
                    panic!("duplicate receive right");
                }
                _ => panic!("reverse map holds uncoalesced right"),
            };
            inner.put(existing, entry);
            // The entry already holds its single port reference.
            effects.release_port = Some(port);
            return Ok(CopyoutResult::Named(existing));
        }

        let right = match kind {
            RightKind::Send => Right::Send {
                refs: UserRefs::ONE,
            },
            RightKind::Receive => Right::Receive {
                send_refs: UserRefs::ZERO,
            },
            _ => panic!("unreachable copy-out kind"),
        };
        let entry = Entry::new(right, port, Generation::FIRST);
        match at {
            Some(name) => {
                inner.install_at(name, entry)?;
                Ok(CopyoutResult::Named(name))
            }
            None => {
                let (name, _inner) = space.alloc_name(inner, entry)?;
                Ok(CopyoutResult::Named(name))
            }
        }
    }

    // ------------------------------------------------------------------
    // delta / destroy

    /// Adjust the user reference count of the right named by `kind`.
    ///
    /// A negative delta reaching zero releases the right; overflow and
    /// underflow abort with no mutation. Receive, send-once, and
    /// port-set rights admit only deltas of 0 and -1.
    pub fn delta(&self, space: &Space, name: Name, kind: RightKind, delta: i32) -> IpcResult<()> {
        let mut effects = Effects::default();
        let result = self.delta_locked(space, name, kind, delta, &mut effects);
        self.run_effects(effects);
        result
    }

    fn delta_locked(
        &self,
        space: &Space,
        name: Name,
        kind: RightKind,
        delta: i32,
        effects: &mut Effects,
    ) -> IpcResult<()> {
        let space_id = space.id();
        let mut inner = space.lock_active()?;
        let mut entry = self.resolve_checked(space_id, &mut inner, name, effects)?;

        match (kind, entry.right) {
            (RightKind::Send, Right::Send { refs }) => {
                let remaining = refs.checked_delta(delta)?;
                if remaining.is_zero() {
                    self.release_right(space_id, &mut inner, name, &entry, effects);
                } else {
                    entry.right = Right::Send { refs: remaining };
                    inner.put(name, entry);
                }
            }
            (RightKind::Send, Right::Receive { send_refs }) => {
                // Coalesced send references; losing the last one keeps
                // the receive right and the port reference. A pure
                // receive holds no send right to duplicate.
                if send_refs.is_zero() && delta != 0 {
                    return Err(IpcError::InvalidRight);
                }
                entry.right = Right::Receive {
                    send_refs: send_refs.checked_delta(delta)?,
                };
                inner.put(name, entry);
            }
            (RightKind::Receive, Right::Receive { send_refs }) => match delta {
                0 => {}
                -1 => {
                    if send_refs.is_zero() {
                        self.release_right(space_id, &mut inner, name, &entry, effects);
                    } else {
                        entry.right = Right::Send { refs: send_refs };
                        inner.put(name, entry);
                    }
                }
                _ => return Err(IpcError::InvalidRight),
            },
            (RightKind::SendOnce, Right::SendOnce) => match delta {
                0 => {}
                -1 => {
                    // Destroyed without being consumed by a message.
                    effects.send_once = Some(entry.object);
                    self.release_right(space_id, &mut inner, name, &entry, effects);
                }
                _ => return Err(IpcError::InvalidRight),
            },
            (RightKind::PortSet, Right::PortSet) => match delta {
                0 => {}
                -1 => self.release_right(space_id, &mut inner, name, &entry, effects),
                _ => return Err(IpcError::InvalidRight),
            },
            (RightKind::DeadName, Right::DeadName { refs }) => {
                let remaining = refs.checked_delta(delta)?;
                if remaining.is_zero() {
                    // No port, no notifications: the name is simply
                    // released.
                    if inner.remove(name).is_none() {
                        panic!("entry vanished while locked");
                    }
                } else {
                    entry.right = Right::DeadName { refs: remaining };
                    inner.put(name, entry);
                }
            }
            _ => return Err(IpcError::InvalidRight),
        }
        Ok(())
    }

    /// Unconditionally drop every right held under `name`.
    ///
    /// Fires `port_deleted` if a dead-name request was registered and
    /// the port is still alive, and `send_once` for an unconsumed
    /// send-once right.
    pub fn destroy(&self, space: &Space, name: Name) -> IpcResult<()> {
        let mut effects = Effects::default();
        let result = self.destroy_locked(space, name, &mut effects);
        self.run_effects(effects);
        result
    }

    fn destroy_locked(&self, space: &Space, name: Name, effects: &mut Effects) -> IpcResult<()> {
        let space_id = space.id();
        let mut inner = space.lock_active()?;
        let entry = self.resolve_checked(space_id, &mut inner, name, effects)?;
        match entry.right {
            Right::DeadName { .. } => {
                // Any request already fired at conversion time.
                if inner.remove(name).is_none() {
                    panic!("entry vanished while locked");
                }
            }
            Right::SendOnce => {
                effects.send_once = Some(entry.object);
                self.release_right(space_id, &mut inner, name, &entry, effects);
            }
            _ => self.release_right(space_id, &mut inner, name, &entry, effects),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // introspection / rename

    /// Read-only introspection: the right kind and its user reference
    /// count. Applies lazy dead-name conversion like every resolve.
    pub fn info(&self, space: &Space, name: Name) -> IpcResult<(RightKind, u16)> {
        let mut effects = Effects::default();
        let result = (|| {
            let mut inner = space.lock_active()?;
            let entry = self.resolve_checked(space.id(), &mut inner, name, &mut effects)?;
            Ok((entry.right.kind(), entry.right.user_refs().get()))
        })();
        self.run_effects(effects);
        result
    }

    /// Check whether a name currently resolves to a live entry.
    ///
    /// Stale and absent names both report `false`; only space
    /// teardown is an error.
    pub fn inuse(&self, space: &Space, name: Name) -> IpcResult<bool> {
        let mut inner = space.lock_active()?;
        match inner.lookup(name) {
            Ok(_) => Ok(true),
            Err(IpcError::NameNotFound | IpcError::InvalidName) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Back-lookup: the name a port's coalesced send/receive right is
    /// held under, if any. Used by the notification path to find the
    /// name that must be told a port died.
    pub fn reverse(&self, space: &Space, port: PortRef) -> IpcResult<Option<Name>> {
        let inner = space.lock_active()?;
        Ok(inner.reverse_lookup(port))
    }

    /// Atomically move an entry from `old` to `new`.
    ///
    /// The destination, including other generations of its index, must
    /// be unoccupied. A deferred-send record follows the rename; a
    /// registered dead-name request stays with the entry and later
    /// fires under the new name.
    pub fn rename(&self, space: &Space, old: Name, new: Name) -> IpcResult<()> {
        let mut effects = Effects::default();
        let result = self.rename_locked(space, old, new, &mut effects);
        self.run_effects(effects);
        result
    }

    fn rename_locked(
        &self,
        space: &Space,
        old: Name,
        new: Name,
        effects: &mut Effects,
    ) -> IpcResult<()> {
        if old == new {
            return Err(IpcError::NameInUse);
        }
        if !index_in_range(new.index) {
            return Err(IpcError::InvalidName);
        }
        let space_id = space.id();
        let mut inner = space.lock_active()?;
        let entry = self.resolve_checked(space_id, &mut inner, old, effects)?;
        if !inner.name_available(new) {
            return Err(IpcError::NameInUse);
        }
        // Reserve tree storage up front so the move cannot fail
        // between remove and install.
        if new.index >= inner.table.size() {
            inner.tree.reserve_nodes(1)?;
        }
        // Re-key the deferred-send record first; it is the only
        // remaining fallible step.
        if entry.marequest {
            self.marequests.rename(space_id, old, new)?;
        }
        if inner.remove(old).is_none() {
            panic!("entry vanished while locked");
        }
        match inner.install_at(new, entry) {
            Ok(()) => Ok(()),
            Err(_) => panic!("rename destination vanished"),
        }
    }

    // ------------------------------------------------------------------
    // notifications / deferred sends

    /// Register a dead-name notification request against a name,
    /// returning the previously registered request (null if none).
    ///
    /// At most one request is pending per entry. Registering against a
    /// name that is already dead fails with [`IpcError::InvalidRight`];
    /// the caller already knows the outcome it asked to be told about.
    pub fn request_register(
        &self,
        space: &Space,
        name: Name,
        request: RequestId,
    ) -> IpcResult<RequestId> {
        let mut effects = Effects::default();
        let result = (|| {
            let mut inner = space.lock_active()?;
            let mut entry = self.resolve_checked(space.id(), &mut inner, name, &mut effects)?;
            if matches!(entry.right, Right::DeadName { .. }) {
                return Err(IpcError::InvalidRight);
            }
            let previous = entry.request;
            entry.request = request;
            inner.put(name, entry);
            Ok(previous)
        })();
        self.run_effects(effects);
        result
    }

    /// Record a deferred-send request against a name holding send
    /// references. The registry takes over the caller's reference on
    /// `notify`; on error the reference stays with the caller.
    pub fn marequest_create(&self, space: &Space, name: Name, notify: PortRef) -> IpcResult<()> {
        let mut effects = Effects::default();
        let result = (|| {
            let mut inner = space.lock_active()?;
            let mut entry = self.resolve_checked(space.id(), &mut inner, name, &mut effects)?;
            if !entry.right.has_send() {
                return Err(IpcError::InvalidRight);
            }
            if entry.marequest {
                return Err(IpcError::AlreadyPending);
            }
            self.marequests.create(space.id(), name, notify)?;
            entry.marequest = true;
            inner.put(name, entry);
            Ok(())
        })();
        self.run_effects(effects);
        result
    }

    /// Cancel the deferred-send record for a name, releasing its
    /// notify-port reference. Returns whether a record existed.
    pub fn marequest_cancel(&self, space: &Space, name: Name) -> IpcResult<bool> {
        let mut effects = Effects::default();
        let result = (|| {
            let mut inner = space.lock_active()?;
            let mut entry = self.resolve_checked(space.id(), &mut inner, name, &mut effects)?;
            if !entry.marequest {
                return Ok(false);
            }
            entry.marequest = false;
            inner.put(name, entry);
            if let Some(req) = self.marequests.cancel(space.id(), name) {
                effects.release_notify = Some(req.notify);
            }
            Ok(true)
        })();
        self.run_effects(effects);
        result
    }

    // ------------------------------------------------------------------
    // space lifecycle / bulk introspection

    /// Tear a space down: deactivate it, then destroy every live
    /// entry.
    ///
    /// Port references are released and unconsumed send-once rights
    /// fire their notification, but no port-deleted or dead-name
    /// notifications are delivered to the dying space itself.
    /// Idempotent; a second call returns immediately.
    pub fn space_destroy(&self, space: &Space) {
        if !space.deactivate() {
            return;
        }
        let space_id = space.id();
        let mut cursor = 0u32;
        loop {
            let mut inner = space.lock();
            let mut item = None;
            while item.is_none() && cursor < inner.table.size() {
                let index = cursor;
                cursor += 1;
                if let Some(entry) = inner.table.get(index) {
                    if !entry.is_free() {
                        let name = Name::new(index, entry.gen);
                        item = inner.remove(name).map(|removed| (name, removed));
                    }
                }
            }
            if item.is_none() {
                if let Some((name, _)) = inner.tree.pick() {
                    item = inner.remove(name).map(|removed| (name, removed));
                }
            }
            drop(inner);

            let Some((name, entry)) = item else {
                break;
            };
            if entry.marequest {
                if let Some(req) = self.marequests.cancel(space_id, name) {
                    self.ports.release(req.notify);
                }
            }
            match entry.right {
                Right::SendOnce => {
                    self.notify.send_once(entry.object);
                    self.ports.release(entry.object);
                }
                _ if entry.object.is_valid() => self.ports.release(entry.object),
                _ => {}
            }
        }
    }

    /// Snapshot every live entry for diagnostics.
    pub fn dump(&self, space: &Space) -> IpcResult<Vec<NameDump>> {
        let inner = space.lock_active()?;
        let mut out = Vec::new();
        out.try_reserve(inner.live_total() as usize)
            .map_err(|_| IpcError::ResourceShortage)?;
        inner.for_each_live(|name, entry| {
            out.push(NameDump {
                name: name.to_raw(),
                kind: entry.right.kind(),
                refs: entry.right.user_refs().get(),
            });
        });
        Ok(out)
    }
}
