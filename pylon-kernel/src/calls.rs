//! Kernel-call surface
//!
//! Raw entry points for capability manipulation. Each call resolves a
//! space handle, converts packed names at the boundary, runs one
//! rights-engine operation, and reports a [`KernReturn`] code. Typed
//! errors exist only below this layer.
//!
//! Single-name calls commit their copy-in immediately; the multi-name
//! message path in the messaging layer drives
//! [`RightsEngine::copyin_undo`] itself when a later name fails.

use alloc::sync::Arc;
use alloc::vec::Vec;

use pylon_abi::{KernReturn, NameDump, RawName, RightKind};
use pylon_ipc::{
    CopiedCap, CopyoutResult, IpcError, MarequestTable, Name, NotifyDispatch, PortOps, PortRef,
    RequestId, RightsEngine, Space, TransferKind,
};

use crate::registry::{self, SpaceHandle};

/// Map a core error onto its kernel-call return code.
const fn code(err: IpcError) -> KernReturn {
    match err {
        IpcError::SpaceInactive => KernReturn::SpaceInactive,
        IpcError::InvalidName => KernReturn::InvalidName,
        IpcError::NameNotFound => KernReturn::NotFound,
        IpcError::InvalidRight => KernReturn::InvalidRight,
        IpcError::UserRefsOverflow => KernReturn::UrefsOverflow,
        IpcError::UserRefsUnderflow => KernReturn::UrefsUnderflow,
        IpcError::NameInUse => KernReturn::NameInUse,
        IpcError::ResourceShortage => KernReturn::NoMemory,
        IpcError::AlreadyPending => KernReturn::AlreadyPending,
    }
}

fn parse(raw: RawName) -> Result<Name, KernReturn> {
    Name::from_raw(raw).ok_or(KernReturn::InvalidName)
}

/// The kernel-call surface, bound to the port layer and notification
/// dispatch at kernel initialisation.
pub struct IpcCalls<'a> {
    engine: RightsEngine<'a>,
}

impl<'a> IpcCalls<'a> {
    /// Bind the call surface to its collaborators.
    #[must_use]
    pub fn new(
        ports: &'a dyn PortOps,
        notify: &'a dyn NotifyDispatch,
        marequests: &'a MarequestTable,
    ) -> Self {
        Self {
            engine: RightsEngine::new(ports, notify, marequests),
        }
    }

    /// Borrow the underlying engine, for the messaging layer's
    /// multi-name transfers.
    #[must_use]
    pub fn engine(&self) -> &RightsEngine<'a> {
        &self.engine
    }

    fn space(&self, handle: SpaceHandle) -> Result<Arc<Space>, KernReturn> {
        registry::get(handle).ok_or(KernReturn::InvalidHandle)
    }

    /// Create a new space and register it.
    pub fn space_create(&self) -> Result<SpaceHandle, KernReturn> {
        let space = Space::create_default().map_err(code)?;
        match registry::insert(Arc::clone(&space)) {
            Some(handle) => {
                log::debug!("space_create: space {} -> {:?}", space.id(), handle);
                Ok(handle)
            }
            None => {
                log::warn!("space_create: registry full");
                self.engine.space_destroy(&space);
                Err(KernReturn::NoMemory)
            }
        }
    }

    /// Tear down a space and unregister its handle.
    pub fn space_destroy(&self, handle: SpaceHandle) -> Result<(), KernReturn> {
        let space = registry::remove(handle).ok_or(KernReturn::InvalidHandle)?;
        log::debug!("space_destroy: space {} ({:?})", space.id(), handle);
        self.engine.space_destroy(&space);
        Ok(())
    }

    /// Copy a name in as an in-flight capability, committing
    /// immediately.
    pub fn copyin(
        &self,
        handle: SpaceHandle,
        raw: RawName,
        kind: TransferKind,
        deadok: bool,
    ) -> Result<CopiedCap, KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        let copyin = self.engine.copyin(&space, name, kind, deadok).map_err(|err| {
            log::trace!("copyin: {} of {} failed: {}", kind, raw, err);
            code(err)
        })?;
        Ok(self.engine.copyin_commit(copyin))
    }

    /// Install a capability at a freshly chosen name.
    ///
    /// Reports the reserved dead encoding when the port died in
    /// flight.
    pub fn copyout(
        &self,
        handle: SpaceHandle,
        port: PortRef,
        kind: RightKind,
    ) -> Result<RawName, KernReturn> {
        let space = self.space(handle)?;
        match self.engine.copyout(&space, port, kind).map_err(code)? {
            CopyoutResult::Named(name) => Ok(name.to_raw()),
            CopyoutResult::Dead => Ok(RawName::DEAD),
        }
    }

    /// Install a capability at a caller-chosen name.
    pub fn copyout_named(
        &self,
        handle: SpaceHandle,
        port: PortRef,
        kind: RightKind,
        raw: RawName,
    ) -> Result<RawName, KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        match self
            .engine
            .copyout_named(&space, port, kind, name)
            .map_err(code)?
        {
            CopyoutResult::Named(name) => Ok(name.to_raw()),
            CopyoutResult::Dead => Ok(RawName::DEAD),
        }
    }

    /// Adjust user references on the right named by `kind`.
    pub fn delta(
        &self,
        handle: SpaceHandle,
        raw: RawName,
        kind: RightKind,
        delta: i32,
    ) -> Result<(), KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine.delta(&space, name, kind, delta).map_err(code)
    }

    /// Unconditionally drop every right held under a name.
    pub fn destroy(&self, handle: SpaceHandle, raw: RawName) -> Result<(), KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine.destroy(&space, name).map_err(code)
    }

    /// Introspect a name: its right kind and user reference count.
    pub fn info(&self, handle: SpaceHandle, raw: RawName) -> Result<(RightKind, u16), KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine.info(&space, name).map_err(code)
    }

    /// Atomically move an entry between two names.
    pub fn rename(
        &self,
        handle: SpaceHandle,
        old: RawName,
        new: RawName,
    ) -> Result<(), KernReturn> {
        let space = self.space(handle)?;
        let old = parse(old)?;
        let new = parse(new)?;
        self.engine.rename(&space, old, new).map_err(code)
    }

    /// Check whether a name resolves to a live entry.
    pub fn inuse(&self, handle: SpaceHandle, raw: RawName) -> Result<bool, KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine.inuse(&space, name).map_err(code)
    }

    /// Back-lookup the coalesced name a port is known by. Reports the
    /// null encoding when the space holds no such right.
    pub fn reverse(&self, handle: SpaceHandle, port: PortRef) -> Result<RawName, KernReturn> {
        let space = self.space(handle)?;
        match self.engine.reverse(&space, port).map_err(code)? {
            Some(name) => Ok(name.to_raw()),
            None => Ok(RawName::NULL),
        }
    }

    /// Register a dead-name notification request, returning the
    /// previously registered one.
    pub fn request_register(
        &self,
        handle: SpaceHandle,
        raw: RawName,
        request: RequestId,
    ) -> Result<RequestId, KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine
            .request_register(&space, name, request)
            .map_err(code)
    }

    /// Record a deferred-send request against a name.
    pub fn marequest_create(
        &self,
        handle: SpaceHandle,
        raw: RawName,
        notify: PortRef,
    ) -> Result<(), KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine
            .marequest_create(&space, name, notify)
            .map_err(code)
    }

    /// Cancel a deferred-send request; reports whether one existed.
    pub fn marequest_cancel(
        &self,
        handle: SpaceHandle,
        raw: RawName,
    ) -> Result<bool, KernReturn> {
        let space = self.space(handle)?;
        let name = parse(raw)?;
        self.engine.marequest_cancel(&space, name).map_err(code)
    }

    /// Snapshot every live entry of a space for diagnostics.
    pub fn space_dump(&self, handle: SpaceHandle) -> Result<Vec<NameDump>, KernReturn> {
        let space = self.space(handle)?;
        let dump = self.engine.dump(&space).map_err(code)?;
        log::trace!(
            "space_dump: space {} has {} live entries",
            space.id(),
            dump.len()
        );
        Ok(dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use spin::Mutex;

    struct NullPorts {
        counts: Mutex<BTreeMap<u32, i64>>,
    }

    impl NullPorts {
        fn new() -> Self {
            Self {
                counts: Mutex::new(BTreeMap::new()),
            }
        }

        fn cap(&self, index: u32) -> PortRef {
            let port = PortRef::from_index(index);
            *self.counts.lock().entry(index).or_insert(0) += 1;
            port
        }

        fn refs(&self, port: PortRef) -> i64 {
            *self.counts.lock().get(&port.index()).unwrap_or(&0)
        }
    }

    impl PortOps for NullPorts {
        fn reference(&self, port: PortRef) {
            *self.counts.lock().entry(port.index()).or_insert(0) += 1;
        }

        fn release(&self, port: PortRef) {
            *self.counts.lock().entry(port.index()).or_insert(0) -= 1;
        }

        fn is_destroyed(&self, _port: PortRef) -> bool {
            false
        }
    }

    struct NullNotify;

    impl NotifyDispatch for NullNotify {
        fn port_deleted(&self, _space: pylon_ipc::SpaceId, _name: RawName) {}
        fn dead_name(&self, _space: pylon_ipc::SpaceId, _name: RawName) {}
        fn no_senders(&self, _port: PortRef, _mscount: u32) {}
        fn send_once(&self, _port: PortRef) {}
    }

    #[test]
    fn test_call_roundtrip() {
        registry::init();
        let ports = NullPorts::new();
        let notify = NullNotify;
        let marequests = MarequestTable::new();
        let calls = IpcCalls::new(&ports, &notify, &marequests);

        let handle = calls.space_create().unwrap();
        let raw = calls
            .copyout(handle, ports.cap(3), RightKind::Send)
            .unwrap();
        assert_ne!(raw, RawName::NULL);
        assert_eq!(calls.info(handle, raw).unwrap(), (RightKind::Send, 1));
        assert!(calls.inuse(handle, raw).unwrap());
        assert_eq!(
            calls.reverse(handle, PortRef::from_index(3)).unwrap(),
            raw
        );

        calls.destroy(handle, raw).unwrap();
        assert!(!calls.inuse(handle, raw).unwrap());
        assert_eq!(ports.refs(PortRef::from_index(3)), 0);

        calls.space_destroy(handle).unwrap();
        assert_eq!(
            calls.info(handle, raw).unwrap_err(),
            KernReturn::InvalidHandle
        );
    }

    #[test]
    fn test_reserved_encodings_rejected() {
        registry::init();
        let ports = NullPorts::new();
        let notify = NullNotify;
        let marequests = MarequestTable::new();
        let calls = IpcCalls::new(&ports, &notify, &marequests);

        let handle = calls.space_create().unwrap();
        assert_eq!(
            calls.info(handle, RawName::NULL).unwrap_err(),
            KernReturn::InvalidName
        );
        assert_eq!(
            calls.destroy(handle, RawName::DEAD).unwrap_err(),
            KernReturn::InvalidName
        );
        calls.space_destroy(handle).unwrap();
    }

    #[test]
    fn test_invalid_handle() {
        registry::init();
        let ports = NullPorts::new();
        let notify = NullNotify;
        let marequests = MarequestTable::new();
        let calls = IpcCalls::new(&ports, &notify, &marequests);

        assert_eq!(
            calls.space_destroy(SpaceHandle::NULL).unwrap_err(),
            KernReturn::InvalidHandle
        );
        assert_eq!(
            calls.inuse(SpaceHandle::from_raw(9999), RawName::NULL).unwrap_err(),
            KernReturn::InvalidHandle
        );
    }
}
