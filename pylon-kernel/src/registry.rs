//! Global space registry
//!
//! Maps small integer handles to live spaces. The kernel hands a
//! handle to each task at creation and resolves it on every call; the
//! registry owns one `Arc` reference per registered space, dropped
//! when the space is unregistered after teardown.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::{Mutex, Once};

use pylon_ipc::Space;

/// Maximum number of concurrently registered spaces.
pub const MAX_SPACES: usize = 1024;

/// Handle to a registered space.
///
/// Handle 0 is reserved as the null handle; valid handles encode the
/// registry slot index plus one.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct SpaceHandle(u32);

impl SpaceHandle {
    /// Null handle (no space).
    pub const NULL: Self = Self(0);

    /// Create a handle from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn slot(self) -> Option<usize> {
        if self.0 == 0 || self.0 as usize > MAX_SPACES {
            None
        } else {
            Some(self.0 as usize - 1)
        }
    }
}

impl fmt::Debug for SpaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "SpaceHandle::NULL")
        } else {
            write!(f, "SpaceHandle({})", self.0)
        }
    }
}

struct Registry {
    slots: Mutex<Vec<Option<Arc<Space>>>>,
}

static REGISTRY: Once<Registry> = Once::new();

/// Initialise the registry. Idempotent; called once at kernel boot.
pub fn init() {
    REGISTRY.call_once(|| {
        let mut slots = Vec::new();
        slots.resize_with(MAX_SPACES, || None);
        Registry {
            slots: Mutex::new(slots),
        }
    });
    log::info!("space registry initialised ({} slots)", MAX_SPACES);
}

fn registry() -> &'static Registry {
    match REGISTRY.get() {
        Some(registry) => registry,
        None => panic!("space registry not initialised"),
    }
}

/// Register a space, returning its handle.
///
/// Returns `None` when every slot is taken.
pub fn insert(space: Arc<Space>) -> Option<SpaceHandle> {
    let mut slots = registry().slots.lock();
    let index = slots.iter().position(Option::is_none)?;
    slots[index] = Some(space);
    Some(SpaceHandle(index as u32 + 1))
}

/// Resolve a handle to its space.
#[must_use]
pub fn get(handle: SpaceHandle) -> Option<Arc<Space>> {
    let slots = registry().slots.lock();
    slots.get(handle.slot()?)?.clone()
}

/// Unregister a handle, returning the registry's space reference.
pub fn remove(handle: SpaceHandle) -> Option<Arc<Space>> {
    let mut slots = registry().slots.lock();
    let slot = slots.get_mut(handle.slot()?)?;
    slot.take()
}
