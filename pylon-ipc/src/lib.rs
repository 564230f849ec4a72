//! Pylon port name space
//!
//! This crate implements the per-task name space that maps small
//! integer names to port capabilities, and the state machine governing
//! how a capability's right is created, copied between tasks,
//! consumed, and destroyed.
//!
//! # Overview
//!
//! A **name** is the integer a task uses to refer to one of its
//! capabilities: an index into per-task storage plus a generation
//! counter that invalidates stale names after slot reuse. A **right**
//! is what the name grants on its port: send, receive, send-once,
//! port-set membership, or the dead-name sentinel left behind when the
//! port is destroyed while references remain.
//!
//! # Storage
//!
//! Each [`Space`] stores its entries in two tiers behind one lock:
//!
//! - [`table`]: a densely packed, growable array indexed directly by
//!   the numeric part of a name; doubles through fixed size classes.
//! - [`tree`]: an arena splay tree keyed by full name, holding entries
//!   beyond the table range; growth migrates entries back into the
//!   enlarged table.
//!
//! # Core Types
//!
//! - [`Name`] / [`Generation`]: the unpacked name representation
//! - [`Entry`] / [`Right`] / [`UserRefs`]: one capability slot
//! - [`Space`]: the per-task container
//! - [`RightsEngine`]: copy-in, copy-out, delta, destroy, rename
//! - [`MarequestTable`]: deferred-send registrations
//!
//! # Kernel Integration
//!
//! This crate defines the naming logic; the kernel provides the port
//! layer and notification delivery behind the [`PortOps`] and
//! [`NotifyDispatch`] traits, injected into the [`RightsEngine`] at
//! construction. Each notification fires at most once per triggering
//! transition.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// Module declarations
mod entry;
mod error;
pub mod marequest;
mod name;
mod object;
pub mod rights;
pub mod space;
pub mod table;
pub mod tree;

// Re-exports for convenient access
pub use entry::{Entry, Right, UserRefs};
pub use error::{IpcError, IpcResult};
pub use marequest::{Marequest, MarequestTable};
pub use name::{index_in_range, Generation, Name};
pub use object::{NotifyDispatch, PortOps, PortRef, RequestId};
pub use rights::{CopiedCap, Copyin, CopyoutResult, RightsEngine, TransferKind};
pub use space::{Space, SpaceId};
pub use table::{EntryTable, TABLE_SIZES};
pub use tree::SplayTree;
