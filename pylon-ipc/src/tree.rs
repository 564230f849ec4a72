//! Sparse entry tree
//!
//! Entries whose index falls beyond the dense table live in a splay
//! tree keyed by full name. Splay trees self-adjust on every access,
//! moving recently used names toward the root, so no separate
//! rebalancing pass exists.
//!
//! # Storage
//!
//! Nodes live in an arena addressed by stable [`NodeId`] handles, with
//! the tree linkage stored alongside the entry payload. Split and join
//! are node moves between arenas rather than pointer surgery on a
//! self-referential structure.
//!
//! # Concurrency
//!
//! No operation here is thread-safe; every call, including read-style
//! lookups (which splay), happens under the owning space's lock.

use alloc::vec::Vec;

use crate::entry::Entry;
use crate::error::{IpcError, IpcResult};
use crate::name::Name;

/// Tree node index (into the node arena).
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Null node (no child / empty tree).
    pub const NULL: Self = Self(0);

    /// Check if this is a null node.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a valid (non-null) node.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl core::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_null() {
            write!(f, "NodeId::NULL")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    name: Name,
    entry: Entry,
    left: NodeId,
    right: NodeId,
}

#[derive(Clone, Debug)]
enum NodeSlot {
    /// On the arena free list.
    Free { next: NodeId },
    /// Holds a live node.
    Used(Node),
}

/// A splay tree of capability entries keyed by full name.
pub struct SplayTree {
    /// Arena slot 0 is a permanently free sentinel so that
    /// [`NodeId::NULL`] never addresses a live node.
    slots: Vec<NodeSlot>,
    free: NodeId,
    free_count: u32,
    root: NodeId,
    total: u32,
}

impl SplayTree {
    /// Create an empty tree. Allocates nothing until the first insert.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: NodeId::NULL,
            free_count: 0,
            root: NodeId::NULL,
            total: 0,
        }
    }

    /// Number of entries in the tree.
    #[inline]
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Check if the tree holds no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn node(&self, id: NodeId) -> &Node {
        match &self.slots[id.0 as usize] {
            NodeSlot::Used(node) => node,
            NodeSlot::Free { .. } => panic!("tree node is free"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.slots[id.0 as usize] {
            NodeSlot::Used(node) => node,
            NodeSlot::Free { .. } => panic!("tree node is free"),
        }
    }

    /// Ensure capacity for `extra` more nodes.
    ///
    /// Reserving up front lets multi-node operations (split, join)
    /// run to completion once started, keeping failure all-or-nothing.
    pub fn reserve_nodes(&mut self, extra: usize) -> IpcResult<()> {
        let needed = extra.saturating_sub(self.free_count as usize);
        if needed == 0 {
            return Ok(());
        }
        // One extra slot for the sentinel on first use.
        let sentinel = usize::from(self.slots.is_empty());
        self.slots
            .try_reserve(needed + sentinel)
            .map_err(|_| IpcError::ResourceShortage)?;
        Ok(())
    }

    fn alloc_node(&mut self, name: Name, entry: Entry) -> IpcResult<NodeId> {
        let node = Node {
            name,
            entry,
            left: NodeId::NULL,
            right: NodeId::NULL,
        };
        if self.free.is_valid() {
            let id = self.free;
            self.free = match self.slots[id.0 as usize] {
                NodeSlot::Free { next } => next,
                NodeSlot::Used(_) => panic!("used node on free list"),
            };
            self.free_count -= 1;
            self.slots[id.0 as usize] = NodeSlot::Used(node);
            return Ok(id);
        }
        self.reserve_nodes(1)?;
        if self.slots.is_empty() {
            self.slots.push(NodeSlot::Free { next: NodeId::NULL });
        }
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(NodeSlot::Used(node));
        Ok(id)
    }

    fn free_node(&mut self, id: NodeId) -> Node {
        let slot = core::mem::replace(
            &mut self.slots[id.0 as usize],
            NodeSlot::Free { next: self.free },
        );
        self.free = id;
        self.free_count += 1;
        match slot {
            NodeSlot::Used(node) => node,
            NodeSlot::Free { .. } => panic!("double free of tree node"),
        }
    }

    /// Top-down splay: after this, the root is either the node with
    /// `key` or the last node touched on the search path for it.
    fn splay(&mut self, key: Name) {
        let mut t = self.root;
        if t.is_null() {
            return;
        }
        let mut left_head = NodeId::NULL;
        let mut left_tail = NodeId::NULL;
        let mut right_head = NodeId::NULL;
        let mut right_tail = NodeId::NULL;

        loop {
            let t_name = self.node(t).name;
            if key < t_name {
                let mut child = self.node(t).left;
                if child.is_null() {
                    break;
                }
                if key < self.node(child).name {
                    // Zig-zig: rotate right.
                    let grandchild = self.node(child).right;
                    self.node_mut(t).left = grandchild;
                    self.node_mut(child).right = t;
                    t = child;
                    child = self.node(t).left;
                    if child.is_null() {
                        break;
                    }
                }
                // Link t as the new minimum of the right assembly.
                if right_tail.is_null() {
                    right_head = t;
                } else {
                    self.node_mut(right_tail).left = t;
                }
                right_tail = t;
                t = child;
            } else if key > t_name {
                let mut child = self.node(t).right;
                if child.is_null() {
                    break;
                }
                if key > self.node(child).name {
                    // Zig-zig: rotate left.
                    let grandchild = self.node(child).left;
                    self.node_mut(t).right = grandchild;
                    self.node_mut(child).left = t;
                    t = child;
                    child = self.node(t).right;
                    if child.is_null() {
                        break;
                    }
                }
                // Link t as the new maximum of the left assembly.
                if left_tail.is_null() {
                    left_head = t;
                } else {
                    self.node_mut(left_tail).right = t;
                }
                left_tail = t;
                t = child;
            } else {
                break;
            }
        }

        // Reassemble around the new root.
        let t_left = self.node(t).left;
        let t_right = self.node(t).right;
        if left_tail.is_valid() {
            self.node_mut(left_tail).right = t_left;
            self.node_mut(t).left = left_head;
        }
        if right_tail.is_valid() {
            self.node_mut(right_tail).left = t_right;
            self.node_mut(t).right = right_head;
        }
        self.root = t;
    }

    /// Look up an entry by exact name, splaying it toward the root.
    pub fn lookup(&mut self, name: Name) -> Option<&Entry> {
        if self.root.is_null() {
            return None;
        }
        self.splay(name);
        let root = self.node(self.root);
        (root.name == name).then(|| &root.entry)
    }

    /// Look up an entry by exact name for mutation.
    pub fn lookup_mut(&mut self, name: Name) -> Option<&mut Entry> {
        if self.root.is_null() {
            return None;
        }
        self.splay(name);
        let root_id = self.root;
        if self.node(root_id).name == name {
            Some(&mut self.node_mut(root_id).entry)
        } else {
            None
        }
    }

    /// Insert an entry under a name not currently present.
    pub fn insert(&mut self, name: Name, entry: Entry) -> IpcResult<()> {
        let id = self.alloc_node(name, entry)?;
        if self.root.is_null() {
            self.root = id;
            self.total += 1;
            return Ok(());
        }
        self.splay(name);
        let root_id = self.root;
        let root_name = self.node(root_id).name;
        if root_name == name {
            self.free_node(id);
            return Err(IpcError::NameInUse);
        }
        if name < root_name {
            let root_left = self.node(root_id).left;
            self.node_mut(id).left = root_left;
            self.node_mut(id).right = root_id;
            self.node_mut(root_id).left = NodeId::NULL;
        } else {
            let root_right = self.node(root_id).right;
            self.node_mut(id).right = root_right;
            self.node_mut(id).left = root_id;
            self.node_mut(root_id).right = NodeId::NULL;
        }
        self.root = id;
        self.total += 1;
        Ok(())
    }

    /// Remove an entry by exact name.
    pub fn remove(&mut self, name: Name) -> Option<Entry> {
        if self.root.is_null() {
            return None;
        }
        self.splay(name);
        if self.node(self.root).name != name {
            return None;
        }
        let old_root = self.root;
        let left = self.node(old_root).left;
        let right = self.node(old_root).right;
        let node = self.free_node(old_root);
        if left.is_null() {
            self.root = right;
        } else {
            // Splaying the left subtree toward the removed key brings
            // its maximum to the root with an empty right child.
            self.root = left;
            self.splay(name);
            self.node_mut(self.root).right = right;
        }
        self.total -= 1;
        Some(node.entry)
    }

    /// An arbitrary resident entry, for eviction-style callers.
    ///
    /// Returns the current root: the most recently touched name, which
    /// is as good a random candidate as any without extra bookkeeping.
    #[must_use]
    pub fn pick(&self) -> Option<(Name, Entry)> {
        if self.root.is_null() {
            return None;
        }
        let root = self.node(self.root);
        Some((root.name, root.entry))
    }

    /// Largest name in the tree, without splaying.
    #[must_use]
    pub fn max_name(&self) -> Option<Name> {
        let mut t = self.root;
        if t.is_null() {
            return None;
        }
        loop {
            let right = self.node(t).right;
            if right.is_null() {
                return Some(self.node(t).name);
            }
            t = right;
        }
    }

    fn subtree_min(&self, mut t: NodeId) -> Option<Name> {
        if t.is_null() {
            return None;
        }
        loop {
            let left = self.node(t).left;
            if left.is_null() {
                return Some(self.node(t).name);
            }
            t = left;
        }
    }

    fn subtree_max(&self, mut t: NodeId) -> Option<Name> {
        if t.is_null() {
            return None;
        }
        loop {
            let right = self.node(t).right;
            if right.is_null() {
                return Some(self.node(t).name);
            }
            t = right;
        }
    }

    /// Bounded lookup: the tightest existing keys surrounding `name`.
    ///
    /// If `name` itself is present both bounds equal `name`. Used to
    /// probe neighbourhood occupancy when deciding growth economics
    /// and to detect index twins under different generations.
    pub fn bounds(&mut self, name: Name) -> (Option<Name>, Option<Name>) {
        if self.root.is_null() {
            return (None, None);
        }
        self.splay(name);
        let root = self.node(self.root);
        if root.name == name {
            (Some(name), Some(name))
        } else if root.name < name {
            (Some(root.name), self.subtree_min(root.right))
        } else {
            (self.subtree_max(root.left), Some(root.name))
        }
    }

    /// Remove and return the smallest entry.
    pub fn pop_min(&mut self) -> Option<(Name, Entry)> {
        if self.root.is_null() {
            return None;
        }
        self.splay(Name::MIN);
        let old_root = self.root;
        debug_assert!(self.node(old_root).left.is_null());
        let right = self.node(old_root).right;
        let node = self.free_node(old_root);
        self.root = right;
        self.total -= 1;
        Some((node.name, node.entry))
    }

    /// Remove the smallest entry if its name is strictly below
    /// `boundary`.
    ///
    /// Frees an arena node but never allocates, so it is safe to call
    /// in a loop under the space lock when migrating entries into a
    /// grown table.
    pub fn pop_below(&mut self, boundary: Name) -> Option<(Name, Entry)> {
        let min = self.subtree_min_name()?;
        if min >= boundary {
            return None;
        }
        self.pop_min()
    }

    /// Count entries with names strictly below `boundary`.
    #[must_use]
    pub fn count_below(&self, boundary: Name) -> u32 {
        let mut count = 0;
        self.in_order(|name, _| {
            if name < boundary {
                count += 1;
            }
        });
        count
    }

    /// Split off every entry with a name strictly below `boundary`.
    ///
    /// The returned tree holds the lower-keyed entries in their own
    /// arena. Storage for the split is reserved up front, so a
    /// [`IpcError::ResourceShortage`] leaves this tree untouched.
    pub fn split_below(&mut self, boundary: Name) -> IpcResult<SplayTree> {
        let moving = self.count_below(boundary) as usize;
        let mut lower = SplayTree::new();
        lower.reserve_nodes(moving)?;
        while let Some(min) = self.subtree_min_name() {
            if min >= boundary {
                break;
            }
            match self.pop_min() {
                Some((name, entry)) => lower.insert(name, entry)?,
                None => break,
            }
        }
        Ok(lower)
    }

    /// Merge a tree whose every name is below this tree's minimum.
    pub fn join(&mut self, mut lower: SplayTree) -> IpcResult<()> {
        debug_assert!(match (lower.max_name(), self.subtree_min_name()) {
            (Some(lo), Some(hi)) => lo < hi,
            _ => true,
        });
        self.reserve_nodes(lower.total() as usize)?;
        while let Some((name, entry)) = lower.pop_min() {
            self.insert(name, entry)?;
        }
        Ok(())
    }

    fn subtree_min_name(&self) -> Option<Name> {
        self.subtree_min(self.root)
    }

    /// In-order traversal over every entry.
    pub fn in_order(&self, mut f: impl FnMut(Name, &Entry)) {
        let mut stack: Vec<NodeId> = Vec::new();
        let mut current = self.root;
        loop {
            while current.is_valid() {
                stack.push(current);
                current = self.node(current).left;
            }
            let Some(id) = stack.pop() else {
                break;
            };
            let node = self.node(id);
            f(node.name, &node.entry);
            current = node.right;
        }
    }

    /// In-order traversal that drains every entry, leaving the tree
    /// empty. Used when migrating entries back into a grown table.
    pub fn drain_in_order(&mut self, mut sink: impl FnMut(Name, Entry)) {
        while let Some((name, entry)) = self.pop_min() {
            sink(name, entry);
        }
    }
}

impl Default for SplayTree {
    fn default() -> Self {
        Self::new()
    }
}
