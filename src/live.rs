// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The live tree: the arena that backs the running devicetree.
//!
//! Unlike [`crate::model::DeviceTree`], nodes here have parents, phandles,
//! flags and reference counts, and are addressed by [`NodeId`] rather than
//! borrowed. Only [`crate::primitive`] is expected to mutate topology or
//! property storage once a tree has been promoted into this form.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use indexmap::IndexMap;
use twox_hash::xxhash64;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty};

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

fn new_index_map<V>() -> IndexMap<String, V, xxhash64::State> {
    IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe))
}

/// A generation-checked handle to a node in a [`LiveTree`] arena.
///
/// A freed arena slot bumps its generation before it can be reused, so a
/// stale `NodeId` can never alias whatever gets allocated into that slot
/// next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// The boolean flags a live node carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// The node's storage is heap-owned (as opposed to static/built-in).
    pub dynamic: bool,
    /// The node is not currently linked into the tree from the root.
    pub detached: bool,
    /// The node was created by an overlay, not by the base tree.
    pub overlay: bool,
}

#[derive(Debug)]
struct LiveNode {
    name: String,
    phandle: Option<u32>,
    flags: NodeFlags,
    refcount: u32,
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId, xxhash64::State>,
    properties: IndexMap<String, DeviceTreeProperty, xxhash64::State>,
}

struct Slot {
    generation: u32,
    node: Option<LiveNode>,
}

/// The live-tree arena: every node is addressed by [`NodeId`], never by
/// reference, so the tree can hold non-owning parent back-references
/// without any borrow-checker gymnastics.
#[derive(Debug)]
pub struct LiveTree {
    arena: Vec<Slot>,
    free_list: Vec<u32>,
    root: NodeId,
    phandle_index: IndexMap<u32, NodeId, xxhash64::State>,
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slot")
            .field("generation", &self.generation)
            .field("occupied", &self.node.is_some())
            .finish()
    }
}

impl LiveTree {
    /// Promotes a freshly-decoded [`DeviceTree`] into arena form. Every node
    /// starts out attached (the base tree has no detached staging state).
    #[must_use]
    pub fn from_device_tree(tree: &DeviceTree) -> Self {
        let mut live = LiveTree {
            arena: Vec::new(),
            free_list: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            phandle_index: IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe)),
        };
        live.root = live.promote(tree.root(), None);
        live
    }

    fn promote(&mut self, node: &DeviceTreeNode, parent: Option<NodeId>) -> NodeId {
        let basename = node.name().to_string();
        let phandle = node.property("phandle").and_then(|p| p.as_u32().ok());
        let mut properties = new_index_map();
        for prop in node.properties() {
            properties.insert(prop.name().to_string(), prop.clone());
        }
        let id = self.push(LiveNode {
            name: basename.clone(),
            phandle,
            flags: NodeFlags::default(),
            refcount: 1,
            parent,
            children: new_index_map(),
            properties,
        });
        if let Some(ph) = phandle {
            self.phandle_index.insert(ph, id);
        }
        if let Some(parent_id) = parent {
            if let Ok(parent_node) = self.get_mut(parent_id) {
                parent_node.children.insert(basename, id);
            }
        }
        for child in node.children() {
            self.promote(child, Some(id));
        }
        id
    }

    /// Converts the live tree back into an owned, parent-less [`DeviceTree`]
    /// for comparison or serialization.
    #[must_use]
    pub fn to_device_tree(&self) -> DeviceTree {
        DeviceTree::new(self.to_device_tree_node(self.root))
    }

    fn to_device_tree_node(&self, id: NodeId) -> DeviceTreeNode {
        let node = self
            .get(id)
            .expect("live tree arena is internally consistent");
        let mut builder = DeviceTreeNode::builder(node.name.clone());
        for prop in node.properties.values() {
            builder = builder.property(prop.clone());
        }
        for &child_id in node.children.values() {
            builder = builder.child(self.to_device_tree_node(child_id));
        }
        builder.build()
    }

    fn push(&mut self, node: LiveNode) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.arena[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.arena.len()).expect("arena index exceeds u32");
            self.arena.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn free(&mut self, id: NodeId) -> Result<(), OverlayError> {
        let phandle = self.get(id)?.phandle;
        let slot = self
            .arena
            .get_mut(id.index as usize)
            .ok_or_else(|| invalid("invalid node handle"))?;
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        if let Some(ph) = phandle {
            self.phandle_index.shift_remove(&ph);
        }
        Ok(())
    }

    fn get(&self, id: NodeId) -> Result<&LiveNode, OverlayError> {
        let slot = self
            .arena
            .get(id.index as usize)
            .ok_or_else(|| invalid("invalid node handle"))?;
        if slot.generation != id.generation {
            return Err(invalid("stale node handle"));
        }
        slot.node.as_ref().ok_or_else(|| invalid("stale node handle"))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut LiveNode, OverlayError> {
        let slot = self
            .arena
            .get_mut(id.index as usize)
            .ok_or_else(|| invalid("invalid node handle"))?;
        if slot.generation != id.generation {
            return Err(invalid("stale node handle"));
        }
        slot.node.as_mut().ok_or_else(|| invalid("stale node handle"))
    }

    /// Returns the id of the root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Allocates a new node into the arena with the DETACHED flag set and no
    /// parent link. It exists, and can be referenced by later steps of the
    /// same changeset build, before `ATTACH_NODE` makes it visible from the
    /// root.
    pub(crate) fn allocate_detached(
        &mut self,
        basename: impl Into<String>,
        phandle: Option<u32>,
        flags: NodeFlags,
    ) -> NodeId {
        let id = self.push(LiveNode {
            name: basename.into(),
            phandle,
            flags: NodeFlags {
                detached: true,
                ..flags
            },
            refcount: 1,
            parent: None,
            children: new_index_map(),
            properties: new_index_map(),
        });
        if let Some(ph) = phandle {
            self.phandle_index.insert(ph, id);
        }
        id
    }

    /// Clears DETACHED and links `id` into `parent`'s child map. The exact
    /// inverse of [`LiveTree::detach`].
    pub(crate) fn attach(&mut self, id: NodeId, parent: NodeId) -> Result<(), OverlayError> {
        let basename = self.get(id)?.name.clone();
        {
            let node = self.get_mut(id)?;
            if !node.flags.detached {
                return Err(invalid("node is already attached"));
            }
            node.flags.detached = false;
            node.parent = Some(parent);
        }
        self.get_mut(parent)?.children.insert(basename, id);
        Ok(())
    }

    /// Unlinks `id` from its parent's child map and sets DETACHED. The exact
    /// inverse of [`LiveTree::attach`].
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(), OverlayError> {
        let (parent, basename) = {
            let node = self.get(id)?;
            (
                node.parent.ok_or_else(|| invalid("node has no parent to detach from"))?,
                node.name.clone(),
            )
        };
        {
            let node = self.get_mut(id)?;
            node.flags.detached = true;
            node.parent = None;
        }
        self.get_mut(parent)?.children.shift_remove(&basename);
        Ok(())
    }

    /// Increments the reference count of `id`.
    pub(crate) fn retain(&mut self, id: NodeId) -> Result<(), OverlayError> {
        self.get_mut(id)?.refcount += 1;
        Ok(())
    }

    /// Decrements the reference count of `id`, freeing its arena slot once
    /// it reaches zero. Freeing an attached node is a programming error.
    pub(crate) fn release(&mut self, id: NodeId) -> Result<(), OverlayError> {
        let node = self.get_mut(id)?;
        if node.refcount == 0 {
            return Err(invalid("refcount underflow on release"));
        }
        node.refcount -= 1;
        if node.refcount != 0 {
            return Ok(());
        }
        if !self.get(id)?.flags.detached {
            return Err(invalid("cannot free a node still attached to the tree"));
        }
        self.free(id)
    }

    /// Returns the live-tree path of `id` (e.g. `/bus/dev@0`); the root is
    /// `/`.
    #[must_use]
    pub fn node_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            if current == self.root {
                break;
            }
            let Ok(node) = self.get(current) else { break };
            segments.push(node.name.clone());
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        segments.reverse();
        let mut path = String::from("/");
        path.push_str(&segments.join("/"));
        path
    }

    /// Resolves an absolute path to a [`NodeId`].
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        if !path.starts_with('/') {
            return None;
        }
        let mut current = self.root;
        if path == "/" {
            return Some(current);
        }
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = *self.get(current).ok()?.children.get(segment)?;
        }
        Some(current)
    }

    /// Looks up a node by its phandle.
    #[must_use]
    pub fn find_by_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandle_index.get(&phandle).copied()
    }

    /// Returns the largest phandle currently assigned in this tree, or
    /// `None` if no node declares one.
    #[must_use]
    pub fn max_phandle(&self) -> Option<u32> {
        self.phandle_index.keys().copied().max()
    }

    pub(crate) fn find_child_by_basename(
        &self,
        id: NodeId,
        name: &str,
    ) -> Result<Option<NodeId>, OverlayError> {
        Ok(self.get(id)?.children.get(name).copied())
    }

    pub(crate) fn property(
        &self,
        id: NodeId,
        name: &str,
    ) -> Result<Option<&DeviceTreeProperty>, OverlayError> {
        Ok(self.get(id)?.properties.get(name))
    }

    pub(crate) fn phandle(&self, id: NodeId) -> Result<Option<u32>, OverlayError> {
        Ok(self.get(id)?.phandle)
    }

    /// Returns the current flags of `id`.
    pub fn flags(&self, id: NodeId) -> Result<NodeFlags, OverlayError> {
        Ok(self.get(id)?.flags)
    }

    pub(crate) fn add_property(
        &mut self,
        id: NodeId,
        property: DeviceTreeProperty,
    ) -> Result<(), OverlayError> {
        self.get_mut(id)?
            .properties
            .insert(property.name().to_string(), property);
        Ok(())
    }

    pub(crate) fn update_property(
        &mut self,
        id: NodeId,
        property: DeviceTreeProperty,
    ) -> Result<(), OverlayError> {
        self.get_mut(id)?
            .properties
            .insert(property.name().to_string(), property);
        Ok(())
    }

    pub(crate) fn remove_property(
        &mut self,
        id: NodeId,
        name: &str,
    ) -> Result<Option<DeviceTreeProperty>, OverlayError> {
        Ok(self.get_mut(id)?.properties.shift_remove(name))
    }

    /// Returns whether `maybe_ancestor` is `node` itself or one of its
    /// ancestors, walking parent links rather than comparing path strings
    /// (path strings can be ambiguous under Open Firmware naming).
    #[must_use]
    pub fn is_ancestor_or_equal(&self, maybe_ancestor: NodeId, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == maybe_ancestor {
                return true;
            }
            let Ok(n) = self.get(current) else { return false };
            match n.parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceTreeProperty;

    fn sample_tree() -> DeviceTree {
        let root = DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("a")
                    .property(DeviceTreeProperty::new("phandle", 1u32.to_be_bytes()))
                    .child(DeviceTreeNode::builder("b").build())
                    .build(),
            )
            .build();
        DeviceTree::new(root)
    }

    #[test]
    fn promotes_and_finds_nodes_by_path() {
        let tree = sample_tree();
        let live = LiveTree::from_device_tree(&tree);
        let a = live.find_node("/a").expect("/a should exist");
        let b = live.find_node("/a/b").expect("/a/b should exist");
        assert_eq!(live.node_path(a), "/a");
        assert_eq!(live.node_path(b), "/a/b");
        assert!(live.is_ancestor_or_equal(a, b));
        assert!(!live.is_ancestor_or_equal(b, a));
    }

    #[test]
    fn finds_nodes_by_phandle() {
        let tree = sample_tree();
        let live = LiveTree::from_device_tree(&tree);
        let a = live.find_node("/a").unwrap();
        assert_eq!(live.find_by_phandle(1), Some(a));
        assert_eq!(live.find_by_phandle(2), None);
    }

    #[test]
    fn allocate_attach_detach_release_round_trips() {
        let tree = sample_tree();
        let mut live = LiveTree::from_device_tree(&tree);
        let bus = live.find_node("/a").unwrap();
        let new_node = live.allocate_detached("dev@0", None, NodeFlags {
            dynamic: true,
            detached: true,
            overlay: true,
        });
        assert!(live.flags(new_node).unwrap().detached);
        assert!(live.find_node("/a/dev@0").is_none());

        live.attach(new_node, bus).unwrap();
        assert!(!live.flags(new_node).unwrap().detached);
        assert_eq!(live.find_node("/a/dev@0"), Some(new_node));

        live.detach(new_node).unwrap();
        assert!(live.find_node("/a/dev@0").is_none());
        live.release(new_node).unwrap();
    }

    #[test]
    fn stale_handle_after_free_is_rejected() {
        let tree = sample_tree();
        let mut live = LiveTree::from_device_tree(&tree);
        let node = live.allocate_detached("tmp", None, NodeFlags::default());
        live.release(node).unwrap();
        assert!(live.flags(node).is_err());
    }

    #[test]
    fn to_device_tree_round_trips_the_original_shape() {
        let tree = sample_tree();
        let live = LiveTree::from_device_tree(&tree);
        assert_eq!(live.to_device_tree(), tree);
    }
}
