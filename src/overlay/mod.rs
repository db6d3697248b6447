// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The overlay-apply/overlay-remove engine.
//!
//! This module drives, but does not re-implement, four external
//! collaborators: the flat-tree decoder ([`crate::fdt`]), the phandle
//! resolver ([`crate::phandle`]), the primitive changeset engine
//! ([`crate::primitive`]), and the live-tree arena ([`crate::live`]). What
//! lives here is target resolution, symbol-path fixup, changeset
//! construction, the overlay registry and its topmost-removal policy, the
//! sticky corruption latch, and the notifier bus.

mod changeset;
mod notify;
mod symbols;
mod target;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use spin::Mutex;
use twox_hash::xxhash64;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::fdt::Fdt;
use crate::live::{LiveTree, NodeId};
use crate::model::{DeviceTree, DeviceTreeNode};
use crate::phandle;
use crate::primitive::{self, PrimitiveEdit};

pub use notify::{EditNotification, NotifierCallback, NotifierHandle, NotifyAction};
use notify::NotifierBus;

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

/// A single fragment: the overlay subtree to graft, and the live node it
/// grafts onto. `is_symbols` marks the synthetic fragment built from
/// `__symbols__`, which is always processed last.
struct Fragment {
    name: String,
    overlay: DeviceTreeNode,
    target: NodeId,
    is_symbols: bool,
}

/// The lifecycle phase of one overlay changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyState {
    Init,
    PreApply,
    PostApply,
    PreRemove,
    PostRemove,
}

/// A single applied overlay: the fragments it was built from, the primitive
/// edits it installed, and enough state to support removal.
struct OverlayChangeset {
    id: u32,
    fragments: Vec<Fragment>,
    primitive_edits: Vec<PrimitiveEdit>,
    notify_state: NotifyState,
}

impl OverlayChangeset {
    fn touches(&self, live: &LiveTree, node: NodeId) -> bool {
        self.primitive_edits
            .iter()
            .any(|edit| live.is_ancestor_or_equal(edit.node(), node) || live.is_ancestor_or_equal(node, edit.node()))
    }
}

/// The ordered registry of live overlay changesets: insertion order doubles
/// as apply order, with the last entry being "topmost".
struct Registry {
    order: Vec<u32>,
    by_id: IndexMap<u32, OverlayChangeset, xxhash64::State>,
    next_id: u32,
}

impl Registry {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            by_id: IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe)),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, changeset: OverlayChangeset) {
        self.order.push(changeset.id);
        self.by_id.insert(changeset.id, changeset);
    }

    fn remove(&mut self, id: u32) -> Option<OverlayChangeset> {
        self.order.retain(|&o| o != id);
        self.by_id.shift_remove(&id)
    }

    /// Whether `id` is safe to remove: no later changeset edited any node
    /// that `id`'s own edits touched, ancestor/descendant or equal.
    fn is_topmost(&self, live: &LiveTree, id: u32) -> Result<bool, OverlayError> {
        let candidate = self.by_id.get(&id).ok_or_else(|| {
            OverlayError::new(OverlayErrorKind::NoSuchChangeset, String::new())
        })?;
        let position = self
            .order
            .iter()
            .position(|&o| o == id)
            .expect("id present in by_id must also be present in order");
        for &later_id in &self.order[position + 1..] {
            let later = self
                .by_id
                .get(&later_id)
                .expect("order and by_id stay in sync");
            for edit in &later.primitive_edits {
                if candidate.touches(live, edit.node()) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

struct EngineState {
    live: LiveTree,
    registry: Registry,
    notifiers: NotifierBus,
}

/// Owns the live tree, the overlay registry, and the sticky corruption
/// latch. Construct once at boot and share behind whatever synchronization
/// the embedder already uses to publish statics in a `no_std` environment.
pub struct OverlayManager {
    phandle_mutex: Mutex<()>,
    state: Mutex<EngineState>,
    apply_fail: AtomicBool,
    revert_fail: AtomicBool,
}

impl OverlayManager {
    /// Builds a manager around a freshly-decoded base tree.
    #[must_use]
    pub fn new(base: &DeviceTree) -> Self {
        Self {
            phandle_mutex: Mutex::new(()),
            state: Mutex::new(EngineState {
                live: LiveTree::from_device_tree(base),
                registry: Registry::new(),
                notifiers: NotifierBus::new(),
            }),
            apply_fail: AtomicBool::new(false),
            revert_fail: AtomicBool::new(false),
        }
    }

    fn corrupted(&self) -> bool {
        self.apply_fail.load(Ordering::SeqCst) || self.revert_fail.load(Ordering::SeqCst)
    }

    fn busy(reason: &'static str) -> OverlayError {
        OverlayError::new(OverlayErrorKind::Busy(reason), String::new())
    }

    /// Parses `bytes` as a flat overlay, resolves it against the live tree
    /// optionally rooted at `base_path`, and installs it. Returns the
    /// changeset id on success; on any failure after the changeset is
    /// allocated, the caller should call [`OverlayManager::remove`] with the
    /// id this function embeds in the error context to clean up -- but per
    /// §4.5, only lifecycle step 2 onward allocates anything to clean up, so
    /// a clean (pre-allocation) failure here never leaks state.
    pub fn fdt_apply(&self, bytes: &[u8], base_path: Option<&str>) -> Result<u32, OverlayError> {
        if self.corrupted() {
            return Err(Self::busy("corruption latch is set"));
        }
        let _phandle_guard = self.phandle_mutex.lock();
        let mut state = self.state.lock();

        let fdt = Fdt::new(bytes)?;
        let mut overlay_root = DeviceTreeNode::try_from(fdt.root()?)?;

        let next_phandle = state
            .live
            .max_phandle()
            .map_or(1, |max| max.saturating_add(1));
        phandle::resolve_overlay_phandles(&mut overlay_root, next_phandle)?;

        let base = match base_path {
            Some(path) => Some(
                state
                    .live
                    .find_node(path)
                    .ok_or_else(|| invalid("base node path does not resolve"))?,
            ),
            None => None,
        };

        let mut fragments = Vec::new();
        for child in overlay_root.children() {
            if child.name() == "__symbols__" {
                continue;
            }
            let target = target::resolve_target(&mut state.live, child, base)?;
            let overlay_child = child
                .child("__overlay__")
                .ok_or_else(|| invalid("fragment is missing an __overlay__ child"))?
                .clone();
            fragments.push(Fragment {
                name: child.name().into(),
                overlay: overlay_child,
                target,
                is_symbols: false,
            });
        }
        if let Some(symbols_node) = overlay_root.child("__symbols__") {
            let target = state
                .live
                .find_node("/__symbols__")
                .ok_or_else(|| invalid("live tree has no /__symbols__ node"))?;
            state.live.retain(target)?;
            fragments.push(Fragment {
                name: String::from("__symbols__"),
                overlay: symbols_node.clone(),
                target,
                is_symbols: true,
            });
        }
        if fragments.is_empty() {
            return Err(invalid("overlay has no fragments"));
        }

        let id = state.registry.allocate_id();
        let mut notify_state = NotifyState::Init;

        notify_state = NotifyState::PreApply;
        state
            .notifiers
            .broadcast(NotifyAction::PreApply, id)
            .map_err(|err| {
                log::debug!("pre-apply notifier rejected changeset {id}: {err}");
                err
            })?;

        let edits = changeset::build_edits(&mut state.live, &fragments)?;

        if let Err(failure) = primitive::apply_edits(&mut state.live, &edits) {
            if !failure.recovered {
                self.apply_fail.store(true, Ordering::SeqCst);
                log::debug!("apply of changeset {id} failed and could not be unwound");
            }
            return Err(failure.error);
        }

        state.notifiers.notify_edits(&edits);
        notify_state = NotifyState::PostApply;

        state.registry.insert(OverlayChangeset {
            id,
            fragments,
            primitive_edits: edits,
            notify_state,
        });

        let post_apply_result = state.notifiers.broadcast(NotifyAction::PostApply, id);
        if let Err(ref err) = post_apply_result {
            log::debug!("post-apply notifier for changeset {id} reported {err}");
        }

        post_apply_result.map(|()| id)
    }

    /// Reverts and frees the changeset `id`, if it is topmost-safe to do so.
    pub fn remove(&self, id: u32) -> Result<(), OverlayError> {
        if self.corrupted() {
            return Err(Self::busy("corruption latch is set"));
        }
        let mut state = self.state.lock();

        if !state.registry.by_id.contains_key(&id) {
            return Err(OverlayError::new(
                OverlayErrorKind::NoSuchChangeset,
                String::new(),
            ));
        }
        if !state.registry.is_topmost(&state.live, id)? {
            return Err(Self::busy("changeset is not topmost"));
        }

        state.registry.by_id.get_mut(&id).expect("checked above").notify_state = NotifyState::PreRemove;
        state
            .notifiers
            .broadcast(NotifyAction::PreRemove, id)
            .map_err(|err| {
                log::debug!("pre-remove notifier rejected changeset {id}: {err}");
                err
            })?;

        let edits = state.registry.by_id[&id].primitive_edits.clone();
        if let Err(failure) = primitive::revert_edits(&mut state.live, &edits) {
            if !failure.recovered {
                self.revert_fail.store(true, Ordering::SeqCst);
                log::debug!("revert of changeset {id} failed and could not be recovered");
            }
            return Err(failure.error);
        }

        state.notifiers.notify_edits(&edits);
        let post_remove_result = state.notifiers.broadcast(NotifyAction::PostRemove, id);
        if let Err(ref err) = post_remove_result {
            log::debug!("post-remove notifier for changeset {id} reported {err}");
        }

        let mut changeset = state
            .registry
            .remove(id)
            .expect("already checked this id exists");
        changeset.notify_state = NotifyState::PostRemove;
        for fragment in &changeset.fragments {
            let _ = state.live.release(fragment.target);
        }
        // Every node this changeset synthesized was detached by the revert
        // above; drop the creation-time reference `live.allocate_detached`
        // handed out so the arena slot is actually freed.
        for edit in &changeset.primitive_edits {
            if let PrimitiveEdit::AttachNode { node, .. } = edit {
                let _ = state.live.release(*node);
            }
        }

        post_remove_result
    }

    /// Removes every applied changeset, tail first, stopping at the first
    /// failure.
    pub fn remove_all(&self) -> Result<(), OverlayError> {
        loop {
            let next = {
                let state = self.state.lock();
                state.registry.order.last().copied()
            };
            match next {
                Some(id) => self.remove(id)?,
                None => return Ok(()),
            }
        }
    }

    /// Registers a notifier callback, returning a handle for
    /// [`OverlayManager::notifier_unregister`].
    pub fn notifier_register(&self, callback: Box<dyn NotifierCallback>) -> NotifierHandle {
        self.state.lock().notifiers.register(callback)
    }

    /// Unregisters a previously-registered notifier. Returns whether the
    /// handle was found.
    pub fn notifier_unregister(&self, handle: NotifierHandle) -> bool {
        self.state.lock().notifiers.unregister(handle)
    }

    /// Snapshots the current live tree, overlays and all, as a
    /// [`DeviceTree`]. Useful for persisting or inspecting the merged tree;
    /// the manager keeps driving the live tree this snapshot was taken from.
    #[must_use]
    pub fn current_tree(&self) -> DeviceTree {
        self.state.lock().live.to_device_tree()
    }
}

impl core::fmt::Debug for OverlayManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OverlayManager")
            .field("corrupted", &self.corrupted())
            .finish_non_exhaustive()
    }
}
