// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Applies and reverts a single ordered edit log against the live tree.
//!
//! This is the only module allowed to mutate live-tree topology or property
//! storage. Every edit but `UpdateProperty` is its own clean inverse;
//! `UpdateProperty` carries the value it replaced so reverting it is just
//! another `UpdateProperty` back to that value.

use alloc::vec::Vec;

use crate::error::OverlayError;
use crate::live::{LiveTree, NodeId};
use crate::model::DeviceTreeProperty;

/// A single primitive edit to the live tree, as produced by the changeset
/// builder.
#[derive(Debug, Clone)]
pub(crate) enum PrimitiveEdit {
    AttachNode {
        node: NodeId,
        parent: NodeId,
    },
    DetachNode {
        node: NodeId,
        parent: NodeId,
    },
    AddProperty {
        node: NodeId,
        property: DeviceTreeProperty,
    },
    UpdateProperty {
        node: NodeId,
        property: DeviceTreeProperty,
        previous: DeviceTreeProperty,
    },
    RemoveProperty {
        node: NodeId,
        property: DeviceTreeProperty,
    },
}

impl PrimitiveEdit {
    /// The node this edit touches, for duplicate-edit and topmost checks.
    pub(crate) fn node(&self) -> NodeId {
        match self {
            PrimitiveEdit::AttachNode { node, .. }
            | PrimitiveEdit::DetachNode { node, .. }
            | PrimitiveEdit::AddProperty { node, .. }
            | PrimitiveEdit::UpdateProperty { node, .. }
            | PrimitiveEdit::RemoveProperty { node, .. } => *node,
        }
    }

    pub(crate) fn property_name(&self) -> Option<&str> {
        match self {
            PrimitiveEdit::AddProperty { property, .. }
            | PrimitiveEdit::UpdateProperty { property, .. }
            | PrimitiveEdit::RemoveProperty { property, .. } => Some(property.name()),
            PrimitiveEdit::AttachNode { .. } | PrimitiveEdit::DetachNode { .. } => None,
        }
    }
}

/// The outcome of a failed `apply_edits`/`revert_edits` call: the original
/// error, plus whether the engine managed to restore a well-defined state.
/// A `false` here is what sets the global corruption latch.
#[derive(Debug)]
pub(crate) struct EditFailure {
    pub(crate) error: OverlayError,
    pub(crate) recovered: bool,
}

fn apply_one(live: &mut LiveTree, edit: &PrimitiveEdit) -> Result<(), OverlayError> {
    match edit {
        PrimitiveEdit::AttachNode { node, parent } => live.attach(*node, *parent),
        PrimitiveEdit::DetachNode { node, .. } => live.detach(*node),
        PrimitiveEdit::AddProperty { node, property } => {
            live.add_property(*node, property.clone())
        }
        PrimitiveEdit::UpdateProperty { node, property, .. } => {
            live.update_property(*node, property.clone())
        }
        PrimitiveEdit::RemoveProperty { node, property } => {
            live.remove_property(*node, property.name()).map(|_| ())
        }
    }
}

fn revert_one(live: &mut LiveTree, edit: &PrimitiveEdit) -> Result<(), OverlayError> {
    match edit {
        PrimitiveEdit::AttachNode { node, .. } => live.detach(*node),
        PrimitiveEdit::DetachNode { node, parent } => live.attach(*node, *parent),
        PrimitiveEdit::AddProperty { node, property } => {
            live.remove_property(*node, property.name()).map(|_| ())
        }
        PrimitiveEdit::UpdateProperty { node, previous, .. } => {
            live.update_property(*node, previous.clone())
        }
        PrimitiveEdit::RemoveProperty { node, property } => {
            live.add_property(*node, property.clone())
        }
    }
}

fn apply_slice(live: &mut LiveTree, edits: &[PrimitiveEdit]) -> Result<(), OverlayError> {
    for edit in edits {
        apply_one(live, edit)?;
    }
    Ok(())
}

fn revert_slice(live: &mut LiveTree, edits: &[PrimitiveEdit]) -> Result<(), OverlayError> {
    for edit in edits.iter().rev() {
        revert_one(live, edit)?;
    }
    Ok(())
}

/// Applies `edits` in order. On failure, attempts to unwind the edits that
/// already succeeded before returning the original error.
pub(crate) fn apply_edits(live: &mut LiveTree, edits: &[PrimitiveEdit]) -> Result<(), EditFailure> {
    for i in 0..edits.len() {
        if let Err(error) = apply_one(live, &edits[i]) {
            let recovered = revert_slice(live, &edits[..i]).is_ok();
            return Err(EditFailure { error, recovered });
        }
    }
    Ok(())
}

/// Reverts `edits` in reverse order. On failure, attempts to re-apply the
/// suffix that was already reverted, restoring the tree to its
/// pre-revert-attempt state.
pub(crate) fn revert_edits(live: &mut LiveTree, edits: &[PrimitiveEdit]) -> Result<(), EditFailure> {
    for i in (0..edits.len()).rev() {
        if let Err(error) = revert_one(live, &edits[i]) {
            let recovered = apply_slice(live, &edits[i + 1..]).is_ok();
            return Err(EditFailure { error, recovered });
        }
    }
    Ok(())
}
