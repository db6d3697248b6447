// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Resolves overlay-local phandles before an overlay is merged into the
//! live tree.
//!
//! This stands in for dtc's `__fixups__`/`__local_fixups__` machinery: every
//! node in the overlay that declares a `phandle` property is given a fresh
//! value above the live tree's current maximum, and every 4-byte-aligned
//! occurrence of its old value anywhere else in the overlay's own properties
//! is rewritten to match, so overlay-internal cross-references stay
//! consistent after promotion.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::model::{DeviceTreeNode, DeviceTreeProperty};

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

/// Rewrites every phandle-bearing node under `overlay_root`, starting
/// allocation at `next_phandle`.
///
/// Runs in two passes so a property that references a phandle owned by a
/// not-yet-visited sibling still gets rewritten: the first pass assigns
/// every fresh phandle without touching property bytes, and the second
/// pass rewrites every property against the now-complete map.
pub(crate) fn resolve_overlay_phandles(
    overlay_root: &mut DeviceTreeNode,
    next_phandle: u32,
) -> Result<(), OverlayError> {
    let mut remap = PhandleRemap {
        next_phandle,
        old_to_new: Vec::new(),
    };
    remap.collect(overlay_root)?;
    remap.rewrite(overlay_root);
    Ok(())
}

struct PhandleRemap {
    next_phandle: u32,
    old_to_new: Vec<(u32, u32)>,
}

impl PhandleRemap {
    fn collect(&mut self, node: &mut DeviceTreeNode) -> Result<(), OverlayError> {
        if let Some(phandle) = node.property("phandle") {
            let old = phandle
                .as_u32()
                .map_err(|()| invalid("phandle property is not a 4-byte value"))?;
            let new = self.next_phandle;
            self.next_phandle += 1;
            self.old_to_new.push((old, new));
            node.property_mut("phandle")
                .expect("just checked this property exists")
                .set_value(new.to_be_bytes());
        }

        for child in node.children_mut() {
            self.collect(child)?;
        }

        Ok(())
    }

    fn rewrite(&self, node: &mut DeviceTreeNode) {
        for prop in node.properties_mut() {
            self.rewrite_property(prop);
        }

        for child in node.children_mut() {
            self.rewrite(child);
        }
    }

    fn rewrite_property(&self, prop: &mut DeviceTreeProperty) {
        if self.old_to_new.is_empty() || !prop.value().len().is_multiple_of(4) {
            return;
        }

        let mut value = prop.value().to_vec();
        let mut changed = false;
        for chunk in value.chunks_mut(4) {
            let raw = u32::from_be_bytes(
                chunk
                    .try_into()
                    .expect("chunks_mut(4) always yields 4-byte slices"),
            );
            if let Some(&(_, new)) = self.old_to_new.iter().find(|(old, _)| *old == raw) {
                chunk.copy_from_slice(&new.to_be_bytes());
                changed = true;
            }
        }
        if changed {
            prop.set_value(value);
        }
    }
}
