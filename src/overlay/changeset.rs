// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Walks a parsed overlay fragment against the live tree, emitting the
//! primitive edit log, and checks that log for internal conflicts.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::live::{LiveTree, NodeFlags, NodeId};
use crate::model::{DeviceTreeNode, DeviceTreeProperty};
use crate::primitive::PrimitiveEdit;

use super::symbols::fixup_symbol_path;
use super::Fragment;

/// Properties synthesized by a decoder/compiler rather than authored by the
/// overlay itself; never diffed against the live tree, only (re)derived.
/// `phandle`/`linux,phandle` are skipped here because a matched node's
/// phandle lives in its structured [`NodeId`] metadata, not in the raw
/// property bytes; diffing it as an ordinary property would let an overlay
/// silently desynchronize the two.
const PSEUDO_PROPERTIES: &[&str] = &["name", "phandle", "linux,phandle"];

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

struct Cursor {
    live_node: NodeId,
    in_livetree: bool,
}

/// Builds the full edit log for `fragments`: every non-symbols fragment in
/// order, then the symbols fragment (if any), then the duplicate-edit check.
pub(crate) fn build_edits(
    live: &mut LiveTree,
    fragments: &[Fragment],
) -> Result<Vec<PrimitiveEdit>, OverlayError> {
    let mut edits = Vec::new();
    for fragment in fragments.iter().filter(|f| !f.is_symbols) {
        let cursor = Cursor {
            live_node: fragment.target,
            in_livetree: true,
        };
        walk_node(live, &fragment.overlay, cursor, &mut edits)?;
    }
    if let Some(symbols_fragment) = fragments.iter().find(|f| f.is_symbols) {
        build_symbols_edits(live, fragments, symbols_fragment, &mut edits)?;
    }
    check_no_duplicates(&edits)?;
    Ok(edits)
}

fn walk_node(
    live: &mut LiveTree,
    overlay_node: &DeviceTreeNode,
    cursor: Cursor,
    edits: &mut Vec<PrimitiveEdit>,
) -> Result<(), OverlayError> {
    for prop in overlay_node.properties() {
        if cursor.in_livetree && PSEUDO_PROPERTIES.contains(&prop.name()) {
            continue;
        }
        if cursor.in_livetree {
            emit_property_edit(live, cursor.live_node, prop, edits)?;
        } else {
            edits.push(PrimitiveEdit::AddProperty {
                node: cursor.live_node,
                property: prop.clone(),
            });
        }
    }

    for child in overlay_node.children() {
        let child_basename = basename(child.name());
        let child_phandle = child.property("phandle").and_then(|p| p.as_u32().ok());

        if cursor.in_livetree {
            if let Some(found) = live.find_child_by_basename(cursor.live_node, child_basename)? {
                let found_phandle = live.phandle(found)?;
                if found_phandle.is_some() && child_phandle.is_some() {
                    return Err(invalid("overlay child collides with an existing phandle"));
                }
                walk_node(
                    live,
                    child,
                    Cursor {
                        live_node: found,
                        in_livetree: true,
                    },
                    edits,
                )?;
                continue;
            }
        }

        let new_node = live.allocate_detached(
            child_basename.to_string(),
            child_phandle,
            NodeFlags {
                dynamic: true,
                detached: true,
                overlay: true,
            },
        );
        edits.push(PrimitiveEdit::AttachNode {
            node: new_node,
            parent: cursor.live_node,
        });
        if child.property("name").is_none() {
            edits.push(PrimitiveEdit::AddProperty {
                node: new_node,
                property: DeviceTreeProperty::new("name", "<NULL>"),
            });
        }
        walk_node(
            live,
            child,
            Cursor {
                live_node: new_node,
                in_livetree: false,
            },
            edits,
        )?;
    }

    Ok(())
}

fn emit_property_edit(
    live: &LiveTree,
    target: NodeId,
    prop: &DeviceTreeProperty,
    edits: &mut Vec<PrimitiveEdit>,
) -> Result<(), OverlayError> {
    let existing = live.property(target, prop.name())?;

    if prop.name() == "#address-cells" || prop.name() == "#size-cells" {
        if let Some(existing) = existing {
            if existing.value() != prop.value() {
                return Err(invalid("overlay and live #address/#size-cells disagree"));
            }
        }
        return Ok(());
    }

    if !live.flags(target)?.overlay {
        log::warn!(
            "writing property {:?} into {:?}, which was not created by an overlay; its storage \
             will not be freed on removal",
            prop.name(),
            live.node_path(target)
        );
    }

    match existing {
        Some(previous) => edits.push(PrimitiveEdit::UpdateProperty {
            node: target,
            property: prop.clone(),
            previous: previous.clone(),
        }),
        None => edits.push(PrimitiveEdit::AddProperty {
            node: target,
            property: prop.clone(),
        }),
    }
    Ok(())
}

fn build_symbols_edits(
    live: &LiveTree,
    fragments: &[Fragment],
    symbols_fragment: &Fragment,
    edits: &mut Vec<PrimitiveEdit>,
) -> Result<(), OverlayError> {
    for prop in symbols_fragment.overlay.properties() {
        let Ok(original_path) = prop.as_str() else {
            log::warn!("dropping non-UTF-8 symbol {:?}", prop.name());
            continue;
        };
        let rewritten = match fixup_symbol_path(live, fragments, original_path) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("dropping symbol {:?}: {err}", prop.name());
                continue;
            }
        };
        if live
            .property(symbols_fragment.target, prop.name())?
            .is_some()
        {
            return Err(invalid("overlay redefines an existing symbol"));
        }
        edits.push(PrimitiveEdit::AddProperty {
            node: symbols_fragment.target,
            property: DeviceTreeProperty::new(prop.name(), rewritten),
        });
    }
    Ok(())
}

/// Compares edits by the [`NodeId`] they target, not by path: a node created
/// by this same changeset (via `allocate_detached`) has no parent yet, so
/// its path would collapse to its bare basename and falsely collide with an
/// unrelated new node sharing that basename under a different target.
fn check_no_duplicates(edits: &[PrimitiveEdit]) -> Result<(), OverlayError> {
    for i in 0..edits.len() {
        for j in (i + 1)..edits.len() {
            let a = &edits[i];
            let b = &edits[j];
            if a.node() != b.node() {
                continue;
            }
            let a_is_topology = matches!(
                a,
                PrimitiveEdit::AttachNode { .. } | PrimitiveEdit::DetachNode { .. }
            );
            let b_is_topology = matches!(
                b,
                PrimitiveEdit::AttachNode { .. } | PrimitiveEdit::DetachNode { .. }
            );
            if a_is_topology && b_is_topology {
                return Err(invalid("duplicate attach/detach edit for the same node"));
            } else if !a_is_topology && !b_is_topology && a.property_name() == b.property_name() {
                return Err(invalid(
                    "duplicate property edit for the same node and property",
                ));
            }
        }
    }
    Ok(())
}
