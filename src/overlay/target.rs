// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Resolves a fragment metadata node's attachment point in the live tree.

use alloc::string::String;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::live::{LiveTree, NodeId};
use crate::model::DeviceTreeNode;

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

/// Resolves `fragment`'s attachment point, preferring a `target` phandle
/// over a `target-path` string, and retains the returned handle.
///
/// `base` anchors a relative `target-path`; when absent, `target-path` is
/// treated as absolute.
pub(crate) fn resolve_target(
    live: &mut LiveTree,
    fragment: &DeviceTreeNode,
    base: Option<NodeId>,
) -> Result<NodeId, OverlayError> {
    let target = if let Some(prop) = fragment.property("target") {
        let phandle = prop
            .as_u32()
            .map_err(|()| invalid("target property is not a 4-byte phandle"))?;
        live.find_by_phandle(phandle)
            .ok_or_else(|| invalid("target phandle does not resolve to a live node"))?
    } else if let Some(prop) = fragment.property("target-path") {
        let suffix = prop
            .as_str()
            .map_err(|()| invalid("target-path is not valid UTF-8"))?;
        let path = match base {
            Some(base) => {
                let mut path = live.node_path(base);
                if !suffix.is_empty() {
                    if !path.ends_with('/') {
                        path.push('/');
                    }
                    path.push_str(suffix.trim_start_matches('/'));
                }
                path
            }
            None => String::from(suffix),
        };
        live.find_node(&path)
            .ok_or_else(|| invalid("target-path does not resolve to a live node"))?
    } else {
        return Err(invalid("fragment has neither target nor target-path"));
    };

    live.retain(target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceTree, DeviceTreeProperty};

    fn sample_live() -> LiveTree {
        let root = DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("bus")
                    .property(DeviceTreeProperty::new("phandle", 7u32.to_be_bytes()))
                    .build(),
            )
            .build();
        LiveTree::from_device_tree(&DeviceTree::new(root))
    }

    #[test]
    fn resolves_by_phandle() {
        let mut live = sample_live();
        let bus = live.find_node("/bus").unwrap();
        let fragment = DeviceTreeNode::builder("fragment@0")
            .property(DeviceTreeProperty::new("target", 7u32.to_be_bytes()))
            .build();
        let resolved = resolve_target(&mut live, &fragment, None).unwrap();
        assert_eq!(resolved, bus);
    }

    #[test]
    fn resolves_by_absolute_target_path() {
        let mut live = sample_live();
        let bus = live.find_node("/bus").unwrap();
        let fragment = DeviceTreeNode::builder("fragment@0")
            .property(DeviceTreeProperty::new("target-path", "/bus"))
            .build();
        let resolved = resolve_target(&mut live, &fragment, None).unwrap();
        assert_eq!(resolved, bus);
    }

    #[test]
    fn relative_target_path_resolves_against_base() {
        let mut live = sample_live();
        let root = live.root();
        let bus = live.find_node("/bus").unwrap();
        let fragment = DeviceTreeNode::builder("fragment@0")
            .property(DeviceTreeProperty::new("target-path", "bus"))
            .build();
        let resolved = resolve_target(&mut live, &fragment, Some(root)).unwrap();
        assert_eq!(resolved, bus);
    }

    #[test]
    fn missing_target_information_is_invalid() {
        let mut live = sample_live();
        let fragment = DeviceTreeNode::builder("fragment@0").build();
        assert!(resolve_target(&mut live, &fragment, None).is_err());
    }

    #[test]
    fn unresolvable_phandle_is_invalid() {
        let mut live = sample_live();
        let fragment = DeviceTreeNode::builder("fragment@0")
            .property(DeviceTreeProperty::new("target", 99u32.to_be_bytes()))
            .build();
        assert!(resolve_target(&mut live, &fragment, None).is_err());
    }
}
