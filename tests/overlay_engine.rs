// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use dt_overlay_engine::error::OverlayErrorKind;
use dt_overlay_engine::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty};
use dt_overlay_engine::overlay::{NotifierCallback, NotifierHandle, NotifyAction};
use dt_overlay_engine::{OverlayError, OverlayManager};

fn base_with_bus() -> DeviceTree {
    DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(DeviceTreeNode::builder("bus").build())
            .build(),
    )
}

fn overlay_bytes(fragment_name: &str, target_path: &str, overlay: DeviceTreeNode) -> Vec<u8> {
    DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder(fragment_name)
                    .property(DeviceTreeProperty::new("target-path", target_path))
                    .child(overlay)
                    .build(),
            )
            .build(),
    )
    .to_dtb()
}

#[test]
fn apply_adds_property_to_existing_node() {
    let manager = OverlayManager::new(&base_with_bus());
    let bytes = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("status", "okay"))
            .build(),
    );

    let id = manager.fdt_apply(&bytes, None).unwrap();
    assert_eq!(id, 1);

    let tree = manager.current_tree();
    let bus = tree.root().child("bus").unwrap();
    assert_eq!(bus.property("status").unwrap().as_str(), Ok("okay"));

    manager.remove(id).unwrap();
    let tree = manager.current_tree();
    assert!(tree.root().child("bus").unwrap().property("status").is_none());
}

#[test]
fn apply_rejects_mismatched_address_cells() {
    let base = DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("bus")
                    .property(DeviceTreeProperty::new(
                        "#address-cells",
                        1u32.to_be_bytes(),
                    ))
                    .build(),
            )
            .build(),
    );
    let manager = OverlayManager::new(&base);
    let bytes = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new(
                "#address-cells",
                2u32.to_be_bytes(),
            ))
            .build(),
    );

    let err = manager.fdt_apply(&bytes, None).unwrap_err();
    assert!(matches!(err.kind, OverlayErrorKind::Invalid(_)));
}

#[test]
fn apply_synthesizes_new_subtree_and_remove_reverts_it() {
    let manager = OverlayManager::new(&base_with_bus());
    let bytes = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .child(
                DeviceTreeNode::builder("dev@0")
                    .property(DeviceTreeProperty::new("compatible", "acme,widget"))
                    .build(),
            )
            .build(),
    );

    let id = manager.fdt_apply(&bytes, None).unwrap();
    let tree = manager.current_tree();
    let dev = tree.root().child("bus").unwrap().child("dev@0").unwrap();
    assert_eq!(
        dev.property("compatible").unwrap().as_str(),
        Ok("acme,widget")
    );

    manager.remove(id).unwrap();
    let tree = manager.current_tree();
    assert!(tree.root().child("bus").unwrap().child("dev@0").is_none());
}

#[test]
fn apply_rejects_phandle_collision() {
    let base = DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("a")
                    .property(DeviceTreeProperty::new("phandle", 0x10u32.to_be_bytes()))
                    .build(),
            )
            .build(),
    );
    let manager = OverlayManager::new(&base);
    let bytes = overlay_bytes(
        "fragment@0",
        "/",
        DeviceTreeNode::builder("__overlay__")
            .child(
                DeviceTreeNode::builder("a")
                    .property(DeviceTreeProperty::new("phandle", 0x20u32.to_be_bytes()))
                    .build(),
            )
            .build(),
    );

    let err = manager.fdt_apply(&bytes, None).unwrap_err();
    assert!(matches!(err.kind, OverlayErrorKind::Invalid(_)));
}

#[test]
fn symbols_fragment_rewrites_and_installs_symbol_path() {
    let base = DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(DeviceTreeNode::builder("bus").build())
            .child(DeviceTreeNode::builder("__symbols__").build())
            .build(),
    );
    let manager = OverlayManager::new(&base);

    let overlay_root = DeviceTreeNode::builder("")
        .child(
            DeviceTreeNode::builder("fragment@0")
                .property(DeviceTreeProperty::new("target-path", "/bus"))
                .child(
                    DeviceTreeNode::builder("__overlay__")
                        .child(DeviceTreeNode::builder("dev@0").build())
                        .build(),
                )
                .build(),
        )
        .child(
            DeviceTreeNode::builder("__symbols__")
                .property(DeviceTreeProperty::new(
                    "mydev",
                    "/fragment@0/__overlay__/dev@0",
                ))
                .build(),
        )
        .build();
    let bytes = DeviceTree::new(overlay_root).to_dtb();

    manager.fdt_apply(&bytes, None).unwrap();

    let tree = manager.current_tree();
    let symbols = tree.root().child("__symbols__").unwrap();
    assert_eq!(
        symbols.property("mydev").unwrap().as_str(),
        Ok("/bus/dev@0")
    );
}

#[test]
fn non_topmost_removal_is_rejected_until_dependent_is_removed() {
    let manager = OverlayManager::new(&base_with_bus());

    let first = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .child(DeviceTreeNode::builder("dev@0").build())
            .build(),
    );
    let first_id = manager.fdt_apply(&first, None).unwrap();

    let second = overlay_bytes(
        "fragment@0",
        "/bus/dev@0",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("status", "okay"))
            .build(),
    );
    let second_id = manager.fdt_apply(&second, None).unwrap();

    let err = manager.remove(first_id).unwrap_err();
    assert!(matches!(err.kind, OverlayErrorKind::Busy(_)));

    manager.remove(second_id).unwrap();
    manager.remove(first_id).unwrap();
}

#[test]
fn remove_all_unwinds_every_changeset() {
    let manager = OverlayManager::new(&base_with_bus());
    let first = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("a", "1"))
            .build(),
    );
    let second = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("b", "2"))
            .build(),
    );
    manager.fdt_apply(&first, None).unwrap();
    manager.fdt_apply(&second, None).unwrap();

    manager.remove_all().unwrap();

    let tree = manager.current_tree();
    let bus = tree.root().child("bus").unwrap();
    assert!(bus.property("a").is_none());
    assert!(bus.property("b").is_none());
}

#[test]
fn unknown_changeset_id_is_rejected() {
    let manager = OverlayManager::new(&base_with_bus());
    let err = manager.remove(999).unwrap_err();
    assert!(matches!(err.kind, OverlayErrorKind::NoSuchChangeset));
}

struct VetoingNotifier;

impl NotifierCallback for VetoingNotifier {
    fn notify(&self, _action: NotifyAction, _changeset_id: u32) -> Result<(), OverlayError> {
        Err(OverlayError::vetoed("test veto"))
    }
}

#[test]
fn pre_apply_veto_blocks_the_apply() {
    let manager = OverlayManager::new(&base_with_bus());
    let _handle: NotifierHandle = manager.notifier_register(Box::new(VetoingNotifier));

    let bytes = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("status", "okay"))
            .build(),
    );
    let err = manager.fdt_apply(&bytes, None).unwrap_err();
    assert!(matches!(err.kind, OverlayErrorKind::Vetoed));
}

struct RecordingNotifier {
    seen: std::sync::Mutex<Vec<&'static str>>,
}

impl NotifierCallback for RecordingNotifier {
    fn notify(&self, action: NotifyAction, _changeset_id: u32) -> Result<(), OverlayError> {
        let label = match action {
            NotifyAction::PreApply => "pre-apply",
            NotifyAction::PostApply => "post-apply",
            NotifyAction::PreRemove => "pre-remove",
            NotifyAction::PostRemove => "post-remove",
        };
        self.seen.lock().unwrap().push(label);
        Ok(())
    }
}

#[test]
fn apply_and_remove_broadcast_lifecycle_notifications() {
    let manager = OverlayManager::new(&base_with_bus());
    let notifier = std::sync::Arc::new(RecordingNotifier {
        seen: std::sync::Mutex::new(Vec::new()),
    });

    struct Forwarder(std::sync::Arc<RecordingNotifier>);
    impl NotifierCallback for Forwarder {
        fn notify(&self, action: NotifyAction, id: u32) -> Result<(), OverlayError> {
            self.0.notify(action, id)
        }
    }
    manager.notifier_register(Box::new(Forwarder(notifier.clone())));

    let bytes = overlay_bytes(
        "fragment@0",
        "/bus",
        DeviceTreeNode::builder("__overlay__")
            .property(DeviceTreeProperty::new("status", "okay"))
            .build(),
    );
    let id = manager.fdt_apply(&bytes, None).unwrap();
    manager.remove(id).unwrap();

    let seen = notifier.seen.lock().unwrap();
    assert_eq!(&*seen, &["pre-apply", "post-apply", "pre-remove", "post-remove"]);
}
