// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use dt_overlay_engine::fdt::Fdt;
use dt_overlay_engine::model::{DeviceTree, DeviceTreeNode, DeviceTreeProperty};

fn children_dtb() -> Vec<u8> {
    DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(DeviceTreeNode::builder("child1").build())
            .child(DeviceTreeNode::builder("child2").build())
            .build(),
    )
    .to_dtb()
}

fn props_dtb() -> Vec<u8> {
    DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("test-props")
                    .property(DeviceTreeProperty::new("u32-prop", 0x1234_5678u32.to_be_bytes()))
                    .property(DeviceTreeProperty::new(
                        "u64-prop",
                        0x1122_3344_5566_7788u64.to_be_bytes(),
                    ))
                    .property(DeviceTreeProperty::new("str-prop", "hello world\0"))
                    .property(DeviceTreeProperty::new(
                        "str-list-prop",
                        "first\0second\0third\0",
                    ))
                    .build(),
            )
            .build(),
    )
    .to_dtb()
}

#[test]
fn read_child_nodes() {
    let dtb = children_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let root = fdt.root().unwrap();
    let mut children = root.children();

    let child1 = children.next().unwrap().unwrap();
    assert_eq!(child1.name().unwrap(), "child1");

    let child2 = children.next().unwrap().unwrap();
    assert_eq!(child2.name().unwrap(), "child2");

    assert!(children.next().is_none());
}

#[test]
fn read_prop_values() {
    let dtb = props_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let root = fdt.root().unwrap();
    let mut children = root.children();
    let node = children.next().unwrap().unwrap();
    assert_eq!(node.name().unwrap(), "test-props");

    let mut props = node.properties();

    let prop = props.next().unwrap().unwrap();
    assert_eq!(prop.name(), "u32-prop");
    assert_eq!(prop.as_u32().unwrap(), 0x12345678);

    let prop = props.next().unwrap().unwrap();
    assert_eq!(prop.name(), "u64-prop");
    assert_eq!(prop.as_u64().unwrap(), 0x1122334455667788);

    let prop = props.next().unwrap().unwrap();
    assert_eq!(prop.name(), "str-prop");
    assert_eq!(prop.as_str().unwrap(), "hello world");

    let prop = props.next().unwrap().unwrap();
    assert_eq!(prop.name(), "str-list-prop");
    let mut str_list = prop.as_str_list();
    assert_eq!(str_list.next(), Some("first"));
    assert_eq!(str_list.next(), Some("second"));
    assert_eq!(str_list.next(), Some("third"));
    assert_eq!(str_list.next(), None);

    assert!(props.next().is_none());
}

#[test]
fn get_property_by_name() {
    let dtb = props_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let root = fdt.root().unwrap();
    let node = root.child("test-props").unwrap().unwrap();

    let prop = node.property("u32-prop").unwrap().unwrap();
    assert_eq!(prop.name(), "u32-prop");
    assert_eq!(prop.as_u32().unwrap(), 0x12345678);

    let prop = node.property("str-prop").unwrap().unwrap();
    assert_eq!(prop.name(), "str-prop");
    assert_eq!(prop.as_str().unwrap(), "hello world");

    assert!(node.property("non-existent-prop").unwrap().is_none());
}

#[test]
fn get_child_by_name() {
    let dtb = children_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let root = fdt.root().unwrap();

    let child1 = root.child("child1").unwrap().unwrap();
    assert_eq!(child1.name().unwrap(), "child1");

    let child2 = root.child("child2").unwrap().unwrap();
    assert_eq!(child2.name().unwrap(), "child2");

    assert!(root.child("non-existent-child").unwrap().is_none());
}

#[test]
fn children_nested() {
    let dtb = DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("child1")
                    .child(
                        DeviceTreeNode::builder("child2")
                            .property(DeviceTreeProperty::new("prop2", "x\0"))
                            .build(),
                    )
                    .build(),
            )
            .child(DeviceTreeNode::builder("child3").build())
            .build(),
    )
    .to_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let root = fdt.root().unwrap();

    for child in root.children() {
        println!("{}", child.unwrap().name().unwrap());
    }

    let children_names: Vec<_> = root
        .children()
        .map(|child| child.unwrap().name().unwrap())
        .collect();
    assert_eq!(children_names, vec!["child1", "child3"]);

    let child1 = root.child("child1").unwrap().unwrap();
    let child2 = child1.child("child2").unwrap().unwrap();
    let nested_properties: Vec<_> = child2
        .properties()
        .map(|prop| prop.unwrap().name().to_owned())
        .collect();
    assert_eq!(nested_properties, vec!["prop2"]);
}

#[test]
fn find_node_by_path() {
    let dtb = DeviceTree::new(
        DeviceTreeNode::builder("")
            .child(
                DeviceTreeNode::builder("a")
                    .child(
                        DeviceTreeNode::builder("b")
                            .child(DeviceTreeNode::builder("c").build())
                            .build(),
                    )
                    .build(),
            )
            .child(DeviceTreeNode::builder("d").build())
            .build(),
    )
    .to_dtb();
    let fdt = Fdt::new(&dtb).unwrap();

    let root = fdt.find_node("/").unwrap().unwrap();
    assert_eq!(root.name().unwrap(), "");

    let a = fdt.find_node("/a").unwrap().unwrap();
    assert_eq!(a.name().unwrap(), "a");

    let b = fdt.find_node("/a/b").unwrap().unwrap();
    assert_eq!(b.name().unwrap(), "b");

    let c = fdt.find_node("/a/b/c").unwrap().unwrap();
    assert_eq!(c.name().unwrap(), "c");

    let d = fdt.find_node("/d").unwrap().unwrap();
    assert_eq!(d.name().unwrap(), "d");

    assert!(fdt.find_node("/a/c").is_none());
    assert!(fdt.find_node("/x").is_none());
    assert!(fdt.find_node("").is_none());
}

#[test]
fn pretty_print() {
    let dtb = DeviceTree::new(
        DeviceTreeNode::builder("")
            .property(DeviceTreeProperty::new("compatible", "acme,board\0"))
            .child(DeviceTreeNode::builder("child1").build())
            .build(),
    )
    .to_dtb();
    let fdt = Fdt::new(&dtb).unwrap();
    let s = fdt.to_string();

    assert!(s.starts_with("/dts-v1/;\n"));
    assert!(s.contains("/ {"));
    assert!(s.contains("compatible = \"acme,board\";"));
    assert!(s.contains("child1 {"));
}

#[test]
fn round_trip() {
    let samples = [
        DeviceTree::new(DeviceTreeNode::new("")).to_dtb(),
        children_dtb(),
        props_dtb(),
    ];

    for dtb in samples {
        let fdt = Fdt::new(&dtb).unwrap();
        let tree = DeviceTree::from_fdt(&fdt).unwrap();
        let new_dtb = tree.to_dtb();
        assert_eq!(dtb, new_dtb);
    }
}
