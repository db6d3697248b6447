// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use dt_overlay_engine::MemoryReservation;
use dt_overlay_engine::fdt::Fdt;
use dt_overlay_engine::model::{DeviceTree, DeviceTreeNode};

#[test]
fn memreserve() {
    let mut tree = DeviceTree::new(DeviceTreeNode::new(""));
    tree.memory_reservations = alloc_vec();

    let dtb = tree.to_dtb();
    let fdt = Fdt::new(&dtb).unwrap();

    let reservations: Vec<_> = fdt.memory_reservations().collect();
    assert_eq!(reservations, alloc_vec());

    let round_tripped = DeviceTree::from_fdt(&fdt).unwrap();
    assert_eq!(round_tripped.memory_reservations, reservations);

    let dtb2 = round_tripped.to_dtb();
    assert_eq!(dtb, dtb2);

    let dts = fdt.to_string();
    assert!(dts.contains("/memreserve/ 0x1000 0x100;"));
    assert!(dts.contains("/memreserve/ 0x2000 0x200;"));
}

fn alloc_vec() -> Vec<MemoryReservation> {
    vec![
        MemoryReservation::new(0x1000, 0x100),
        MemoryReservation::new(0x2000, 0x200),
    ]
}
