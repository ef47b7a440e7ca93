//! End-to-end mirroring scenarios against the emulated device.

use device_mirror::{
    api::{Kernel, LaunchConfig, ThreadIndex},
    emulated::EmulatedDevice,
    error::DeviceError,
    memory::DeviceSlot,
    mirror::{LendToDevice, MirroredOnHost},
    model::{alter_attribute, update_point_data, Basic, BasicDeviceRepresentation, Line, LineSet},
};

#[test]
fn round_trip_without_kernels_preserves_state() {
    let device = EmulatedDevice::new();
    let basic = Basic::new(5, vec![1.0, 2.0, 3.0]);

    let on_device = MirroredOnHost::new(basic, &device)
        .move_to_device()
        .unwrap();
    assert!(device.outstanding() > 0);

    let on_host = on_device.move_to_host().unwrap();
    let basic = on_host.into_inner();

    assert_eq!(basic.id(), 5);
    assert_eq!(basic.value(), &[1.0, 2.0, 3.0]);
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.bytes_in_use(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn round_trip_with_empty_buffer() {
    let device = EmulatedDevice::new();
    let basic = Basic::new(7, Vec::new());

    let on_host = MirroredOnHost::new(basic, &device)
        .move_to_device()
        .unwrap()
        .move_to_host()
        .unwrap();

    assert_eq!(on_host.id(), 7);
    assert!(on_host.value().is_empty());
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn alter_attribute_through_exchange_wrapper() {
    let device = EmulatedDevice::new();
    let basic = Basic::new(2, vec![2.0, 3.0, 4.0]);

    let mut on_device = MirroredOnHost::new(basic, &device)
        .move_to_device()
        .unwrap();
    on_device
        .launch(LaunchConfig::new(1, 3), alter_attribute())
        .unwrap();
    let on_host = on_device.move_to_host().unwrap();

    assert_eq!(on_host.id(), 3);
    assert_eq!(on_host.value(), &[3.0, 4.0, 5.0]);
    assert_eq!(device.outstanding(), 0);
}

unsafe fn seed_entry(index: ThreadIndex, arg: *mut BasicDeviceRepresentation) {
    let repr = unsafe { *arg };
    if let Some(entry) = repr.value.element(index.flat()) {
        unsafe { *entry = repr.id as f32 + index.flat() as f32 };
    }
}

unsafe fn double_entry(index: ThreadIndex, arg: *mut BasicDeviceRepresentation) {
    let repr = unsafe { *arg };
    if let Some(entry) = repr.value.element(index.flat()) {
        unsafe { *entry *= 2.0 };
    }
}

#[test]
fn chained_kernels_compose_against_one_mirror() {
    let device = EmulatedDevice::new();
    let basic = Basic::new(10, vec![0.0; 4]);

    let mut on_device = MirroredOnHost::new(basic, &device)
        .move_to_device()
        .unwrap();
    on_device
        .launch(LaunchConfig::new(1, 4), Kernel::new(seed_entry))
        .unwrap();
    on_device
        .launch(LaunchConfig::new(1, 4), Kernel::new(double_entry))
        .unwrap();
    let on_host = on_device.move_to_host().unwrap();

    for (index, value) in on_host.value().iter().enumerate() {
        assert_eq!(*value, (10.0 + index as f32) * 2.0);
    }
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn immutable_lend_discards_device_writes() {
    let device = EmulatedDevice::new();
    let basic = Basic::new(2, vec![2.0, 3.0, 4.0]);

    basic
        .lend_to_device(&device, |lease| {
            lease.launch(LaunchConfig::new(1, 3), alter_attribute())
        })
        .unwrap();

    assert_eq!(basic.id(), 2);
    assert_eq!(basic.value(), &[2.0, 3.0, 4.0]);
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn nested_composite_round_trip_over_exchange_wrapper() {
    let device = EmulatedDevice::new();
    let set = LineSet::new((0..2).map(|id| Line::with_layout(id, 2, 1, 3)).collect());

    let mut on_device = MirroredOnHost::new(set, &device).move_to_device().unwrap();
    on_device
        .launch(LaunchConfig::new(2, 3), update_point_data())
        .unwrap();
    let on_host = on_device.move_to_host().unwrap();

    for line in on_host.lines() {
        for (index, point) in line.points().iter().enumerate() {
            if point.weight().is_some() {
                let gauss_index = index - line.plain_points();
                assert_eq!(point.data()[1], (gauss_index as f32 + 1.0) * 2.5);
            } else {
                assert_eq!(point.data()[0], index as f32 * 1.5);
            }
        }
    }
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.bytes_in_use(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn sibling_buffer_writes_stay_independent() {
    let device = EmulatedDevice::new();
    let mut set = LineSet::new(vec![Line::with_layout(0, 2, 0, 2)]);
    for point in set.lines_mut()[0].points_mut() {
        point.data_mut().fill(-1.0);
    }

    set.lend_to_device_mut(&device, |lease| {
        lease.launch(LaunchConfig::new(1, 2), update_point_data())
    })
    .unwrap();

    // Each point's kernel write lands in its own buffer; the untouched
    // entries keep their host values.
    let line = &set.lines()[0];
    assert_eq!(line.points()[0].data(), &[0.0, -1.0]);
    assert_eq!(line.points()[1].data(), &[1.5, -1.0]);
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn allocation_failure_releases_partial_state() {
    // Capacity fits the struct slot but not the value buffer.
    let device = EmulatedDevice::with_capacity(64);
    let basic = Basic::new(1, vec![0.0; 100]);

    let result = MirroredOnHost::new(basic, &device).move_to_device();

    assert!(matches!(
        result.map(|_| ()),
        Err(DeviceError::OutOfMemory { .. })
    ));
    assert_eq!(device.outstanding(), 0);
    assert_eq!(device.bytes_in_use(), 0);
    assert_eq!(device.faults(), 0);
}

#[test]
fn patch_outside_struct_bounds_is_rejected() {
    let device = EmulatedDevice::new();
    let mut slot = DeviceSlot::new(&device, &0u64).unwrap();

    let mut patcher = slot.patcher();
    assert_eq!(patcher.region_len(), 8);
    assert_eq!(
        patcher.patch(6, &0u32),
        Err(DeviceError::SizeMismatch {
            expected: 8,
            found: 10,
        })
    );
    // An in-bounds patch of the same width still succeeds.
    patcher.patch(4, &0u32).unwrap();
    drop(slot);
    assert_eq!(device.outstanding(), 0);
}
