//! The minimal mirrored leaf: one scalar field and one owned buffer.

use core::mem::offset_of;

use crate::{
    api::{DeviceApi, Kernel, ThreadIndex},
    error::DeviceResult,
    memory::{DeviceBuffer, DeviceCopy, DeviceSlice, FieldPatcher},
    mirror::{MirrorBuffer, MirrorToDevice},
};

/// A leaf object with an identifier and one owned float buffer.
#[derive(Clone, Debug)]
pub struct Basic {
    id: i32,
    value: MirrorBuffer<f32>,
}

impl Basic {
    /// A leaf with the given identifier and buffer contents.
    #[must_use]
    pub fn new(id: i32, value: Vec<f32>) -> Self {
        Self {
            id,
            value: MirrorBuffer::from_vec(value),
        }
    }

    /// The identifier.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// The buffer contents.
    #[must_use]
    pub fn value(&self) -> &[f32] {
        &self.value
    }

    /// Mutable access to the buffer contents.
    pub fn value_mut(&mut self) -> &mut [f32] {
        &mut self.value
    }
}

/// Device-resident form of [`Basic`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BasicDeviceRepresentation {
    /// Identifier, written by kernels.
    pub id: i32,
    /// The owned buffer, patched after the struct slot exists.
    pub value: DeviceSlice<f32>,
}

// Safety: repr(C) struct of scalars and device-address fields only
unsafe impl DeviceCopy for BasicDeviceRepresentation {}

/// Device allocations owned by one attached [`Basic`] mirror.
pub struct BasicAllocation<B: DeviceApi> {
    value: DeviceBuffer<f32, B>,
}

// Safety: the representation mirrors `image` field for field, and `attach`
//          patches the single pointer-valued field
unsafe impl<B: DeviceApi> MirrorToDevice<B> for Basic {
    type Allocation = BasicAllocation<B>;
    type DeviceRepresentation = BasicDeviceRepresentation;

    fn image(&self) -> Self::DeviceRepresentation {
        BasicDeviceRepresentation {
            id: self.id,
            value: DeviceSlice::null(self.value.len()),
        }
    }

    unsafe fn attach(
        &self,
        backend: &B,
        mut patcher: FieldPatcher<'_, B>,
    ) -> DeviceResult<Self::Allocation> {
        let value = self.value.mirror_to_device(backend)?;
        patcher.patch(
            offset_of!(BasicDeviceRepresentation, value),
            &value.as_slice(),
        )?;
        Ok(BasicAllocation { value })
    }

    unsafe fn sync_back(
        &mut self,
        _backend: &B,
        allocation: &mut Self::Allocation,
    ) -> DeviceResult<()> {
        self.value.sync_from_device(&allocation.value)
    }

    fn absorb(&mut self, image: &Self::DeviceRepresentation) {
        self.id = image.id;
    }
}

#[expect(clippy::cast_precision_loss)]
unsafe fn alter_attribute_entry(index: ThreadIndex, arg: *mut BasicDeviceRepresentation) {
    if index.block_idx != 0 {
        return;
    }
    // Safety: launched against a live, fully attached mirror
    unsafe { (*arg).id = 3 };
    // Safety: as above; `value` was patched to a live device buffer
    let value = unsafe { (*arg).value };
    if let Some(entry) = value.element(index.thread_idx as usize) {
        // Safety: `element` bounds-checked the index against the buffer
        unsafe { *entry = 3.0 + index.thread_idx as f32 };
    }
}

/// Kernel setting `id = 3` and `value[j] = 3.0 + j`.
#[must_use]
pub fn alter_attribute() -> Kernel<BasicDeviceRepresentation> {
    Kernel::new(alter_attribute_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::LaunchConfig, emulated::EmulatedDevice, mirror::MirroredOnHost};

    #[test]
    fn alter_attribute_matches_reference_output() {
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
    }
}
