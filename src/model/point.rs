//! Points with coordinates, a data field, and an optional Gauss weight.

use core::mem::offset_of;

use crate::{
    api::DeviceApi,
    error::DeviceResult,
    memory::{DeviceBuffer, DeviceCopy, DeviceSlice, FieldPatcher},
    mirror::{MirrorBuffer, MirrorToDevice},
};

/// A leaf object with an identifier, a 3-component coordinate buffer, a
/// data buffer, and an optional quadrature weight.
///
/// Weighted (Gauss) and unweighted points are one type; the weight is
/// simply absent for plain points, so arrays of points stay uniform on the
/// device.
#[derive(Clone, Debug)]
pub struct Point {
    id: i32,
    weight: Option<f32>,
    coords: MirrorBuffer<f32>,
    data: MirrorBuffer<f32>,
}

impl Point {
    /// A plain point with zeroed coordinates and `data_len` zeroed data
    /// entries.
    #[must_use]
    pub fn new(id: i32, data_len: usize) -> Self {
        Self {
            id,
            weight: None,
            coords: MirrorBuffer::zeroed(3),
            data: MirrorBuffer::zeroed(data_len),
        }
    }

    /// A Gauss point: a plain point plus a quadrature weight.
    #[must_use]
    pub fn gauss(id: i32, data_len: usize, weight: f32) -> Self {
        Self {
            weight: Some(weight),
            ..Self::new(id, data_len)
        }
    }

    /// The identifier.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// The quadrature weight, if this is a Gauss point.
    #[must_use]
    pub const fn weight(&self) -> Option<f32> {
        self.weight
    }

    /// The coordinates.
    #[must_use]
    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    /// Overwrites the coordinates.
    pub fn set_coords(&mut self, x: f32, y: f32, z: f32) {
        self.coords.copy_from_slice(&[x, y, z]);
    }

    /// The data entries.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to the data entries.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Device-resident form of [`Point`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PointDeviceRepresentation {
    /// Identifier, written by kernels.
    pub id: i32,
    /// Quadrature weight; meaningful only when `has_weight` holds.
    pub weight: f32,
    /// Whether this point carries a weight.
    pub has_weight: bool,
    /// Coordinate buffer, patched after the struct exists on the device.
    pub coords: DeviceSlice<f32>,
    /// Data buffer, patched after the struct exists on the device.
    pub data: DeviceSlice<f32>,
}

// Safety: repr(C) struct of scalars and device-address fields only
unsafe impl DeviceCopy for PointDeviceRepresentation {}

/// Device allocations owned by one attached [`Point`] mirror.
pub struct PointAllocation<B: DeviceApi> {
    coords: DeviceBuffer<f32, B>,
    data: DeviceBuffer<f32, B>,
}

// Safety: the representation mirrors `image` field for field, and `attach`
//          patches both pointer-valued fields
unsafe impl<B: DeviceApi> MirrorToDevice<B> for Point {
    type Allocation = PointAllocation<B>;
    type DeviceRepresentation = PointDeviceRepresentation;

    fn image(&self) -> Self::DeviceRepresentation {
        PointDeviceRepresentation {
            id: self.id,
            weight: self.weight.unwrap_or(0.0),
            has_weight: self.weight.is_some(),
            coords: DeviceSlice::null(self.coords.len()),
            data: DeviceSlice::null(self.data.len()),
        }
    }

    unsafe fn attach(
        &self,
        backend: &B,
        mut patcher: FieldPatcher<'_, B>,
    ) -> DeviceResult<Self::Allocation> {
        let coords = self.coords.mirror_to_device(backend)?;
        patcher.patch(
            offset_of!(PointDeviceRepresentation, coords),
            &coords.as_slice(),
        )?;

        let data = self.data.mirror_to_device(backend)?;
        patcher.patch(offset_of!(PointDeviceRepresentation, data), &data.as_slice())?;

        Ok(PointAllocation { coords, data })
    }

    unsafe fn sync_back(
        &mut self,
        _backend: &B,
        allocation: &mut Self::Allocation,
    ) -> DeviceResult<()> {
        self.coords.sync_from_device(&allocation.coords)?;
        self.data.sync_from_device(&allocation.data)
    }

    fn absorb(&mut self, image: &Self::DeviceRepresentation) {
        self.id = image.id;
        self.weight = image.has_weight.then_some(image.weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emulated::EmulatedDevice, mirror::LendToDevice};

    #[test]
    fn gauss_point_carries_weight_through_round_trip() {
        let device = EmulatedDevice::new();
        let mut point = Point::gauss(7, 5, 0.577);
        point.set_coords(1.0, 2.0, 3.0);

        point.lend_to_device_mut(&device, |_lease| Ok(())).unwrap();

        assert_eq!(point.id(), 7);
        assert_eq!(point.weight(), Some(0.577));
        assert_eq!(point.coords(), &[1.0, 2.0, 3.0]);
        assert_eq!(device.outstanding(), 0);
    }

    #[test]
    fn plain_point_has_no_weight() {
        let point = Point::new(0, 2);
        assert_eq!(point.weight(), None);
        assert!(point.data().iter().all(|entry| *entry == 0.0));
    }
}
