//! Lines (composites of points) and sets of lines.

use core::mem::offset_of;

use crate::{
    api::{DeviceApi, Kernel, ThreadIndex},
    error::DeviceResult,
    memory::{DeviceBuffer, DeviceCopy, DeviceSlice, FieldPatcher},
    mirror::MirrorToDevice,
    model::point::{Point, PointAllocation, PointDeviceRepresentation},
};

/// Quadrature weight used by the stock line layout (one-point Gauss rule).
pub const DEFAULT_GAUSS_WEIGHT: f32 = 0.577;

/// A composite object owning an array of points: plain points first,
/// Gauss points after them.
#[derive(Clone, Debug)]
pub struct Line {
    id: i32,
    plain_points: usize,
    points: Vec<Point>,
}

impl Line {
    /// A line with `plain` plain points and `gauss` Gauss points, each with
    /// `data_len` data entries.
    ///
    /// Plain point identifiers are globally unique
    /// (`line id * plain + index`); Gauss points are numbered per line and
    /// carry [`DEFAULT_GAUSS_WEIGHT`].
    #[must_use]
    pub fn with_layout(id: i32, plain: usize, gauss: usize, data_len: usize) -> Self {
        #[expect(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let points = (0..plain)
            .map(|index| Point::new(id * plain as i32 + index as i32, data_len))
            .chain((0..gauss).map(|index| Point::gauss(index as i32, data_len, DEFAULT_GAUSS_WEIGHT)))
            .collect();
        Self {
            id,
            plain_points: plain,
            points,
        }
    }

    /// A line over explicit points. Plain points must precede Gauss points
    /// so that device-side code can split the array by one index.
    #[must_use]
    pub fn from_points(id: i32, points: Vec<Point>) -> Self {
        let plain_points = points
            .iter()
            .take_while(|point| point.weight().is_none())
            .count();
        Self {
            id,
            plain_points,
            points,
        }
    }

    /// The identifier.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Number of plain (unweighted) points at the front of the array.
    #[must_use]
    pub const fn plain_points(&self) -> usize {
        self.plain_points
    }

    /// The owned points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Mutable access to the owned points.
    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }
}

/// Device-resident form of [`Line`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LineDeviceRepresentation {
    /// Identifier.
    pub id: i32,
    /// Number of plain points at the front of `points`.
    pub plain_points: u32,
    /// The children array, patched after the struct exists on the device.
    pub points: DeviceSlice<PointDeviceRepresentation>,
}

// Safety: repr(C) struct of scalars and device-address fields only
unsafe impl DeviceCopy for LineDeviceRepresentation {}

/// Device allocations owned by one attached [`Line`] mirror.
pub struct LineAllocation<B: DeviceApi> {
    // Declared before `points`: each child's buffers are released before
    // the children array whose elements point at them.
    children: Vec<PointAllocation<B>>,
    points: DeviceBuffer<PointDeviceRepresentation, B>,
}

// Safety: the representation mirrors `image` field for field; `attach`
//          patches the children-array field and recurses into every child
unsafe impl<B: DeviceApi> MirrorToDevice<B> for Line {
    type Allocation = LineAllocation<B>;
    type DeviceRepresentation = LineDeviceRepresentation;

    #[expect(clippy::cast_possible_truncation)]
    fn image(&self) -> Self::DeviceRepresentation {
        LineDeviceRepresentation {
            id: self.id,
            plain_points: self.plain_points as u32,
            points: DeviceSlice::null(self.points.len()),
        }
    }

    unsafe fn attach(
        &self,
        backend: &B,
        mut patcher: FieldPatcher<'_, B>,
    ) -> DeviceResult<Self::Allocation> {
        // Children array first (placeholder pointers inside each element),
        // patched into the parent; then each child attaches into its
        // element of the live array.
        let images: Vec<PointDeviceRepresentation> = self
            .points
            .iter()
            .map(<Point as MirrorToDevice<B>>::image)
            .collect();
        let mut points = DeviceBuffer::from_slice(backend, &images)?;
        patcher.patch(
            offset_of!(LineDeviceRepresentation, points),
            &points.as_slice(),
        )?;

        let mut children = Vec::with_capacity(self.points.len());
        for (index, point) in self.points.iter().enumerate() {
            let element = points.element_patcher(index)?;
            // Safety: `element` views the live device copy of this child's
            //          image within the children array
            children.push(unsafe { point.attach(backend, element) }?);
        }

        Ok(LineAllocation { children, points })
    }

    unsafe fn sync_back(
        &mut self,
        backend: &B,
        allocation: &mut Self::Allocation,
    ) -> DeviceResult<()> {
        // Children before the parent: each child's buffers come back while
        // the children array (holding their addresses) still exists, then
        // the array itself so kernel-written child scalars are absorbed.
        for (point, child) in self.points.iter_mut().zip(allocation.children.iter_mut()) {
            // Safety: `child` is the allocation this child's `attach`
            //          returned; the caller already fenced the backend
            unsafe { point.sync_back(backend, child) }?;
        }

        let mut images: Vec<PointDeviceRepresentation> = self
            .points
            .iter()
            .map(<Point as MirrorToDevice<B>>::image)
            .collect();
        allocation.points.copy_to_slice(&mut images)?;
        for (point, image) in self.points.iter_mut().zip(images.iter()) {
            <Point as MirrorToDevice<B>>::absorb(point, image);
        }

        Ok(())
    }

    fn absorb(&mut self, image: &Self::DeviceRepresentation) {
        self.id = image.id;
    }
}

/// A composite of composites: an owned array of [`Line`]s.
#[derive(Clone, Debug)]
pub struct LineSet {
    lines: Vec<Line>,
}

impl LineSet {
    /// A set over explicit lines.
    #[must_use]
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines }
    }

    /// The owned lines.
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Mutable access to the owned lines.
    pub fn lines_mut(&mut self) -> &mut [Line] {
        &mut self.lines
    }
}

/// Device-resident form of [`LineSet`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct LineSetDeviceRepresentation {
    /// The lines array, patched after the struct exists on the device.
    pub lines: DeviceSlice<LineDeviceRepresentation>,
}

// Safety: repr(C) struct of device-address fields only
unsafe impl DeviceCopy for LineSetDeviceRepresentation {}

/// Device allocations owned by one attached [`LineSet`] mirror.
pub struct LineSetAllocation<B: DeviceApi> {
    // Declared before `lines`: every line's own allocations are released
    // before the lines array.
    children: Vec<LineAllocation<B>>,
    lines: DeviceBuffer<LineDeviceRepresentation, B>,
}

// Safety: the representation mirrors `image` field for field; `attach`
//          patches the lines-array field and recurses into every line
unsafe impl<B: DeviceApi> MirrorToDevice<B> for LineSet {
    type Allocation = LineSetAllocation<B>;
    type DeviceRepresentation = LineSetDeviceRepresentation;

    fn image(&self) -> Self::DeviceRepresentation {
        LineSetDeviceRepresentation {
            lines: DeviceSlice::null(self.lines.len()),
        }
    }

    unsafe fn attach(
        &self,
        backend: &B,
        mut patcher: FieldPatcher<'_, B>,
    ) -> DeviceResult<Self::Allocation> {
        let images: Vec<LineDeviceRepresentation> = self
            .lines
            .iter()
            .map(<Line as MirrorToDevice<B>>::image)
            .collect();
        let mut lines = DeviceBuffer::from_slice(backend, &images)?;
        patcher.patch(
            offset_of!(LineSetDeviceRepresentation, lines),
            &lines.as_slice(),
        )?;

        let mut children = Vec::with_capacity(self.lines.len());
        for (index, line) in self.lines.iter().enumerate() {
            let element = lines.element_patcher(index)?;
            // Safety: `element` views the live device copy of this line's
            //          image within the lines array
            children.push(unsafe { line.attach(backend, element) }?);
        }

        Ok(LineSetAllocation { children, lines })
    }

    unsafe fn sync_back(
        &mut self,
        backend: &B,
        allocation: &mut Self::Allocation,
    ) -> DeviceResult<()> {
        for (line, child) in self.lines.iter_mut().zip(allocation.children.iter_mut()) {
            // Safety: `child` is the allocation this line's `attach`
            //          returned; the caller already fenced the backend
            unsafe { line.sync_back(backend, child) }?;
        }

        let mut images: Vec<LineDeviceRepresentation> = self
            .lines
            .iter()
            .map(<Line as MirrorToDevice<B>>::image)
            .collect();
        allocation.lines.copy_to_slice(&mut images)?;
        for (line, image) in self.lines.iter_mut().zip(images.iter()) {
            <Line as MirrorToDevice<B>>::absorb(line, image);
        }

        Ok(())
    }

    fn absorb(&mut self, _image: &Self::DeviceRepresentation) {}
}

#[expect(clippy::cast_precision_loss)]
unsafe fn update_point_data_entry(index: ThreadIndex, arg: *mut LineSetDeviceRepresentation) {
    // Safety: launched against a live, fully attached mirror
    let lines = unsafe { (*arg).lines };
    let Some(line) = lines.element(index.block_idx as usize) else {
        return;
    };
    // Safety: `element` bounds-checked the index; the line struct is
    //          device-resident and fully patched
    let line = unsafe { *line };

    let point_index = index.thread_idx as usize;
    let Some(point) = line.points.element(point_index) else {
        return;
    };
    // Safety: as above, for the point element
    let point = unsafe { *point };

    if point.has_weight {
        let gauss_index = point_index - line.plain_points as usize;
        if let Some(entry) = point.data.element(1) {
            // Safety: `element` bounds-checked the data index
            unsafe { *entry = (gauss_index as f32 + 1.0) * 2.5 };
        }
    } else if let Some(entry) = point.data.element(0) {
        // Safety: `element` bounds-checked the data index
        unsafe { *entry = point_index as f32 * 1.5 };
    }
}

/// Kernel over a [`LineSet`]: one block per line, one thread per point.
///
/// Plain points get `data[0] = point index * 1.5`; Gauss points get
/// `data[1] = (gauss index + 1) * 2.5`.
#[must_use]
pub fn update_point_data() -> Kernel<LineSetDeviceRepresentation> {
    Kernel::new(update_point_data_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::LaunchConfig, emulated::EmulatedDevice, mirror::LendToDevice};

    fn small_set() -> LineSet {
        LineSet::new(
            (0..3)
                .map(|id| Line::with_layout(id, 3, 2, 5))
                .collect(),
        )
    }

    #[test]
    fn layout_places_plain_points_before_gauss_points() {
        let line = Line::with_layout(1, 3, 2, 5);
        assert_eq!(line.plain_points(), 3);
        assert_eq!(line.points().len(), 5);
        assert!(line.points()[..3].iter().all(|p| p.weight().is_none()));
        assert!(line.points()[3..].iter().all(|p| p.weight().is_some()));
        assert_eq!(line.points()[1].id(), 4);
    }

    #[test]
    fn update_kernel_writes_expected_entries() {
        let device = EmulatedDevice::new();
        let mut set = small_set();

        set.lend_to_device_mut(&device, |lease| {
            lease.launch(LaunchConfig::new(3, 5), update_point_data())
        })
        .unwrap();

        for line in set.lines() {
            for (index, point) in line.points().iter().enumerate() {
                if let Some(_weight) = point.weight() {
                    let gauss_index = index - line.plain_points();
                    assert_eq!(point.data()[1], (gauss_index as f32 + 1.0) * 2.5);
                } else {
                    assert_eq!(point.data()[0], index as f32 * 1.5);
                }
            }
        }
        assert_eq!(device.outstanding(), 0);
        assert_eq!(device.faults(), 0);
    }

    #[test]
    fn teardown_releases_children_before_parents() {
        let device = EmulatedDevice::new();
        let line = Line::with_layout(0, 2, 0, 2);

        let image = <Line as MirrorToDevice<EmulatedDevice>>::image(&line);
        let mut slot = crate::memory::DeviceSlot::new(&device, &image).unwrap();
        let allocation = unsafe { line.attach(&device, slot.patcher()) }.unwrap();

        let children_array_addr = allocation.points.as_device_ptr().addr();
        let struct_addr = slot.as_device_ptr().addr();
        let _ = device.take_free_log();

        drop(allocation);
        drop(slot);

        let log = device.take_free_log();
        let array_pos = log
            .iter()
            .position(|addr| *addr == children_array_addr)
            .unwrap();
        let struct_pos = log.iter().position(|addr| *addr == struct_addr).unwrap();

        // Child buffers (2 points × coords + data) precede the children
        // array, which precedes the struct slot.
        assert_eq!(log.len(), 6);
        assert_eq!(array_pos, 4);
        assert_eq!(struct_pos, 5);
        assert_eq!(device.faults(), 0);
        assert_eq!(device.outstanding(), 0);
    }
}
