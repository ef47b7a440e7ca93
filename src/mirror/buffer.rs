//! Host-side owned buffers that mirror to device arrays.

use core::ops::{Deref, DerefMut};

use crate::{
    api::DeviceApi,
    error::DeviceResult,
    memory::{DeviceBuffer, DeviceCopy},
};

/// A host-owned contiguous buffer with an explicit element count, the unit
/// of bulk data inside mirrored objects.
///
/// The buffer itself owns only host storage. Mirroring produces an RAII
/// [`DeviceBuffer`] that the owning object's allocation holds for as long as
/// the mirror is attached; releasing the device copy is that guard's drop,
/// which keeps "sync after release" out of the reachable states.
#[derive(Clone, Debug)]
pub struct MirrorBuffer<T: DeviceCopy> {
    host: Vec<T>,
}

impl<T: DeviceCopy + Default> MirrorBuffer<T> {
    /// A zero-filled buffer of `len` elements (zero-filled by convention,
    /// matching bulk-zero host allocation).
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self {
            host: vec![T::default(); len],
        }
    }
}

impl<T: DeviceCopy> MirrorBuffer<T> {
    /// Takes ownership of existing host contents.
    #[must_use]
    pub fn from_vec(host: Vec<T>) -> Self {
        Self { host }
    }

    /// Allocates device storage of the same length and copies the host
    /// contents in.
    ///
    /// # Errors
    ///
    /// Returns an error if device allocation or the copy-in fails.
    pub fn mirror_to_device<B: DeviceApi>(&self, backend: &B) -> DeviceResult<DeviceBuffer<T, B>> {
        DeviceBuffer::from_slice(backend, &self.host)
    }

    /// Copies the device contents back into host storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or the lengths diverge.
    pub fn sync_from_device<B: DeviceApi>(
        &mut self,
        mirror: &DeviceBuffer<T, B>,
    ) -> DeviceResult<()> {
        mirror.copy_to_slice(&mut self.host)
    }
}

impl<T: DeviceCopy> Deref for MirrorBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.host
    }
}

impl<T: DeviceCopy> DerefMut for MirrorBuffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.host
    }
}

impl<T: DeviceCopy> From<Vec<T>> for MirrorBuffer<T> {
    fn from(host: Vec<T>) -> Self {
        Self::from_vec(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedDevice;

    #[test]
    fn round_trips_through_device_storage() {
        let device = EmulatedDevice::new();
        let mut buffer = MirrorBuffer::from_vec(vec![1.0f32, 2.0, 3.0]);

        let mirror = buffer.mirror_to_device(&device).unwrap();
        buffer.iter_mut().for_each(|value| *value = 0.0);
        buffer.sync_from_device(&mirror).unwrap();

        assert_eq!(&*buffer, &[1.0, 2.0, 3.0]);
        drop(mirror);
        assert_eq!(device.outstanding(), 0);
    }

    #[test]
    fn empty_buffer_round_trips() {
        let device = EmulatedDevice::new();
        let mut buffer = MirrorBuffer::<f32>::zeroed(0);
        let mirror = buffer.mirror_to_device(&device).unwrap();
        buffer.sync_from_device(&mirror).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn zeroed_buffer_is_zero_filled() {
        let buffer = MirrorBuffer::<f32>::zeroed(4);
        assert!(buffer.iter().all(|value| *value == 0.0));
    }
}
