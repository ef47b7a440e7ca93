//! Typestate wrapper moving a mirrored value between host and device.
//!
//! The two states encode the protocol's state machine in the type system:
//! kernel launches only exist on [`MirroredOnDevice`], and a value that has
//! moved back to the host no longer has any device operation to misuse.

use core::ops::{Deref, DerefMut};

use crate::{
    api::{DeviceApi, Kernel, LaunchConfig},
    error::DeviceResult,
    memory::{DevicePointer, DeviceSlot},
    mirror::MirrorToDevice,
};

/// A mirrored value currently resident on the host only.
///
/// Derefs to the inner value for host-side mutation between device trips.
pub struct MirroredOnHost<T: MirrorToDevice<B>, B: DeviceApi> {
    value: T,
    backend: B,
}

impl<T: MirrorToDevice<B>, B: DeviceApi> MirroredOnHost<T, B> {
    /// Wraps a host value for mirroring on `backend`.
    pub fn new(value: T, backend: &B) -> Self {
        Self {
            value,
            backend: backend.clone(),
        }
    }

    /// Moves the value to the device: struct slot first, then owned buffers
    /// with their pointer patches.
    ///
    /// # Errors
    ///
    /// Returns an error if any allocation or copy fails; partially attached
    /// device state is released before the error propagates.
    pub fn move_to_device(self) -> DeviceResult<MirroredOnDevice<T, B>> {
        let span = tracing::debug_span!("move_to_device");
        let _entered = span.enter();

        let Self { value, backend } = self;

        let image = value.image();
        let mut slot = DeviceSlot::new(&backend, &image)?;
        // Safety: `slot` holds the live device copy of exactly `image`
        let allocation = unsafe { value.attach(&backend, slot.patcher()) }?;

        Ok(MirroredOnDevice {
            value,
            allocation,
            slot,
            backend,
        })
    }

    /// Unwraps the inner value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: MirrorToDevice<B>, B: DeviceApi> Deref for MirroredOnHost<T, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: MirrorToDevice<B>, B: DeviceApi> DerefMut for MirroredOnHost<T, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/// A mirrored value whose device copy is live and fully attached.
///
/// This is the only state in which kernels can run. Host access to the
/// inner value is deliberately unavailable here: the device copy is the
/// authoritative one until [`Self::move_to_host`].
pub struct MirroredOnDevice<T: MirrorToDevice<B>, B: DeviceApi> {
    value: T,
    // Declared before `slot`: owned buffers are released before the struct
    // slot whose fields point at them.
    allocation: T::Allocation,
    slot: DeviceSlot<T::DeviceRepresentation, B>,
    backend: B,
}

impl<T: MirrorToDevice<B>, B: DeviceApi> MirroredOnDevice<T, B> {
    /// Launches `kernel` over the attached mirror.
    ///
    /// The launch is asynchronous; [`Self::move_to_host`] fences before any
    /// copy-out, and repeated launches against the same mirror are allowed.
    ///
    /// # Errors
    ///
    /// Propagates launch rejection from the device capability.
    pub fn launch(
        &mut self,
        config: LaunchConfig,
        kernel: Kernel<T::DeviceRepresentation>,
    ) -> DeviceResult<()> {
        // Safety: the slot is live and `attach` patched every pointer field
        unsafe { self.backend.launch(config, kernel, self.slot.as_device_ptr()) }
    }

    /// The device address of the mirrored struct.
    #[must_use]
    pub fn as_device_ptr(&self) -> DevicePointer<T::DeviceRepresentation> {
        self.slot.as_device_ptr()
    }

    /// Moves the value back to the host: fence, buffer copy-out while the
    /// device struct still exists, struct copy-out, then release (buffers
    /// before the struct slot).
    ///
    /// # Errors
    ///
    /// Returns an error if the fence or any copy fails; device state is
    /// still released by the RAII guards.
    pub fn move_to_host(self) -> DeviceResult<MirroredOnHost<T, B>> {
        let span = tracing::debug_span!("move_to_host");
        let _entered = span.enter();

        let Self {
            mut value,
            mut allocation,
            slot,
            backend,
        } = self;

        backend.synchronize()?;

        // Buffer contents first: their addresses live in the device struct,
        // which must still exist while they are retrieved.
        // Safety: `allocation` came from this value's `attach` and the
        //          backend was just fenced
        unsafe { value.sync_back(&backend, &mut allocation) }?;

        let mut image = value.image();
        slot.copy_to(&mut image)?;
        value.absorb(&image);

        // Teardown order: owned buffers, then the struct slot.
        drop(allocation);
        drop(slot);

        Ok(MirroredOnHost { value, backend })
    }
}
