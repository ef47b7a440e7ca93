//! Closure-scoped lending of a value's device mirror.
//!
//! Where the exchange wrapper moves a value between states, lending keeps
//! the borrow on the host side: the mirror exists exactly for the duration
//! of the closure, and the full attach → compute → sync-back → release
//! sequence runs inside one call.

use crate::{
    api::{DeviceApi, Kernel, LaunchConfig},
    error::DeviceResult,
    memory::{DeviceCopy, DevicePointer, DeviceSlot},
    mirror::MirrorToDevice,
};

/// Handle to a live, fully attached device mirror, scoped to a lend
/// closure.
pub struct DeviceLease<'a, R: DeviceCopy, B: DeviceApi> {
    backend: &'a B,
    slot: &'a mut DeviceSlot<R, B>,
}

impl<R: DeviceCopy, B: DeviceApi> DeviceLease<'_, R, B> {
    /// Launches `kernel` over the leased mirror.
    ///
    /// # Errors
    ///
    /// Propagates launch rejection from the device capability.
    pub fn launch(&mut self, config: LaunchConfig, kernel: Kernel<R>) -> DeviceResult<()> {
        // Safety: a lease only exists while the slot is live and attached
        unsafe { self.backend.launch(config, kernel, self.slot.as_device_ptr()) }
    }

    /// The device address of the leased struct.
    #[must_use]
    pub fn as_device_ptr(&self) -> DevicePointer<R> {
        self.slot.as_device_ptr()
    }
}

/// Scoped host→device→host lending for any mirrorable type.
pub trait LendToDevice<B: DeviceApi>: MirrorToDevice<B> {
    /// Lends an immutable device copy of `&self` for the duration of
    /// `inner`.
    ///
    /// Device-side writes are *not* reflected back: the mirror is released
    /// without a sync-back, so after the call `&self` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if mirroring fails or `inner` fails.
    fn lend_to_device<O, F>(&self, backend: &B, inner: F) -> DeviceResult<O>
    where
        F: FnOnce(&mut DeviceLease<'_, Self::DeviceRepresentation, B>) -> DeviceResult<O>;

    /// Lends a mutable device copy of `&mut self` for the duration of
    /// `inner`, syncing buffers and kernel-written scalar fields back
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if mirroring, `inner`, the fence, or the sync-back
    /// fails.
    fn lend_to_device_mut<O, F>(&mut self, backend: &B, inner: F) -> DeviceResult<O>
    where
        F: FnOnce(&mut DeviceLease<'_, Self::DeviceRepresentation, B>) -> DeviceResult<O>;
}

impl<B: DeviceApi, T: MirrorToDevice<B>> LendToDevice<B> for T {
    fn lend_to_device<O, F>(&self, backend: &B, inner: F) -> DeviceResult<O>
    where
        F: FnOnce(&mut DeviceLease<'_, Self::DeviceRepresentation, B>) -> DeviceResult<O>,
    {
        let span = tracing::debug_span!("lend_to_device");
        let _entered = span.enter();

        let image = self.image();
        let mut slot = DeviceSlot::new(backend, &image)?;
        // Safety: `slot` holds the live device copy of exactly `image`
        let allocation = unsafe { self.attach(backend, slot.patcher()) }?;

        let result = inner(&mut DeviceLease {
            backend,
            slot: &mut slot,
        });

        // No sync-back: the lend was immutable. Buffers before the slot.
        drop(allocation);
        drop(slot);

        result
    }

    fn lend_to_device_mut<O, F>(&mut self, backend: &B, inner: F) -> DeviceResult<O>
    where
        F: FnOnce(&mut DeviceLease<'_, Self::DeviceRepresentation, B>) -> DeviceResult<O>,
    {
        let span = tracing::debug_span!("lend_to_device_mut");
        let _entered = span.enter();

        let image = self.image();
        let mut slot = DeviceSlot::new(backend, &image)?;
        // Safety: `slot` holds the live device copy of exactly `image`
        let mut allocation = unsafe { self.attach(backend, slot.patcher()) }?;

        let result = inner(&mut DeviceLease {
            backend,
            slot: &mut slot,
        });

        backend.synchronize()?;

        // Safety: `allocation` came from this value's `attach` and the
        //          backend was just fenced
        unsafe { self.sync_back(backend, &mut allocation) }?;

        let mut image = self.image();
        slot.copy_to(&mut image)?;
        self.absorb(&image);

        drop(allocation);
        drop(slot);

        result
    }
}
