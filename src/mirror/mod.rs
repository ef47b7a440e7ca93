//! The mirroring protocol: keeping a host object graph and its device
//! mirror consistent across copy-in, compute, and copy-out.
//!
//! The protocol is strictly ordered per object:
//!
//! 1. **Setup**: the object's own struct image is copied to a freshly
//!    allocated device slot *first*; only then is each owned buffer mirrored
//!    and its device address patched into the corresponding field of the
//!    device-resident struct. Reversing this order would write the patch
//!    into memory that does not exist yet.
//! 2. **Compute**: kernels may run any number of times against the attached
//!    mirror.
//! 3. **Copy-out**: buffer contents are retrieved *while the device struct
//!    holding their addresses still exists*, then the struct itself is
//!    copied back and its scalar fields folded into the host object.
//! 4. **Release**: owned buffers are freed before the struct slot.
//!
//! Across independent objects no ordering is required; only the per-object
//! phase order matters.

use crate::{
    api::DeviceApi,
    error::DeviceResult,
    memory::{DeviceCopy, FieldPatcher},
};

mod buffer;
mod lend;
mod wrapper;

pub use buffer::MirrorBuffer;
pub use lend::{DeviceLease, LendToDevice};
pub use wrapper::{MirroredOnDevice, MirroredOnHost};

/// Types that can maintain a device mirror of themselves.
///
/// `DeviceRepresentation` is the `repr(C)` struct that actually lives on the
/// device: scalar fields plus [`crate::memory::DeviceSlice`] fields for each
/// owned buffer. `Allocation` owns the nested device allocations made during
/// [`Self::attach`]; dropping it releases them, and its field declaration
/// order encodes the teardown order (innermost buffers first, outward).
///
/// # Safety
///
/// Implementations must guarantee that [`Self::image`] produces a
/// representation whose layout matches what [`Self::attach`] patches and
/// what the type's kernels dereference, and that `attach` patches every
/// pointer-valued field it introduces (a kernel must never observe a
/// placeholder pointer).
pub unsafe trait MirrorToDevice<B: DeviceApi>: Sized {
    /// The device-resident form of this type.
    type DeviceRepresentation: DeviceCopy;

    /// Owner of the nested device allocations attached to one mirror.
    type Allocation;

    /// The host-side image of the device struct.
    ///
    /// Pointer-valued fields hold null placeholders; their correct device
    /// values cannot be computed on the host and are patched in by
    /// [`Self::attach`] once their allocations exist.
    fn image(&self) -> Self::DeviceRepresentation;

    /// Mirrors every owned buffer to the device and patches its address
    /// into the already-resident struct behind `patcher`.
    ///
    /// Composites recurse: the children array is allocated and patched into
    /// the parent first, then each child attaches itself into its element of
    /// that array.
    ///
    /// # Errors
    ///
    /// Propagates allocation and copy failures; an error leaves any
    /// already-attached buffers to be released by their own guards.
    ///
    /// # Safety
    ///
    /// `patcher` must view the live device copy of exactly the image this
    /// object produced via [`Self::image`].
    unsafe fn attach(
        &self,
        backend: &B,
        patcher: FieldPatcher<'_, B>,
    ) -> DeviceResult<Self::Allocation>;

    /// Copies every owned buffer's contents back into host storage.
    ///
    /// Runs while the device struct still exists; the enclosing struct's
    /// copy-out happens afterwards, through [`Self::absorb`].
    ///
    /// # Errors
    ///
    /// Propagates copy failures from the device capability.
    ///
    /// # Safety
    ///
    /// `allocation` must be the allocation returned by this object's
    /// [`Self::attach`], and a fence must have been issued since the last
    /// kernel launch against the mirror.
    unsafe fn sync_back(
        &mut self,
        backend: &B,
        allocation: &mut Self::Allocation,
    ) -> DeviceResult<()>;

    /// Folds the copied-back device struct's scalar fields into the host
    /// object. Pointer-valued fields of `image` are stale device addresses
    /// and must be ignored.
    fn absorb(&mut self, image: &Self::DeviceRepresentation);
}
