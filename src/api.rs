//! The external device capability consumed by the mirroring protocol.
//!
//! The core never talks to a concrete device runtime. Everything it needs —
//! raw allocation, directional bulk copies, kernel launches, and a fence —
//! is expressed through [`DeviceApi`], and a backend supplies the rest. The
//! crate ships one backend, [`crate::emulated::EmulatedDevice`], which runs
//! kernels in-process.

use crate::{
    error::DeviceResult,
    memory::{DeviceCopy, DevicePointer},
};

/// Direction of a bulk memory transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyDirection {
    /// Copy-in: host memory is the source, device memory the destination.
    HostToDevice,
    /// Copy-out: device memory is the source, host memory the destination.
    DeviceToHost,
}

/// Grid × block decomposition of one kernel launch.
///
/// Every workload in this crate is one-dimensional: an outer grid index over
/// independent objects and an inner block index over elements within one
/// object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of blocks in the grid (outer parallel dimension).
    pub grid: u32,
    /// Number of threads per block (inner parallel dimension).
    pub block: u32,
}

impl LaunchConfig {
    /// A launch of `grid` blocks of `block` threads each.
    #[must_use]
    pub const fn new(grid: u32, block: u32) -> Self {
        Self { grid, block }
    }
}

/// Position of one logical thread within a launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadIndex {
    /// Index of this thread's block within the grid.
    pub block_idx: u32,
    /// Index of this thread within its block.
    pub thread_idx: u32,
    /// Number of blocks in the grid.
    pub grid_dim: u32,
    /// Number of threads per block.
    pub block_dim: u32,
}

impl ThreadIndex {
    /// Flat index of this thread across the whole launch.
    #[must_use]
    pub fn flat(&self) -> usize {
        self.block_idx as usize * self.block_dim as usize + self.thread_idx as usize
    }
}

/// A unit of device work over a device-resident argument of type `T`.
///
/// The entry point runs once per logical thread. It receives the thread's
/// position and the device address of the argument; any pointer fields it
/// follows must have been patched before the launch.
pub struct Kernel<T: DeviceCopy> {
    entry: unsafe fn(ThreadIndex, *mut T),
}

impl<T: DeviceCopy> Clone for Kernel<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: DeviceCopy> Copy for Kernel<T> {}

impl<T: DeviceCopy> Kernel<T> {
    /// Wraps a kernel entry point.
    ///
    /// The entry point is an `unsafe fn` because it dereferences device
    /// memory; the launch capability guarantees it is only invoked with a
    /// live, fully attached argument.
    #[must_use]
    pub const fn new(entry: unsafe fn(ThreadIndex, *mut T)) -> Self {
        Self { entry }
    }

    /// The wrapped entry point, for backends to invoke.
    #[must_use]
    pub const fn entry(&self) -> unsafe fn(ThreadIndex, *mut T) {
        self.entry
    }
}

/// The device capability: allocator, bulk copy, kernel launch, fence.
///
/// Implementations are cheap handles onto a shared device context and are
/// cloned freely into every RAII allocation guard, so that releasing a guard
/// can always reach its allocator.
pub trait DeviceApi: Clone {
    /// Allocates `bytes` bytes of device memory.
    ///
    /// A zero-byte request returns a unique live handle, so that empty
    /// buffers still own a distinguishable allocation.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OutOfMemory`](crate::error::DeviceError) if
    /// the pool cannot satisfy the request. Allocation failure is fatal to
    /// the mirroring protocol; there is no recovery path.
    fn alloc_bytes(&self, bytes: usize) -> DeviceResult<DevicePointer<u8>>;

    /// Releases a device allocation.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DoubleFree`](crate::error::DeviceError) if the
    /// handle does not refer to a live allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::alloc_bytes`] on this same
    /// device, and no copy or kernel may use the allocation afterwards.
    unsafe fn free_bytes(&self, ptr: DevicePointer<u8>) -> DeviceResult<()>;

    /// Blocking bulk copy of `bytes` bytes between host and device memory.
    ///
    /// For [`CopyDirection::HostToDevice`], `src` is a host address and
    /// `dst` a device address; for [`CopyDirection::DeviceToHost`] the roles
    /// are swapped. Because the copy blocks, it also acts as a fence for any
    /// previously launched kernel that the copy depends on.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidPointer`](crate::error::DeviceError) if
    /// the device-side range does not lie within a live allocation.
    ///
    /// # Safety
    ///
    /// The host-side pointer must be valid for `bytes` bytes in the stated
    /// direction, and the ranges must not overlap.
    unsafe fn copy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        direction: CopyDirection,
    ) -> DeviceResult<()>;

    /// Enqueues one kernel launch over `config.grid × config.block` threads.
    ///
    /// The launch is fire-and-forget from the host's point of view; callers
    /// must [`Self::synchronize`] (or issue a blocking copy) before reading
    /// any memory the kernel writes.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::LaunchFailure`](crate::error::DeviceError) for
    /// a degenerate configuration and
    /// [`DeviceError::InvalidPointer`](crate::error::DeviceError) if `arg`
    /// is not a live allocation.
    ///
    /// # Safety
    ///
    /// `arg` must be the live, fully attached device mirror of a value of
    /// type `T`: the struct slot must exist and every pointer-valued field
    /// the kernel follows must have been patched.
    unsafe fn launch<T: DeviceCopy>(
        &self,
        config: LaunchConfig,
        kernel: Kernel<T>,
        arg: DevicePointer<T>,
    ) -> DeviceResult<()>;

    /// Blocks until all previously enqueued work has completed.
    ///
    /// # Errors
    ///
    /// Propagates any failure reported by outstanding device work.
    fn synchronize(&self) -> DeviceResult<()>;
}
