//! Error type shared by the device capability and the mirroring protocol.

/// Result alias used across the crate.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failures reported by a device capability or by the mirroring protocol
/// built on top of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device memory pool cannot satisfy an allocation request.
    ///
    /// Fatal to the mirroring protocol: there is no partial-attach recovery,
    /// only release and propagate.
    #[error(
        "out of device memory: requested {requested} bytes with {in_use} of {capacity} in use"
    )]
    OutOfMemory {
        /// Size of the rejected request in bytes.
        requested: usize,
        /// Bytes held by live allocations at the time of the request.
        in_use: usize,
        /// Total pool capacity in bytes.
        capacity: usize,
    },

    /// A device-side address range does not lie within any live allocation.
    #[error("invalid device pointer: {bytes} bytes at {addr:#x}")]
    InvalidPointer {
        /// Base device address of the rejected access.
        addr: usize,
        /// Length of the rejected access in bytes.
        bytes: usize,
    },

    /// A release was requested for a handle that is not live.
    #[error("double free of device allocation at {addr:#x}")]
    DoubleFree {
        /// Device address of the rejected release.
        addr: usize,
    },

    /// A transfer or patch does not match the size recorded at allocation.
    ///
    /// Lengths are always carried explicitly next to their pointers, so a
    /// mismatch is a protocol bug on the caller's side, never a device
    /// condition.
    #[error("size mismatch: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// Size the live region or buffer was created with, in bytes.
        expected: usize,
        /// Size implied by the rejected operation, in bytes.
        found: usize,
    },

    /// The device rejected a kernel launch.
    #[error("kernel launch failed: {reason}")]
    LaunchFailure {
        /// Backend-reported rejection reason.
        reason: &'static str,
    },
}
