//! Typed device memory primitives.
//!
//! Device addresses live in a separate address space from the host. The host
//! program must store the handle that the allocation capability returns and
//! may never derive a device address from a host address. The types in this
//! module keep that distinction in the type system: a [`DevicePointer`] only
//! ever holds a device address, and a [`DeviceSlice`] carries its element
//! count explicitly next to the pointer so that no length is ever re-derived
//! from pointer arithmetic.

use core::fmt;

mod slot;

pub use slot::{DeviceBuffer, DeviceSlot, FieldPatcher};

/// Marker for types whose bytes may be copied verbatim across the
/// host/device boundary.
///
/// # Safety
///
/// The type must be valid for any bit pattern it can be observed with after
/// a round-trip through device memory, and must not own or borrow any
/// host-address-space resource (no host pointers, no `Drop` obligations).
/// Device-address-space pointers ([`DevicePointer`], [`DeviceSlice`]) are
/// fine: they are opaque on the host and only dereferenced device-side.
pub unsafe trait DeviceCopy: Copy + 'static {}

macro_rules! impl_device_copy {
    ($($ty:ty),* $(,)?) => {
        $(
            // Safety: fixed-width primitive with no host resources attached
            unsafe impl DeviceCopy for $ty {}
        )*
    };
}

impl_device_copy! {
    u8, u16, u32, u64, usize,
    i8, i16, i32, i64, isize,
    f32, f64,
    bool,
}

// Safety: arrays of device-copyable elements are device-copyable
unsafe impl<T: DeviceCopy, const N: usize> DeviceCopy for [T; N] {}

/// An opaque, typed address in device memory.
///
/// The null pointer serves as the placeholder value for pointer-valued
/// struct fields that have not been patched yet.
#[repr(transparent)]
pub struct DevicePointer<T> {
    ptr: *mut T,
}

impl<T> Clone for DevicePointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePointer<T> {}

impl<T> PartialEq for DevicePointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for DevicePointer<T> {}

impl<T> fmt::Debug for DevicePointer<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_tuple("DevicePointer")
            .field(&format_args!("{:#x}", self.ptr as usize))
            .finish()
    }
}

// Safety: a device address is plain data on the host; it is only ever
//          dereferenced inside device code
unsafe impl<T: 'static> DeviceCopy for DevicePointer<T> {}

impl<T> DevicePointer<T> {
    /// The null placeholder, used for not-yet-patched pointer fields.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: core::ptr::null_mut(),
        }
    }

    /// Wraps a raw device address.
    ///
    /// The address must have been returned by the device allocation
    /// capability; this constructor performs no validation.
    #[must_use]
    pub const fn from_raw(ptr: *mut T) -> Self {
        Self { ptr }
    }

    /// Returns the raw device address.
    #[must_use]
    pub const fn as_raw(self) -> *mut T {
        self.ptr
    }

    /// Returns the device address as an integer, for diagnostics.
    #[must_use]
    pub fn addr(self) -> usize {
        self.ptr as usize
    }

    /// Whether this is the null placeholder.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.ptr.is_null()
    }

    /// Reinterprets the pointee type.
    #[must_use]
    pub const fn cast<U>(self) -> DevicePointer<U> {
        DevicePointer {
            ptr: self.ptr.cast(),
        }
    }
}

/// A device-resident array: base address plus explicit element count.
///
/// The count always travels with the pointer. Deriving a transfer length
/// from anything else (in particular from `size_of` arithmetic on the
/// pointer type) is the classic latent bug this type exists to rule out.
#[repr(C)]
pub struct DeviceSlice<T> {
    ptr: DevicePointer<T>,
    len: usize,
}

impl<T> Clone for DeviceSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DeviceSlice<T> {}

impl<T> fmt::Debug for DeviceSlice<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("DeviceSlice")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

// Safety: pointer + length pair with no host resources attached
unsafe impl<T: 'static> DeviceCopy for DeviceSlice<T> {}

impl<T> DeviceSlice<T> {
    /// A placeholder slice of `len` elements with a null base address.
    ///
    /// This is the value a pointer-valued field holds in a struct image
    /// before the owning struct's device slot has been allocated and the
    /// field has been patched.
    #[must_use]
    pub const fn null(len: usize) -> Self {
        Self {
            ptr: DevicePointer::null(),
            len,
        }
    }

    /// Assembles a slice from a device base address and element count.
    #[must_use]
    pub const fn from_raw_parts(ptr: DevicePointer<T>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// The device base address.
    #[must_use]
    pub const fn as_ptr(self) -> DevicePointer<T> {
        self.ptr
    }

    /// The element count.
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Whether the slice holds no elements.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Bounds-checked address of element `index`, for device-side access.
    ///
    /// Returns `None` when `index` is out of range, so kernels cannot walk
    /// past the transferred region.
    #[must_use]
    pub fn element(self, index: usize) -> Option<*mut T> {
        if index < self.len {
            Some(self.ptr.as_raw().wrapping_add(index))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointer_is_placeholder() {
        let ptr = DevicePointer::<f32>::null();
        assert!(ptr.is_null());
        assert_eq!(ptr.addr(), 0);
    }

    #[test]
    fn slice_carries_explicit_len() {
        let slice = DeviceSlice::<f32>::null(5);
        assert_eq!(slice.len(), 5);
        assert!(!slice.is_empty());
        assert!(DeviceSlice::<f32>::null(0).is_empty());
    }

    #[test]
    fn element_access_is_bounds_checked() {
        let slice = DeviceSlice::<f32>::null(2);
        assert!(slice.element(1).is_some());
        assert!(slice.element(2).is_none());
    }
}
