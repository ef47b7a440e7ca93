//! RAII guards for single-struct and array device allocations.

use core::{marker::PhantomData, mem};

use crate::{
    api::{CopyDirection, DeviceApi},
    error::{DeviceError, DeviceResult},
    memory::{DeviceCopy, DevicePointer, DeviceSlice},
};

/// A single device-resident struct of type `T`.
///
/// Construction allocates the device slot and copies the host image in; drop
/// releases the allocation. The slot must be live before any pointer-valued
/// field inside it can be patched, which is why [`FieldPatcher`] can only be
/// obtained from a live slot.
pub struct DeviceSlot<T: DeviceCopy, B: DeviceApi> {
    backend: B,
    ptr: DevicePointer<T>,
}

impl<T: DeviceCopy, B: DeviceApi> DeviceSlot<T, B> {
    /// Allocates a device slot and copies `value` into it.
    ///
    /// Pointer-valued fields of `value` are expected to hold null
    /// placeholders at this point; they are patched afterwards, once their
    /// own allocations exist.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or the copy-in fails. A slot whose
    /// copy-in failed is released again before the error propagates.
    pub fn new(backend: &B, value: &T) -> DeviceResult<Self> {
        let raw = backend.alloc_bytes(mem::size_of::<T>())?;
        let mut slot = Self {
            backend: backend.clone(),
            ptr: raw.cast(),
        };
        slot.copy_from(value)?;
        Ok(slot)
    }

    /// Copies a fresh host image into the live slot.
    ///
    /// # Errors
    ///
    /// Propagates copy failures from the device capability.
    pub fn copy_from(&mut self, value: &T) -> DeviceResult<()> {
        // Safety: the slot owns a live allocation of exactly
        //          `size_of::<T>()` bytes and `value` is a live reference
        unsafe {
            self.backend.copy(
                self.ptr.cast::<u8>().as_raw(),
                (value as *const T).cast(),
                mem::size_of::<T>(),
                CopyDirection::HostToDevice,
            )
        }
    }

    /// Copies the device-resident struct back into `value`.
    ///
    /// # Errors
    ///
    /// Propagates copy failures from the device capability.
    pub fn copy_to(&self, value: &mut T) -> DeviceResult<()> {
        // Safety: the slot owns a live allocation of exactly
        //          `size_of::<T>()` bytes and `value` is a live reference
        unsafe {
            self.backend.copy(
                (value as *mut T).cast(),
                self.ptr.cast::<u8>().as_raw().cast_const(),
                mem::size_of::<T>(),
                CopyDirection::DeviceToHost,
            )
        }
    }

    /// A bounds-checked patch view over the live slot.
    pub fn patcher(&mut self) -> FieldPatcher<'_, B> {
        FieldPatcher {
            backend: &self.backend,
            base: self.ptr.cast::<u8>().as_raw(),
            len: mem::size_of::<T>(),
            _live: PhantomData,
        }
    }

    /// The device address of the struct, for kernel launches.
    #[must_use]
    pub fn as_device_ptr(&self) -> DevicePointer<T> {
        self.ptr
    }
}

impl<T: DeviceCopy, B: DeviceApi> Drop for DeviceSlot<T, B> {
    fn drop(&mut self) {
        // Safety: the pointer came from `alloc_bytes` and drop runs once.
        //          A failed free cannot be propagated from here; backends
        //          record it as a fault instead.
        let _ = unsafe { self.backend.free_bytes(self.ptr.cast()) };
    }
}

/// A device-resident array of `len` elements of type `T`.
///
/// The element count is fixed at construction and carried explicitly; every
/// transfer is checked against it.
pub struct DeviceBuffer<T: DeviceCopy, B: DeviceApi> {
    backend: B,
    ptr: DevicePointer<T>,
    len: usize,
}

impl<T: DeviceCopy, B: DeviceApi> DeviceBuffer<T, B> {
    /// Allocates a device array and copies `slice` into it.
    ///
    /// An empty slice still allocates a unique live handle, so zero-length
    /// buffers participate in leak accounting like any other.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or the copy-in fails.
    pub fn from_slice(backend: &B, slice: &[T]) -> DeviceResult<Self> {
        let bytes = mem::size_of::<T>() * slice.len();
        let raw = backend.alloc_bytes(bytes)?;
        let mut buffer = Self {
            backend: backend.clone(),
            ptr: raw.cast(),
            len: slice.len(),
        };
        buffer.copy_from_slice(slice)?;
        Ok(buffer)
    }

    /// Copies host contents into the live device array.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if `slice` does not have
    /// exactly the buffer's length.
    pub fn copy_from_slice(&mut self, slice: &[T]) -> DeviceResult<()> {
        self.check_len(slice.len())?;
        // Safety: lengths were checked to match and the buffer owns a live
        //          allocation of `len * size_of::<T>()` bytes
        unsafe {
            self.backend.copy(
                self.ptr.cast::<u8>().as_raw(),
                slice.as_ptr().cast(),
                mem::size_of::<T>() * slice.len(),
                CopyDirection::HostToDevice,
            )
        }
    }

    /// Copies the device array back into host storage.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if `slice` does not have
    /// exactly the buffer's length.
    pub fn copy_to_slice(&self, slice: &mut [T]) -> DeviceResult<()> {
        self.check_len(slice.len())?;
        // Safety: lengths were checked to match and the buffer owns a live
        //          allocation of `len * size_of::<T>()` bytes
        unsafe {
            self.backend.copy(
                slice.as_mut_ptr().cast(),
                self.ptr.cast::<u8>().as_raw().cast_const(),
                mem::size_of::<T>() * slice.len(),
                CopyDirection::DeviceToHost,
            )
        }
    }

    fn check_len(&self, len: usize) -> DeviceResult<()> {
        if len == self.len {
            Ok(())
        } else {
            Err(DeviceError::SizeMismatch {
                expected: mem::size_of::<T>() * self.len,
                found: mem::size_of::<T>() * len,
            })
        }
    }

    /// The device-resident view of this buffer: base address plus explicit
    /// element count. This is the value that gets patched into the owning
    /// struct's pointer field.
    #[must_use]
    pub fn as_slice(&self) -> DeviceSlice<T> {
        DeviceSlice::from_raw_parts(self.ptr, self.len)
    }

    /// The element count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The device base address.
    #[must_use]
    pub fn as_device_ptr(&self) -> DevicePointer<T> {
        self.ptr
    }

    /// A patch view over element `index` of the live array.
    ///
    /// Composite objects use this to attach a child's owned allocations into
    /// the child's slot inside an already-resident children array.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if `index` is out of range.
    pub fn element_patcher(&mut self, index: usize) -> DeviceResult<FieldPatcher<'_, B>> {
        if index >= self.len {
            return Err(DeviceError::SizeMismatch {
                expected: mem::size_of::<T>() * self.len,
                found: mem::size_of::<T>() * (index + 1),
            });
        }
        Ok(FieldPatcher {
            backend: &self.backend,
            base: self.ptr.as_raw().wrapping_add(index).cast(),
            len: mem::size_of::<T>(),
            _live: PhantomData,
        })
    }
}

impl<T: DeviceCopy, B: DeviceApi> Drop for DeviceBuffer<T, B> {
    fn drop(&mut self) {
        // Safety: the pointer came from `alloc_bytes` and drop runs once.
        //          A failed free cannot be propagated from here; backends
        //          record it as a fault instead.
        let _ = unsafe { self.backend.free_bytes(self.ptr.cast()) };
    }
}

/// A bounds-checked view over one live device region, used to overwrite
/// pointer-valued fields with the device addresses of nested allocations.
///
/// A patcher can only be obtained from a live [`DeviceSlot`] or
/// [`DeviceBuffer`], so the order dependency of the mirroring protocol — the
/// owning struct's device copy must exist before any of its fields can be
/// patched — holds by construction rather than by runtime convention.
pub struct FieldPatcher<'a, B: DeviceApi> {
    backend: &'a B,
    base: *mut u8,
    len: usize,
    _live: PhantomData<&'a mut ()>,
}

impl<B: DeviceApi> FieldPatcher<'_, B> {
    /// Overwrites the field at `offset` with `value`.
    ///
    /// This is the pointer patch: only the one field is copied host→device,
    /// because the correct device value of a pointer field cannot be known
    /// until the nested allocation it refers to exists.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if the field does not lie
    /// entirely within the patched region.
    pub fn patch<F: DeviceCopy>(&mut self, offset: usize, value: &F) -> DeviceResult<()> {
        let end = offset
            .checked_add(mem::size_of::<F>())
            .ok_or(DeviceError::SizeMismatch {
                expected: self.len,
                found: usize::MAX,
            })?;
        if end > self.len {
            return Err(DeviceError::SizeMismatch {
                expected: self.len,
                found: end,
            });
        }
        // Safety: the target range was checked to lie within the live
        //          region this patcher was derived from
        unsafe {
            self.backend.copy(
                self.base.wrapping_add(offset),
                (value as *const F).cast(),
                mem::size_of::<F>(),
                CopyDirection::HostToDevice,
            )
        }
    }

    /// Size of the patched region in bytes.
    #[must_use]
    pub const fn region_len(&self) -> usize {
        self.len
    }
}
