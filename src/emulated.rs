//! An in-process device backend.
//!
//! Device memory is modelled by real host allocations behind opaque handles,
//! so that patched device pointers genuinely resolve when a kernel follows
//! them, and kernel launches iterate the grid × block decomposition on the
//! calling thread. A registry tracks every allocation, which gives tests a
//! counting allocator: outstanding handles, bytes in use, the order in which
//! handles were freed, and a fault counter for double frees and
//! out-of-range copies.

use std::{
    alloc::Layout,
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    api::{CopyDirection, DeviceApi, Kernel, LaunchConfig, ThreadIndex},
    error::{DeviceError, DeviceResult},
    memory::{DeviceCopy, DevicePointer},
    trace::{NullTracer, RangeGuard, RangeTracer},
};

const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;
const DEVICE_ALIGN: usize = 16;

struct Allocation {
    layout: Layout,
    /// Requested size; zero-byte requests are backed by one byte but bound
    /// checks use the requested size.
    bytes: usize,
}

#[derive(Default)]
struct Registry {
    /// Live allocations keyed by base address.
    live: BTreeMap<usize, Allocation>,
    in_use: usize,
    free_log: Vec<usize>,
    faults: usize,
}

impl Registry {
    /// Base address of the live allocation containing `[addr, addr + bytes)`,
    /// if any.
    fn containing(&self, addr: usize, bytes: usize) -> Option<usize> {
        let (base, allocation) = self.live.range(..=addr).next_back()?;
        let end = addr.checked_add(bytes)?;
        (end <= base + allocation.bytes.max(1)).then_some(*base)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for (addr, allocation) in core::mem::take(&mut self.live) {
            // Safety: the address was returned by `std::alloc::alloc` with
            //          this layout and is removed from the registry here, so
            //          it cannot be deallocated twice
            unsafe { std::alloc::dealloc(addr as *mut u8, allocation.layout) };
        }
    }
}

struct Shared {
    registry: Mutex<Registry>,
    capacity: usize,
    tracer: Box<dyn RangeTracer + Send + Sync>,
}

/// An emulated device: allocator, copy engine, and kernel executor in one
/// in-process capability.
///
/// Clones share one device context, so RAII guards can release allocations
/// through any clone.
#[derive(Clone)]
pub struct EmulatedDevice {
    shared: Arc<Shared>,
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedDevice {
    /// A device with the default memory capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A device with `capacity` bytes of memory, for exercising allocation
    /// failure.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_tracer(capacity, Box::new(NullTracer))
    }

    /// A device with an injected range tracing sink.
    #[must_use]
    pub fn with_capacity_and_tracer(
        capacity: usize,
        tracer: Box<dyn RangeTracer + Send + Sync>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                capacity,
                tracer,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A poisoned registry only happens if a previous holder panicked;
        // the bookkeeping itself stays consistent.
        match self.shared.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of live allocations.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.registry().live.len()
    }

    /// Bytes currently held by live allocations.
    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.registry().in_use
    }

    /// Total capacity of the memory pool in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of rejected releases and out-of-range accesses observed so
    /// far. Drop paths swallow free errors, so tests assert on this instead.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.registry().faults
    }

    /// Drains and returns the base addresses of freed allocations, in the
    /// order they were released.
    #[must_use]
    pub fn take_free_log(&self) -> Vec<usize> {
        core::mem::take(&mut self.registry().free_log)
    }

    fn validate_device_range(&self, addr: usize, bytes: usize) -> DeviceResult<()> {
        let mut registry = self.registry();
        if registry.containing(addr, bytes).is_some() {
            Ok(())
        } else {
            registry.faults += 1;
            Err(DeviceError::InvalidPointer { addr, bytes })
        }
    }
}

impl DeviceApi for EmulatedDevice {
    fn alloc_bytes(&self, bytes: usize) -> DeviceResult<DevicePointer<u8>> {
        let _range = RangeGuard::push(self.shared.tracer.as_ref(), "device::alloc");

        let mut registry = self.registry();
        if registry.in_use + bytes > self.shared.capacity {
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                in_use: registry.in_use,
                capacity: self.shared.capacity,
            });
        }

        // Zero-byte requests are backed by one byte so every handle is a
        // unique key in the registry.
        let layout = Layout::from_size_align(bytes.max(1), DEVICE_ALIGN).map_err(|_| {
            DeviceError::OutOfMemory {
                requested: bytes,
                in_use: registry.in_use,
                capacity: self.shared.capacity,
            }
        })?;

        // Safety: the layout has non-zero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                in_use: registry.in_use,
                capacity: self.shared.capacity,
            });
        }

        registry.live.insert(ptr as usize, Allocation { layout, bytes });
        registry.in_use += bytes;

        tracing::trace!(addr = ptr as usize, bytes, "device alloc");

        Ok(DevicePointer::from_raw(ptr))
    }

    unsafe fn free_bytes(&self, ptr: DevicePointer<u8>) -> DeviceResult<()> {
        let _range = RangeGuard::push(self.shared.tracer.as_ref(), "device::free");

        let addr = ptr.addr();
        let mut registry = self.registry();
        let Some(allocation) = registry.live.remove(&addr) else {
            registry.faults += 1;
            return Err(DeviceError::DoubleFree { addr });
        };

        registry.in_use -= allocation.bytes;
        registry.free_log.push(addr);
        drop(registry);

        tracing::trace!(addr, bytes = allocation.bytes, "device free");

        // Safety: the address was found live in the registry, so it came
        //          from `alloc_bytes` with this layout and has not been
        //          deallocated yet
        unsafe { std::alloc::dealloc(addr as *mut u8, allocation.layout) };

        Ok(())
    }

    unsafe fn copy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        direction: CopyDirection,
    ) -> DeviceResult<()> {
        let _range = RangeGuard::push(self.shared.tracer.as_ref(), "device::copy");

        let device_addr = match direction {
            CopyDirection::HostToDevice => dst as usize,
            CopyDirection::DeviceToHost => src as usize,
        };
        self.validate_device_range(device_addr, bytes)?;

        if bytes > 0 {
            // Safety: the device side was validated against the registry and
            //          the caller guarantees the host side per `DeviceApi`
            unsafe { core::ptr::copy_nonoverlapping(src, dst, bytes) };
        }

        Ok(())
    }

    unsafe fn launch<T: DeviceCopy>(
        &self,
        config: LaunchConfig,
        kernel: Kernel<T>,
        arg: DevicePointer<T>,
    ) -> DeviceResult<()> {
        let _range = RangeGuard::push(self.shared.tracer.as_ref(), "device::launch");

        if config.grid == 0 || config.block == 0 {
            return Err(DeviceError::LaunchFailure {
                reason: "grid and block dimensions must be non-zero",
            });
        }
        self.validate_device_range(arg.addr(), core::mem::size_of::<T>())?;

        tracing::debug!(grid = config.grid, block = config.block, "kernel launch");

        let entry = kernel.entry();
        for block_idx in 0..config.grid {
            for thread_idx in 0..config.block {
                let index = ThreadIndex {
                    block_idx,
                    thread_idx,
                    grid_dim: config.grid,
                    block_dim: config.block,
                };
                // Safety: the argument was validated to be a live device
                //          allocation of at least `size_of::<T>()` bytes;
                //          the caller guarantees it is fully attached
                unsafe { entry(index, arg.as_raw()) };
            }
        }

        Ok(())
    }

    fn synchronize(&self) -> DeviceResult<()> {
        // Launches run to completion on the calling thread, so the fence is
        // trivially satisfied.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_accounting() {
        let device = EmulatedDevice::new();
        let a = device.alloc_bytes(128).unwrap();
        let b = device.alloc_bytes(64).unwrap();
        assert_eq!(device.outstanding(), 2);
        assert_eq!(device.bytes_in_use(), 192);

        unsafe { device.free_bytes(b).unwrap() };
        unsafe { device.free_bytes(a).unwrap() };
        assert_eq!(device.outstanding(), 0);
        assert_eq!(device.bytes_in_use(), 0);
        assert_eq!(device.take_free_log(), vec![b.addr(), a.addr()]);
        assert_eq!(device.faults(), 0);
    }

    #[test]
    fn double_free_is_rejected_and_counted() {
        let device = EmulatedDevice::new();
        let ptr = device.alloc_bytes(16).unwrap();
        unsafe { device.free_bytes(ptr).unwrap() };
        assert_eq!(
            unsafe { device.free_bytes(ptr) },
            Err(DeviceError::DoubleFree { addr: ptr.addr() })
        );
        assert_eq!(device.faults(), 1);
    }

    #[test]
    fn capacity_exhaustion_fails_allocation() {
        let device = EmulatedDevice::with_capacity(100);
        let _held = device.alloc_bytes(80).unwrap();
        assert_eq!(
            device.alloc_bytes(40),
            Err(DeviceError::OutOfMemory {
                requested: 40,
                in_use: 80,
                capacity: 100,
            })
        );
    }

    #[test]
    fn zero_byte_allocations_get_unique_handles() {
        let device = EmulatedDevice::new();
        let a = device.alloc_bytes(0).unwrap();
        let b = device.alloc_bytes(0).unwrap();
        assert_ne!(a.addr(), b.addr());
        assert_eq!(device.outstanding(), 2);
        assert_eq!(device.bytes_in_use(), 0);
        unsafe { device.free_bytes(a).unwrap() };
        unsafe { device.free_bytes(b).unwrap() };
        assert_eq!(device.outstanding(), 0);
    }

    #[test]
    fn copy_outside_live_allocation_is_rejected() {
        let device = EmulatedDevice::new();
        let ptr = device.alloc_bytes(8).unwrap();
        let host = [0u8; 16];
        // Overruns the 8-byte allocation.
        let result = unsafe {
            device.copy(
                ptr.as_raw(),
                host.as_ptr(),
                16,
                CopyDirection::HostToDevice,
            )
        };
        assert_eq!(
            result,
            Err(DeviceError::InvalidPointer {
                addr: ptr.addr(),
                bytes: 16,
            })
        );
        assert_eq!(device.faults(), 1);
        unsafe { device.free_bytes(ptr).unwrap() };
    }

    #[test]
    fn copy_after_free_is_rejected() {
        let device = EmulatedDevice::new();
        let ptr = device.alloc_bytes(8).unwrap();
        unsafe { device.free_bytes(ptr).unwrap() };
        let mut host = [0u8; 8];
        let result = unsafe {
            device.copy(
                host.as_mut_ptr(),
                ptr.as_raw().cast_const(),
                8,
                CopyDirection::DeviceToHost,
            )
        };
        assert!(matches!(result, Err(DeviceError::InvalidPointer { .. })));
    }

    #[test]
    fn degenerate_launch_is_rejected() {
        let device = EmulatedDevice::new();
        let arg = device.alloc_bytes(4).unwrap();
        unsafe fn noop(_index: ThreadIndex, _arg: *mut u32) {}
        let result = unsafe {
            device.launch(
                LaunchConfig::new(0, 1),
                Kernel::new(noop),
                arg.cast::<u32>(),
            )
        };
        assert!(matches!(result, Err(DeviceError::LaunchFailure { .. })));
        unsafe { device.free_bytes(arg).unwrap() };
    }

    #[test]
    fn launch_covers_grid_times_block() {
        let device = EmulatedDevice::new();
        let counter = device.alloc_bytes(4).unwrap().cast::<u32>();

        unsafe fn bump(_index: ThreadIndex, arg: *mut u32) {
            unsafe { *arg += 1 };
        }

        unsafe {
            device
                .launch(LaunchConfig::new(3, 4), Kernel::new(bump), counter)
                .unwrap();
        }

        let mut value = 0u32;
        unsafe {
            device
                .copy(
                    (&mut value as *mut u32).cast(),
                    counter.as_raw().cast(),
                    4,
                    CopyDirection::DeviceToHost,
                )
                .unwrap();
        }
        assert_eq!(value, 12);

        unsafe { device.free_bytes(counter.cast()).unwrap() };
    }
}
