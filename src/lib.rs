//! `device-mirror` keeps host-side composite data structures — structs
//! owning buffers, arrays of objects, multi-level hierarchies — consistent
//! with a mirror of themselves in accelerator device memory.
//!
//! The crate is built around one protocol: an object's device struct is
//! allocated and copied in first, then each owned buffer is mirrored and
//! its device address patched into the already-resident struct (a *pointer
//! patch*, since device and host addresses differ); kernels run against the
//! attached mirror; copy-out and teardown run in the reverse nesting order,
//! innermost buffers first. See [`mirror::MirrorToDevice`] for the
//! protocol, [`mirror::MirroredOnHost`] / [`mirror::MirroredOnDevice`] for
//! the typestate wrapper that enforces its phases, and
//! [`mirror::LendToDevice`] for the closure-scoped form.
//!
//! The device itself is an abstract capability ([`api::DeviceApi`]:
//! allocate, free, copy, launch, fence). [`emulated::EmulatedDevice`]
//! implements it in-process with full allocation accounting, which is what
//! the crate's tests run against.

pub mod api;
pub mod emulated;
pub mod error;
pub mod memory;
pub mod mirror;
pub mod model;
pub mod trace;
