//! A worked object hierarchy exercising the mirroring protocol.
//!
//! [`Basic`] is the minimal leaf: one scalar plus one owned buffer.
//! [`Point`] is a leaf with several owned buffers and an optional Gauss
//! weight; weighted and unweighted points share one element type rather
//! than an inheritance relationship, so composite arrays stay uniform and
//! no virtual dispatch crosses the device boundary. [`Line`] owns an array
//! of points, and [`LineSet`] an array of lines, giving a three-level
//! composite (set → line → point → buffers).
//!
//! The kernels here assign deterministic, index-derived values; they are
//! illustrative workloads for the transfer protocol, not domain logic.

mod basic;
mod line;
mod point;

pub use basic::{alter_attribute, Basic, BasicAllocation, BasicDeviceRepresentation};
pub use line::{
    update_point_data, Line, LineAllocation, LineDeviceRepresentation, LineSet, LineSetAllocation,
    LineSetDeviceRepresentation, DEFAULT_GAUSS_WEIGHT,
};
pub use point::{Point, PointAllocation, PointDeviceRepresentation};
