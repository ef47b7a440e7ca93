//! Injected range tracing, in the style of NVTX push/pop ranges.
//!
//! Tracing is pure observability: backends bracket their structural
//! operations in ranges, and a sink either discards them ([`NullTracer`]) or
//! forwards them to the `tracing` ecosystem ([`EventTracer`]). Correctness
//! never depends on which sink is installed.

/// A sink for named operation ranges.
pub trait RangeTracer {
    /// Opens a named range.
    fn push_range(&self, name: &str);

    /// Closes the most recently opened range.
    fn pop_range(&self);
}

/// Discards all ranges.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTracer;

impl RangeTracer for NullTracer {
    fn push_range(&self, _name: &str) {}

    fn pop_range(&self) {}
}

/// Forwards ranges as `tracing` events at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventTracer;

impl RangeTracer for EventTracer {
    fn push_range(&self, name: &str) {
        tracing::trace!(target: "device_mirror::range", range = name, "push");
    }

    fn pop_range(&self) {
        tracing::trace!(target: "device_mirror::range", "pop");
    }
}

/// RAII helper that pops a range when it leaves scope.
pub(crate) struct RangeGuard<'a> {
    tracer: &'a (dyn RangeTracer + Send + Sync),
}

impl<'a> RangeGuard<'a> {
    pub(crate) fn push(tracer: &'a (dyn RangeTracer + Send + Sync), name: &str) -> Self {
        tracer.push_range(name);
        Self { tracer }
    }
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        self.tracer.pop_range();
    }
}
