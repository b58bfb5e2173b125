// Timing primitives
//
// One timed load, nothing else: no allocation, no branches, so the only cache
// line these touch is the one being measured.

use crate::arch::Backend;

/// Time one load of `addr` in cycles.
///
/// The counter is read on both sides of the load and a memory fence follows,
/// so the next measurement starts with this one fully retired.
///
/// # Safety
/// `addr` must point into a live, mapped allocation.
#[inline(always)]
pub unsafe fn measure_latency<B: Backend>(backend: &B, addr: *const u8) -> u64
{
    let start = backend.cycle_counter();
    backend.access(addr);
    let end = backend.cycle_counter();
    backend.fence_memory();
    end.wrapping_sub(start)
}

/// Like [`measure_latency`], then evict `addr` so the next load misses.
///
/// # Safety
/// `addr` must point into a live, mapped allocation.
#[inline(always)]
pub unsafe fn measure_latency_then_evict<B: Backend>(backend: &B, addr: *const u8) -> u64
{
    let latency = measure_latency(backend, addr);
    backend.flush(addr);
    latency
}
