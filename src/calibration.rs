// Cache-hit threshold calibration
//
// Time a line while it is resident and while it is not, then put the
// threshold a third of the way from the hit mean toward the miss mean.
// Miss latencies have a long tail, so leaning toward the hit side keeps slow
// hits from being counted while real hits still pass.

use std::fmt;
use std::hint::black_box;

use log::debug;

use crate::arch::Backend;
use crate::timing::{measure_latency, measure_latency_then_evict};

/// Samples per series on real hardware.
pub const HARDWARE_ITERATIONS: u64 = 100_000;

/// Samples per series under a simulator, which is deterministic anyway.
pub const SIMULATED_ITERATIONS: u64 = 10;

/// Latency boundary between a cache hit and a miss, in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheThreshold(pub u64);

impl CacheThreshold
{
    /// A load of `latency` cycles counts as a hit.
    #[inline(always)]
    pub fn is_hit(self, latency: u64) -> bool
    {
        latency <= self.0
    }

    pub fn cycles(self) -> u64
    {
        self.0
    }
}

impl From<u64> for CacheThreshold
{
    fn from(cycles: u64) -> Self
    {
        CacheThreshold(cycles)
    }
}

impl fmt::Display for CacheThreshold
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} cycles", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationReport
{
    pub mean_hit: u64,
    pub mean_miss: u64,
    pub threshold: CacheThreshold,
    pub iterations: u64,
}

impl CalibrationReport
{
    /// The threshold separates the two means, so the channel can tell a
    /// hit from a miss at all.
    pub fn is_usable(&self) -> bool
    {
        self.mean_hit < self.threshold.0 && self.threshold.0 < self.mean_miss
    }
}

/// Threshold from a hit mean and a miss mean: `(miss + 2 * hit) / 3`.
pub fn weighted_threshold(mean_hit: u64, mean_miss: u64) -> CacheThreshold
{
    CacheThreshold((mean_miss + 2 * mean_hit) / 3)
}

pub fn calibrate<B: Backend>(backend: &B) -> CacheThreshold
{
    calibrate_report(backend).threshold
}

pub fn calibrate_report<B: Backend>(backend: &B) -> CalibrationReport
{
    let iterations = if backend.is_simulated() { SIMULATED_ITERATIONS } else { HARDWARE_ITERATIONS };

    let dummy: [usize; 16] = black_box([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
    let target = &dummy[8] as *const usize as *const u8;

    let mut hit_total: u64 = 0;
    let mut miss_total: u64 = 0;
    unsafe {
        // resident from here on
        backend.access(target);
        for _ in 0..iterations {
            hit_total += measure_latency(backend, target);
        }

        backend.flush(target);
        backend.fence_memory();
        for _ in 0..iterations {
            miss_total += measure_latency_then_evict(backend, target);
        }
    }

    let mean_hit = hit_total / iterations;
    let mean_miss = miss_total / iterations;
    let threshold = weighted_threshold(mean_hit, mean_miss);
    debug!("calibration: hit {} / miss {} over {} samples, threshold {}", mean_hit, mean_miss, iterations, threshold);

    CalibrationReport { mean_hit, mean_miss, threshold, iterations }
}
