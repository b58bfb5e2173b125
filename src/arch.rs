// Architecture capability interface
//
// Everything above this module (timing, calibration, victim, engine) only
// talks to a `Backend`. The hardware backend maps each capability onto the
// matching instruction of the host ISA; `sim::SimulatedCache` provides a
// deterministic software model of the same interface.

#[cfg(target_arch = "aarch64")]
use std::arch::asm;
#[cfg(target_arch = "x86_64")]
use std::arch::{asm, x86_64::*};

/// The five primitives a Flush+Reload attack is built from, plus a flag
/// telling callers whether timing comes from a simulator.
pub trait Backend
{
    /// Evict the cache line holding `addr` from every cache level.
    ///
    /// # Safety
    /// `addr` must point into a live, mapped allocation.
    unsafe fn flush(&self, addr: *const u8);

    /// Wait until every earlier load and store has completed.
    fn fence_memory(&self);

    /// Stop the processor from running ahead of this point in the
    /// instruction stream.
    fn fence_instruction(&self);

    /// Read the cycle counter.
    fn cycle_counter(&self) -> u64;

    /// Load one byte from `addr`.
    ///
    /// # Safety
    /// `addr` must point into a live, mapped allocation.
    unsafe fn access(&self, addr: *const u8) -> u8;

    /// True when running under a cycle-level simulator. Calibration then
    /// uses far fewer samples and the channel eviction loop fences after
    /// every slot.
    fn is_simulated(&self) -> bool;
}

/// Backend driving the real instructions of the host processor.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct Hardware
{
    simulated: bool,
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
impl Hardware
{
    pub fn new() -> Self
    {
        Hardware { simulated: false }
    }

    /// Same instructions, but flagged as running inside a simulator such as
    /// gem5 (see `config::simulation_from_env`).
    pub fn simulated(simulated: bool) -> Self
    {
        Hardware { simulated }
    }
}

// x86 read-time-stamp-counter instruction access, returns a 64-bit CPU cycle
// timer, used for high-precision timing of cache hits and misses
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtscp() -> u64
{
    let eax: u32;
    let _ecx: u32;
    let edx: u32;
    unsafe {
        asm!(
            "rdtscp",
            lateout("eax") eax,
            lateout("ecx") _ecx,
            lateout("edx") edx,
            options(nomem, nostack)
        );
    }
    (edx as u64) << 32 | eax as u64
}

#[cfg(target_arch = "x86_64")]
impl Backend for Hardware
{
    #[inline(always)]
    unsafe fn flush(&self, addr: *const u8)
    {
        _mm_clflush(addr);
    }

    #[inline(always)]
    fn fence_memory(&self)
    {
        unsafe { _mm_mfence() }
    }

    #[inline(always)]
    fn fence_instruction(&self)
    {
        unsafe { _mm_lfence() }
    }

    #[inline(always)]
    fn cycle_counter(&self) -> u64
    {
        rdtscp()
    }

    #[inline(always)]
    unsafe fn access(&self, addr: *const u8) -> u8
    {
        std::ptr::read_volatile(addr)
    }

    fn is_simulated(&self) -> bool
    {
        self.simulated
    }
}

// ARMv8-A: the virtual counter is the only cycle source readable from EL0
// without kernel help, so it stands in for rdtsc here.
#[cfg(target_arch = "aarch64")]
impl Backend for Hardware
{
    #[inline(always)]
    unsafe fn flush(&self, addr: *const u8)
    {
        asm!("dc civac, {addr}", addr = in(reg) addr, options(nostack, preserves_flags));
    }

    #[inline(always)]
    fn fence_memory(&self)
    {
        unsafe { asm!("dsb sy", options(nostack, preserves_flags)) }
    }

    #[inline(always)]
    fn fence_instruction(&self)
    {
        unsafe { asm!("isb", options(nostack, preserves_flags)) }
    }

    #[inline(always)]
    fn cycle_counter(&self) -> u64
    {
        let counter: u64;
        unsafe {
            asm!("mrs {c}, cntvct_el0", c = out(reg) counter, options(nomem, nostack, preserves_flags));
        }
        counter
    }

    #[inline(always)]
    unsafe fn access(&self, addr: *const u8) -> u8
    {
        std::ptr::read_volatile(addr)
    }

    fn is_simulated(&self) -> bool
    {
        self.simulated
    }
}
