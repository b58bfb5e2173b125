// Deterministic stand-ins for the processor
//
// `SimulatedCache` implements `Backend` with a software model of a single
// cache: a line is resident after it is loaded and until it is flushed, and
// latency is a fixed hit or miss cost plus optional seeded jitter. It never
// speculates, so pairing it with the real `Victim` exercises the
// architectural path only.
//
// `LeakyVictim` is the other half: an oracle over the same memory layout that
// behaves like a processor which always runs past the bounds check, touching
// the probe slot of whatever byte sits at the requested offset.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::arch::Backend;
use crate::error::Result;
use crate::probe::ProbeArray;
use crate::victim::{Oracle, VictimMemory, DEFAULT_BOUND};

const LINE_SHIFT: u32 = 6;

pub const DEFAULT_HIT_LATENCY: u64 = 40;
pub const DEFAULT_MISS_LATENCY: u64 = 200;

pub struct SimulatedCache
{
    resident: RefCell<HashSet<usize>>,
    clock: Cell<u64>,
    hit_latency: u64,
    miss_latency: u64,
    jitter: Option<RefCell<(SmallRng, u64)>>,
    trace: Option<RefCell<Vec<usize>>>,
    memory_fences: Cell<u64>,
    instruction_fences: Cell<u64>,
    flushes: Cell<u64>,
}

impl SimulatedCache
{
    pub fn new() -> Self
    {
        Self::with_latencies(DEFAULT_HIT_LATENCY, DEFAULT_MISS_LATENCY)
    }

    pub fn with_latencies(hit_latency: u64, miss_latency: u64) -> Self
    {
        SimulatedCache {
            resident: RefCell::new(HashSet::new()),
            clock: Cell::new(0),
            hit_latency,
            miss_latency,
            jitter: None,
            trace: None,
            memory_fences: Cell::new(0),
            instruction_fences: Cell::new(0),
            flushes: Cell::new(0),
        }
    }

    /// Add up to `amplitude` cycles of noise to every load, drawn from a
    /// generator seeded with `seed` so runs repeat exactly.
    pub fn with_jitter(mut self, seed: u64, amplitude: u64) -> Self
    {
        self.jitter = Some(RefCell::new((SmallRng::seed_from_u64(seed), amplitude)));
        self
    }

    /// Record every loaded address, for tests that check exactly what was
    /// touched. Off by default: the log grows with every load.
    pub fn with_trace(mut self) -> Self
    {
        self.trace = Some(RefCell::new(Vec::new()));
        self
    }

    pub fn is_resident(&self, addr: *const u8) -> bool
    {
        self.resident.borrow().contains(&line(addr))
    }

    /// Every address loaded through [`Backend::access`] so far, in order.
    /// Empty unless built [`with_trace`](Self::with_trace).
    pub fn trace(&self) -> Vec<usize>
    {
        self.trace.as_ref().map_or_else(Vec::new, |t| t.borrow().clone())
    }

    pub fn clear_trace(&self)
    {
        if let Some(t) = &self.trace {
            t.borrow_mut().clear();
        }
    }

    pub fn memory_fences(&self) -> u64
    {
        self.memory_fences.get()
    }

    pub fn instruction_fences(&self) -> u64
    {
        self.instruction_fences.get()
    }

    pub fn flushes(&self) -> u64
    {
        self.flushes.get()
    }

    fn noise(&self) -> u64
    {
        match &self.jitter {
            Some(jitter) => {
                let (rng, amplitude) = &mut *jitter.borrow_mut();
                rng.gen_range(0..=*amplitude)
            }
            None => 0,
        }
    }
}

impl Default for SimulatedCache
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn line(addr: *const u8) -> usize
{
    addr as usize >> LINE_SHIFT
}

impl Backend for SimulatedCache
{
    unsafe fn flush(&self, addr: *const u8)
    {
        self.resident.borrow_mut().remove(&line(addr));
        self.flushes.set(self.flushes.get() + 1);
    }

    fn fence_memory(&self)
    {
        self.memory_fences.set(self.memory_fences.get() + 1);
    }

    fn fence_instruction(&self)
    {
        self.instruction_fences.set(self.instruction_fences.get() + 1);
    }

    fn cycle_counter(&self) -> u64
    {
        self.clock.get()
    }

    unsafe fn access(&self, addr: *const u8) -> u8
    {
        let hit = !self.resident.borrow_mut().insert(line(addr));
        let cost = if hit { self.hit_latency } else { self.miss_latency };
        self.clock.set(self.clock.get() + cost + self.noise());
        if let Some(t) = &self.trace {
            t.borrow_mut().push(addr as usize);
        }
        std::ptr::read_volatile(addr)
    }

    fn is_simulated(&self) -> bool
    {
        true
    }
}

/// Oracle that leaks every byte of its memory with perfect fidelity.
pub struct LeakyVictim
{
    memory: VictimMemory,
    bound: usize,
}

impl LeakyVictim
{
    pub fn new(secret: &[u8]) -> Result<Self>
    {
        Ok(LeakyVictim { memory: VictimMemory::new(secret)?, bound: DEFAULT_BOUND })
    }

    pub fn memory(&self) -> &VictimMemory
    {
        &self.memory
    }
}

impl Oracle for LeakyVictim
{
    fn access<B: Backend>(&self, backend: &B, probe: &ProbeArray, offset: usize)
    {
        if let Some(value) = self.memory.byte_at(offset) {
            unsafe { backend.access(probe.slot(value)) };
        }
    }

    fn bound(&self) -> usize
    {
        self.bound
    }

    fn training_byte(&self, offset: usize) -> u8
    {
        self.memory.bounded()[offset]
    }
}
