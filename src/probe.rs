// The covert-channel surface: 256 slots, one per candidate byte value, each on
// its own page so no two candidates ever share a cache line (and the stride
// prefetcher has nothing adjacent to pull in).

use crate::arch::Backend;

/// Number of candidate byte values.
pub const PROBE_SLOTS: usize = 256;

/// Distance between two slots.
pub const PROBE_STRIDE: usize = 4096;

pub struct ProbeArray
{
    bytes: Box<[u8]>,
}

impl ProbeArray
{
    pub fn new() -> Self
    {
        // non-zero so the pages are real memory, not the shared zero page
        ProbeArray { bytes: vec![1u8; PROBE_SLOTS * PROBE_STRIDE].into_boxed_slice() }
    }

    /// Address of the slot for candidate `value`.
    #[inline(always)]
    pub fn slot(&self, value: u8) -> *const u8
    {
        // value * PROBE_STRIDE < PROBE_SLOTS * PROBE_STRIDE == bytes.len()
        unsafe { self.bytes.as_ptr().add(value as usize * PROBE_STRIDE) }
    }

    /// Rewrite every byte so each page is backed by its own frame before an
    /// experiment starts. Writing through a copy-on-write page inside the
    /// transient window would be far too slow to leave a trace.
    pub fn touch_pages(&mut self)
    {
        for b in self.bytes.iter_mut() {
            *b = 1;
        }
    }

    /// Evict every slot through the backend with a memory fence after each
    /// flush. Simulated backends also need the instruction fence inside the
    /// loop, or the flushes are not complete when the round starts.
    #[inline(always)]
    pub fn evict<B: Backend>(&self, backend: &B)
    {
        let fence_each = backend.is_simulated();
        for value in 0..PROBE_SLOTS {
            unsafe { backend.flush(self.slot(value as u8)) };
            backend.fence_memory();
            if fence_each {
                backend.fence_instruction();
            }
        }
        backend.fence_instruction();
    }

    /// Flush the whole backing buffer, every cache line of it, not only the
    /// slot heads.
    #[cfg(target_arch = "x86_64")]
    pub fn flush_all(&self)
    {
        #[allow(unused_unsafe)]
        unsafe {
            clf::cache_line_flush_with_slice(&self.bytes[..]);
        }
    }
}

impl Default for ProbeArray
{
    fn default() -> Self
    {
        Self::new()
    }
}
