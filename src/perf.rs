// Hardware performance counters
//
// Purely informational: cache misses and mispredicted branches over one
// experiment, reported next to the accuracy numbers. Opening a counter can
// fail (no PMU, perf_event_paranoid, containers); that is logged and the
// counter reads as zero for the rest of the run.

use log::warn;

/// Counter source bracketing one experiment.
pub trait Counters
{
    fn start(&mut self);
    fn read_cache_misses(&mut self) -> u64;
    fn read_branch_mispredicts(&mut self) -> u64;
    fn stop(&mut self);
}

/// Always zero. Used under a simulator and when counters are not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCounters;

impl Counters for NoCounters
{
    fn start(&mut self) {}

    fn read_cache_misses(&mut self) -> u64
    {
        0
    }

    fn read_branch_mispredicts(&mut self) -> u64
    {
        0
    }

    fn stop(&mut self) {}
}

#[cfg(target_os = "linux")]
pub use linux::PerfCounters;

#[cfg(target_os = "linux")]
mod linux
{
    use super::*;
    use perf_event::events::Hardware;
    use perf_event::{Builder, Counter};

    /// Cache-miss and branch-miss counters for this process, user space only.
    #[derive(Default)]
    pub struct PerfCounters
    {
        cache_misses: Option<Counter>,
        branch_misses: Option<Counter>,
    }

    impl PerfCounters
    {
        pub fn new() -> Self
        {
            Self::default()
        }
    }

    fn open(event: Hardware, name: &str) -> Option<Counter>
    {
        let opened = Builder::new(event).build().and_then(|mut counter| {
            counter.enable()?;
            Ok(counter)
        });
        match opened {
            Ok(counter) => Some(counter),
            Err(e) => {
                warn!("perf_event_open for {} failed, reporting 0: {}", name, e);
                None
            }
        }
    }

    fn read(counter: &mut Option<Counter>, name: &str) -> u64
    {
        match counter.as_mut().map(|c| c.read()) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                warn!("reading {} counter failed: {}", name, e);
                0
            }
            None => 0,
        }
    }

    impl Counters for PerfCounters
    {
        fn start(&mut self)
        {
            self.cache_misses = open(Hardware::CACHE_MISSES, "cache-miss");
            self.branch_misses = open(Hardware::BRANCH_MISSES, "branch-miss");
        }

        fn read_cache_misses(&mut self) -> u64
        {
            read(&mut self.cache_misses, "cache-miss")
        }

        fn read_branch_mispredicts(&mut self) -> u64
        {
            read(&mut self.branch_misses, "branch-miss")
        }

        fn stop(&mut self)
        {
            for counter in [&mut self.cache_misses, &mut self.branch_misses] {
                if let Some(mut c) = counter.take() {
                    if let Err(e) = c.disable() {
                        warn!("disabling counter failed: {}", e);
                    }
                }
            }
        }
    }
}
