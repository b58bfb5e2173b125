// Experiment driver: run the engine across every byte of the secret and
// compare the guesses with the ground truth.

use log::{debug, info};

use crate::arch::Backend;
use crate::config::GuessConfig;
use crate::engine::{Engine, Guess};
use crate::perf::Counters;
use crate::stats::{display_byte, ExperimentStats};
use crate::victim::Oracle;

pub struct Experiment
{
    pub guesses: Vec<Guess>,
    pub stats: ExperimentStats,
}

impl Experiment
{
    pub fn guessed_bytes(&self) -> Vec<u8>
    {
        self.guesses.iter().map(|g| g.value).collect()
    }
}

/// Guess `len` consecutive bytes starting at offset `start`.
pub fn read_secret<B: Backend, O: Oracle>(
    engine: &mut Engine,
    backend: &B,
    oracle: &O,
    start: usize,
    len: usize,
    config: &GuessConfig,
) -> Vec<Guess>
{
    // sized up front: no allocation between two offsets
    let mut guesses = Vec::with_capacity(len);
    for offset in start..start + len {
        guesses.push(engine.read_offset(backend, oracle, offset, config));
    }
    guesses
}

/// One full pass over `secret`, which the oracle holds at offset `start`.
pub fn run_experiment<B: Backend, O: Oracle, C: Counters>(
    engine: &mut Engine,
    backend: &B,
    oracle: &O,
    counters: &mut C,
    secret: &[u8],
    start: usize,
    config: &GuessConfig,
) -> Experiment
{
    engine.probe_mut().touch_pages();
    backend.fence_memory();

    counters.start();
    let time_start = backend.cycle_counter();

    let guesses = read_secret(engine, backend, oracle, start, secret.len(), config);

    let time_end = backend.cycle_counter();
    let cache_misses = counters.read_cache_misses();
    let branch_mispredicts = counters.read_branch_mispredicts();
    counters.stop();

    // printing only once the timed region is over
    for (i, g) in guesses.iter().enumerate() {
        debug!(
            "offset {}: guessed {:#04x} '{}' score {} after {} rounds (truth {:#04x})",
            start + i,
            g.value,
            display_byte(g.value),
            g.score,
            g.rounds,
            secret[i]
        );
    }

    let stats = ExperimentStats {
        elapsed_cycles: time_end.wrapping_sub(time_start),
        cache_misses,
        branch_mispredicts,
        ..ExperimentStats::from_guesses(secret, &guesses)
    };
    info!("{}/{} bytes correct ({:.1}%)", stats.correct_bytes, stats.total_bytes, stats.accuracy() * 100.0);

    Experiment { guesses, stats }
}
