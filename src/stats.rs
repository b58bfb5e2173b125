// Accuracy bookkeeping for one experiment and its CSV line.

use std::fmt;

use crate::engine::Guess;

pub const CSV_HEADER: &str = "total bytes,correct bytes,score sum,elapsed cycles,cache misses,branch mispredicted";

/// Positions at which the two sequences differ, over the shorter length.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> usize
{
    a.iter().zip(b).filter(|(x, y)| x != y).count()
}

pub fn is_printable(byte: u8) -> bool
{
    byte > 31 && byte < 127
}

/// Guess rendered for a log line: the byte itself when printable.
pub fn display_byte(byte: u8) -> char
{
    if is_printable(byte) {
        byte as char
    } else {
        '?'
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExperimentStats
{
    pub total_bytes: usize,
    pub correct_bytes: usize,
    pub score_sum: u64,
    pub elapsed_cycles: u64,
    pub cache_misses: u64,
    pub branch_mispredicts: u64,
}

impl ExperimentStats
{
    /// Accuracy part of the statistics; cycles and counters stay zero.
    pub fn from_guesses(secret: &[u8], guesses: &[Guess]) -> Self
    {
        let values: Vec<u8> = guesses.iter().map(|g| g.value).collect();
        let total_bytes = secret.len();
        let compared = total_bytes.min(values.len());
        ExperimentStats {
            total_bytes,
            correct_bytes: compared - hamming_distance(&secret[..compared], &values[..compared]),
            score_sum: guesses.iter().map(|g| g.score as u64).sum(),
            ..Default::default()
        }
    }

    pub fn accuracy(&self) -> f64
    {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.correct_bytes as f64 / self.total_bytes as f64
    }
}

impl fmt::Display for ExperimentStats
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.total_bytes, self.correct_bytes, self.score_sum, self.elapsed_cycles, self.cache_misses, self.branch_mispredicts
        )
    }
}
