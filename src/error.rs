// Errors reported by the configuration layer. The attack core itself never
// fails: a bad guess is a statistical outcome, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error
{
    #[error("max_rounds must be greater than zero")]
    ZeroRounds,

    #[error("accesses_per_round must be greater than zero")]
    ZeroAccesses,

    #[error("meta repetitions must be greater than zero")]
    ZeroMeta,

    #[error("cache threshold must be greater than zero")]
    ZeroThreshold,

    #[error("secret must not be empty")]
    EmptySecret,

    #[error("bound {bound} is outside 1..={capacity}")]
    BoundOutOfRange { bound: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
