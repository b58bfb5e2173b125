// Run configuration for the guessing engine, and the simulator switch.

use std::env;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ROUNDS: usize = 999;
pub const DEFAULT_ACCESSES_PER_ROUND: usize = 30;

/// Environment variable naming a simulator run (gem5 full-system).
pub const SIMULATION_ENV: &str = "GEM5_SIM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuessConfig
{
    /// Rounds before giving up on a clear winner.
    pub max_rounds: usize,
    /// Victim calls per round, training and attack together.
    pub accesses_per_round: usize,
}

impl Default for GuessConfig
{
    fn default() -> Self
    {
        GuessConfig { max_rounds: DEFAULT_MAX_ROUNDS, accesses_per_round: DEFAULT_ACCESSES_PER_ROUND }
    }
}

impl GuessConfig
{
    pub fn validate(&self) -> Result<()>
    {
        if self.max_rounds == 0 {
            return Err(Error::ZeroRounds);
        }
        if self.accesses_per_round == 0 {
            return Err(Error::ZeroAccesses);
        }
        Ok(())
    }
}

/// Interpret the simulator switch: set to anything but `false`.
pub fn simulation_flag(value: Option<&str>) -> bool
{
    matches!(value, Some(v) if v != "false")
}

/// Read the simulator switch once, at startup.
pub fn simulation_from_env() -> bool
{
    simulation_flag(env::var(SIMULATION_ENV).ok().as_deref())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn defaults()
    {
        let config = GuessConfig::default();
        assert_eq!(config.max_rounds, 999);
        assert_eq!(config.accesses_per_round, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected()
    {
        let rounds = GuessConfig { max_rounds: 0, ..GuessConfig::default() };
        assert!(matches!(rounds.validate(), Err(Error::ZeroRounds)));
        let accesses = GuessConfig { accesses_per_round: 0, ..GuessConfig::default() };
        assert!(matches!(accesses.validate(), Err(Error::ZeroAccesses)));
    }

    #[test]
    fn simulation_switch()
    {
        assert!(!simulation_flag(None));
        assert!(!simulation_flag(Some("false")));
        assert!(simulation_flag(Some("true")));
        assert!(simulation_flag(Some("1")));
    }
}
