// Spectre PHT-SA-IP byte reader
//
// Reads memory past the declared end of an array by mistraining the
// conditional branch that guards it (Pattern History Table, same address
// space, in-place training) and recovering the transiently loaded byte from
// a Flush+Reload covert channel.
//
// The pieces, bottom up:
//
//   arch         the `Backend` capability interface and the hardware backend
//   timing       one timed load
//   calibration  the cycle count separating a cache hit from a miss
//   victim       the bounds-checked gadget and its memory layout
//   engine       train, attack, probe and score until one byte value wins
//   driver       the engine over a whole secret, with accuracy statistics
//   sim          deterministic backend and oracle, no microarchitecture needed

pub mod arch;
pub mod calibration;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod perf;
pub mod probe;
pub mod select;
pub mod sim;
pub mod stats;
pub mod timing;
pub mod victim;

pub use arch::Backend;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use arch::Hardware;
pub use calibration::{calibrate, CacheThreshold};
pub use config::GuessConfig;
pub use engine::{Engine, Guess};
pub use error::{Error, Result};
pub use victim::{Oracle, Victim};
