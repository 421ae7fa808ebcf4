//! Pieces shared by the `slicemap` binaries.

use std::collections::BTreeMap;
use clap::ValueEnum;
use log::{ Level, LevelFilter, Log, Metadata, Record };
use slicemap::{
    CacheGeometry,
    Error,
    HostEnv,
    LocatorConfig,
    LocatorStats,
    RaceBackend,
    SimulatedRace,
    SliceId,
    SliceLocator,
    ThreadedRace,
};
use slicemap::hash::SliceHash;
use slicemap::stats::{ RawResults, ResultList };

/// Prints log records with the same prefixes used for normal output.
struct Logger;
impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error | Level::Warn => eprintln!("[!] {}", record.args()),
            Level::Info => println!("[*] {}", record.args()),
            Level::Debug | Level::Trace => println!("[?] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

/// Install the logger. Each `-v` raises the maximum level by one step
/// above 'warn'.
pub fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Parse an integer with an optional '0x' prefix and '_' separators.
pub fn parse_int(s: &str) -> Result<usize, String> {
    let digits = s.replace('_', "");
    let res = match digits.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => digits.parse(),
    };
    res.map_err(|e| format!("invalid integer '{}': {}", s, e))
}

/// Known cache geometries.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Preset {
    SkylakeSp,
    NeoverseN1,
}

/// Describes the cache hierarchy of the machine.
#[derive(clap::Args, Debug)]
pub struct GeometryArgs {
    /// Starting point for the cache geometry.
    #[arg(long, value_enum, default_value = "skylake-sp")]
    pub preset: Preset,

    /// Number of cores (defaults to the number of online cores).
    #[arg(long)]
    pub cores: Option<usize>,

    /// Override the set-index mask for a single LLC slice.
    #[arg(long, value_parser = parse_int)]
    pub llc_mask: Option<usize>,
}
impl GeometryArgs {
    pub fn geometry(&self) -> slicemap::Result<CacheGeometry> {
        let mut g = match self.preset {
            Preset::SkylakeSp => CacheGeometry::skylake_sp(),
            Preset::NeoverseN1 => CacheGeometry::neoverse_n1(),
        };
        if let Some(cores) = self.cores.or_else(HostEnv::online_cores) {
            g = g.num_cores(cores);
        }
        if let Some(mask) = self.llc_mask {
            g = g.llc_mask(mask);
        }
        g.validate()?;
        Ok(g)
    }
}

/// Controls how slices are measured.
#[derive(clap::Args, Debug)]
pub struct LocatorArgs {
    /// Number of loads timed in each race.
    #[arg(long, default_value_t = LocatorConfig::DEFAULT_REPEAT)]
    pub repeat: usize,

    /// Give up on an address after retrying this many disagreeing pairs
    /// of trials.
    #[arg(long, default_value_t = LocatorConfig::DEFAULT_MAX_RETRIES)]
    pub max_retries: usize,

    /// Retry disagreeing trials forever (ignores '--max-retries').
    #[arg(long)]
    pub unbounded: bool,

    /// Simulate races with a known slice function instead of
    /// measuring them.
    #[arg(long)]
    pub simulate: bool,

    /// Seed for simulated noise.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Upper bound on simulated noise (in cycles).
    #[arg(long, default_value_t = 100_000)]
    pub noise: u64,

    /// Cycles to wait after the loader starts before timing.
    #[arg(long, default_value_t = 0)]
    pub settle: u64,
}
impl LocatorArgs {
    pub fn config(&self, geometry: &CacheGeometry) -> slicemap::Result<LocatorConfig> {
        let max_retries = if self.unbounded {
            None
        } else {
            Some(self.max_retries)
        };
        Ok(LocatorConfig::for_geometry(geometry)?
            .repeat(self.repeat)
            .max_retries(max_retries))
    }

    /// Build a locator using either real or simulated races.
    pub fn locator(&self, geometry: &CacheGeometry)
        -> slicemap::Result<SliceLocator<Box<dyn RaceBackend>>>
    {
        let cfg = self.config(geometry)?;
        let backend: Box<dyn RaceBackend> = if self.simulate {
            let slices = cfg.topology.num_slices();
            let hash = SliceHash::sandybridge_to_skylake(slices).ok_or(
                Error::InvalidTopology("no known slice function for this many slices")
            )?;
            println!("[*] Simulating {} slices (seed={}, noise={})",
                slices, self.seed, self.noise);
            Box::new(SimulatedRace::from_hash(hash, self.seed).noise(self.noise))
        } else {
            Box::new(ThreadedRace::new().settle(self.settle))
        };
        Ok(SliceLocator::new(cfg, backend))
    }
}

/// Print a summary of the locator counters.
pub fn print_stats(stats: &LocatorStats) {
    println!("[*] {} trials, {} mismatches, {} addresses located",
        stats.trials, stats.mismatches, stats.located);
}

/// Summary of the timings observed for one slice label during a survey.
#[derive(Clone, Debug, PartialEq)]
pub struct SurveyRow {
    pub slice: SliceId,
    pub min: u64,
    pub mode: u64,
    pub max: u64,
    pub mean: f64,
    /// Distance between this slice's minimum and the fastest slice's minimum
    pub delta: i64,
}

/// Summarize a survey, fastest slice first.
pub fn summarize_survey(survey: &BTreeMap<SliceId, RawResults>) -> Vec<SurveyRow> {
    let floor = survey.values()
        .filter_map(|r| r.get_min())
        .min()
        .unwrap_or(0) as i64;
    let mut rows: Vec<SurveyRow> = survey.iter()
        .filter(|(_, r)| !r.is_empty())
        .map(|(slice, r)| SurveyRow {
            slice: *slice,
            min: r.get_min().unwrap_or(0),
            mode: r.get_mode().unwrap_or(0),
            max: r.get_max().unwrap_or(0),
            mean: r.mean().unwrap_or(0.0),
            delta: r.normalize(floor).get_min().unwrap_or(0),
        })
        .collect();
    rows.sort_by_key(|row| (row.min, row.slice));
    rows
}
