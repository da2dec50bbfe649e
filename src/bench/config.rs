//! Command-line parsing and the benchmark configuration.

use clap::{ArgAction, Parser, ValueEnum};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TableKind {
    #[value(name = "rh_brown_set")]
    RhBrownSet,
    #[value(name = "trans_rh_set")]
    TransRhSet,
    #[value(name = "hopscotch_set")]
    HopscotchSet,
    #[value(name = "lf_lp_node_set")]
    LfLpNodeSet,
    #[value(name = "mm_set")]
    MmSet,
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::RhBrownSet => "rh_brown_set",
            TableKind::TransRhSet => "trans_rh_set",
            TableKind::HopscotchSet => "hopscotch_set",
            TableKind::LfLpNodeSet => "lf_lp_node_set",
            TableKind::MmSet => "mm_set",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReclaimerKind {
    #[value(name = "leaky")]
    Leaky,
    #[value(name = "epoch")]
    Epoch,
}

impl ReclaimerKind {
    pub fn name(self) -> &'static str {
        match self {
            ReclaimerKind::Leaky => "leaky",
            ReclaimerKind::Epoch => "epoch",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AllocatorKind {
    #[value(name = "je")]
    Je,
    #[value(name = "glibc")]
    Glibc,
    #[value(name = "intel")]
    Intel,
}

impl AllocatorKind {
    pub fn name(self) -> &'static str {
        match self {
            AllocatorKind::Je => "je",
            AllocatorKind::Glibc => "glibc",
            AllocatorKind::Intel => "intel",
        }
    }
}

/// Command-line flags, mirroring the single-letter interface of the tool.
#[derive(Parser, Debug)]
#[command(name = "throng", about = "Concurrent hash-set benchmarking laboratory")]
pub struct Args {
    /// Load factor (0..1) used to pre-fill the table.
    #[arg(short = 'L', default_value_t = 0.4)]
    pub load_factor: f64,

    /// Table size as a power-of-two exponent.
    #[arg(short = 'S', default_value_t = 23)]
    pub size_exponent: u32,

    /// Benchmark duration in seconds.
    #[arg(short = 'D', default_value_t = 1)]
    pub duration: u64,

    /// Number of concurrent worker threads.
    #[arg(short = 'T', default_value_t = 1)]
    pub threads: usize,

    /// Updates as a percentage of the workload (0..=100); updates split
    /// equally between adds and removes, the rest are reads.
    #[arg(short = 'U', default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub updates: u8,

    /// Table implementation being benchmarked.
    #[arg(short = 'B', value_enum, default_value_t = TableKind::RhBrownSet)]
    pub table: TableKind,

    /// Memory reclaimer used within the table (where needed).
    #[arg(short = 'M', value_enum, default_value_t = ReclaimerKind::Leaky)]
    pub reclaimer: ReclaimerKind,

    /// Allocator this binary is expected to be built with.
    #[arg(short = 'A', value_enum, default_value_t = AllocatorKind::Je)]
    pub allocator: AllocatorKind,

    /// Collect hardware performance counters.
    #[arg(short = 'P', default_value_t = true, action = ArgAction::Set)]
    pub counters: bool,

    /// Run verification mode instead of the timed benchmark.
    #[arg(short = 'V', default_value_t = false, action = ArgAction::Set)]
    pub verify: bool,

    /// Fill hyperthread siblings before switching socket.
    #[arg(short = 'H', default_value_t = true, action = ArgAction::Set)]
    pub hyperthreading: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("load factor must be inside (0, 1), got {0}")]
    LoadFactor(f64),
    #[error("table size exponent must be between 1 and {max}, got {got}")]
    SizeExponent { got: u32, max: u32 },
    #[error("worker count must be at least 1")]
    Threads,
}

/// Options shared by every benchmark type.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub threads: usize,
    pub duration: Duration,
    pub reclaimer: ReclaimerKind,
    pub allocator: AllocatorKind,
    pub counters: bool,
    pub verify: bool,
    pub hyperthreading: bool,
}

/// Full configuration of one set-benchmark run.
#[derive(Clone, Debug)]
pub struct SetBenchmarkConfig {
    pub base: BenchmarkConfig,
    pub table_size: usize,
    pub updates: u8,
    pub load_factor: f64,
    pub table: TableKind,
}

impl SetBenchmarkConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if !(args.load_factor > 0.0 && args.load_factor < 1.0) {
            return Err(ConfigError::LoadFactor(args.load_factor));
        }
        let max = usize::BITS - 3;
        if args.size_exponent == 0 || args.size_exponent > max {
            return Err(ConfigError::SizeExponent {
                got: args.size_exponent,
                max,
            });
        }
        if args.threads == 0 {
            return Err(ConfigError::Threads);
        }
        Ok(Self {
            base: BenchmarkConfig {
                threads: args.threads,
                duration: Duration::from_secs(args.duration),
                reclaimer: args.reclaimer,
                allocator: args.allocator,
                counters: args.counters,
                verify: args.verify,
                hyperthreading: args.hyperthreading,
            },
            table_size: 1usize << args.size_exponent,
            updates: args.updates,
            load_factor: args.load_factor,
            table: args.table,
        })
    }
}

impl fmt::Display for SetBenchmarkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Table: {}", self.table.name())?;
        writeln!(f, "Reclaimer: {}", self.base.reclaimer.name())?;
        writeln!(f, "Allocator: {}", self.base.allocator.name())?;
        writeln!(f, "Threads: {}", self.base.threads)?;
        writeln!(f, "Size: {}", self.table_size)?;
        writeln!(f, "Updates: {}%", self.updates)?;
        writeln!(f, "Load factor: {}", self.load_factor)?;
        writeln!(f, "Duration: {:?}", self.base.duration)?;
        writeln!(f, "Counters: {}", self.base.counters)?;
        write!(f, "Verify: {}", self.base.verify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["throng"]);
        let config = SetBenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(config.table_size, 1 << 23);
        assert_eq!(config.updates, 10);
        assert_eq!(config.base.threads, 1);
        assert_eq!(config.table, TableKind::RhBrownSet);
        assert_eq!(config.base.reclaimer, ReclaimerKind::Leaky);
        assert!((config.load_factor - 0.4).abs() < 1e-9);
    }

    #[test]
    fn parses_full_flag_set() {
        let args = Args::parse_from([
            "throng", "-L", "0.6", "-S", "10", "-D", "2", "-T", "4", "-U", "40", "-B", "mm_set",
            "-M", "epoch", "-A", "glibc", "-P", "false", "-V", "true", "-H", "false",
        ]);
        let config = SetBenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(config.table_size, 1024);
        assert_eq!(config.table, TableKind::MmSet);
        assert_eq!(config.base.reclaimer, ReclaimerKind::Epoch);
        assert_eq!(config.base.allocator, AllocatorKind::Glibc);
        assert!(!config.base.counters);
        assert!(config.base.verify);
        assert!(!config.base.hyperthreading);
    }

    #[test]
    fn rejects_unknown_table() {
        assert!(Args::try_parse_from(["throng", "-B", "cuckoo_set"]).is_err());
    }

    #[test]
    fn rejects_out_of_range_updates() {
        assert!(Args::try_parse_from(["throng", "-U", "101"]).is_err());
    }

    #[test]
    fn rejects_bad_load_factor() {
        let args = Args::parse_from(["throng", "-L", "1.5"]);
        assert!(SetBenchmarkConfig::from_args(&args).is_err());
    }
}
