use clap::{CommandFactory, Parser};
use std::path::Path;
use std::process::ExitCode;

use throng::bench::config::{Args, ReclaimerKind, SetBenchmarkConfig, TableKind};
use throng::bench::driver::TableBenchmark;
use throng::bench::summary::{produce_summary, summary_file_name};
use throng::chaining::MichaelSet;
use throng::hopscotch::SpinHopscotchSet;
use throng::linear_probe::LinearProbeSet;
use throng::reclaim::{EpochReclaimer, LeakyReclaimer};
use throng::robin_hood_elided::ElidedRobinHoodSet;
use throng::robin_hood_kcas::KCasRobinHoodSet;
use throng::set::ConcurrentSet;

#[cfg(all(feature = "jemalloc", target_os = "linux"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

const KEYS_CSV: &str = "set_keys.csv";
const RESULTS_CSV: &str = "set_results.csv";

fn compiled_allocator() -> &'static str {
    if cfg!(all(feature = "jemalloc", target_os = "linux")) {
        "je"
    } else {
        "glibc"
    }
}

fn run_table<T: ConcurrentSet<usize>>(config: SetBenchmarkConfig) -> std::io::Result<()> {
    let benchmark = TableBenchmark::<T>::new(config.clone());
    if config.base.verify {
        assert!(benchmark.verify());
        println!("Verification passed.");
        Ok(())
    } else {
        let result = benchmark.bench();
        produce_summary(
            &config,
            &result,
            Path::new(&summary_file_name(&config)),
            Path::new(KEYS_CSV),
            Path::new(RESULTS_CSV),
        )
    }
}

fn run(config: SetBenchmarkConfig) -> std::io::Result<()> {
    match (config.table, config.base.reclaimer) {
        (TableKind::RhBrownSet, ReclaimerKind::Leaky) => {
            run_table::<KCasRobinHoodSet<LeakyReclaimer>>(config)
        }
        (TableKind::RhBrownSet, ReclaimerKind::Epoch) => {
            run_table::<KCasRobinHoodSet<EpochReclaimer>>(config)
        }
        // The transactional and hopscotch tables never retire memory; the
        // reclaimer choice does not apply to them.
        (TableKind::TransRhSet, _) => run_table::<ElidedRobinHoodSet>(config),
        (TableKind::HopscotchSet, _) => run_table::<SpinHopscotchSet>(config),
        (TableKind::LfLpNodeSet, ReclaimerKind::Leaky) => {
            run_table::<LinearProbeSet<LeakyReclaimer>>(config)
        }
        (TableKind::LfLpNodeSet, ReclaimerKind::Epoch) => {
            run_table::<LinearProbeSet<EpochReclaimer>>(config)
        }
        (TableKind::MmSet, ReclaimerKind::Leaky) => {
            run_table::<MichaelSet<LeakyReclaimer>>(config)
        }
        (TableKind::MmSet, ReclaimerKind::Epoch) => {
            run_table::<MichaelSet<EpochReclaimer>>(config)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match SetBenchmarkConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}\n");
            let _ = Args::command().print_help();
            return ExitCode::from(2);
        }
    };

    println!("{config}");
    let compiled = compiled_allocator();
    if config.base.allocator.name() != compiled {
        eprintln!(
            "warning: requested allocator `{}` but this binary is built with `{}`; \
             results are recorded under the requested name",
            config.base.allocator.name(),
            compiled
        );
    }

    if let Err(err) = run(config) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    println!("Finished.");
    ExitCode::SUCCESS
}
