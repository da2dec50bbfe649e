//! Result serialisation: the per-key scheduling CSV, the per-run results
//! CSV, and the per-run text summary.

use super::config::SetBenchmarkConfig;
use super::counters::EVENT_NAMES;
use super::results::BenchmarkResult;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Summary file name encoding the run configuration, spaces replaced with
/// underscores.
pub fn summary_file_name(config: &SetBenchmarkConfig) -> String {
    format!(
        "Table:{} Reclaimer:{} A:{} T:{} S:{} U:{} L:{}.txt",
        config.table.name(),
        config.base.reclaimer.name(),
        config.base.allocator.name(),
        config.base.threads,
        config.table_size,
        config.updates,
        config.load_factor,
    )
    .replace(' ', "_")
}

fn append_with_header(path: &Path, header: &str, rows: &[String]) -> io::Result<()> {
    let need_header = !path.exists() || path.metadata()?.len() == 0;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if need_header {
        writeln!(file, "{header}")?;
    }
    for row in rows {
        writeln!(file, "{row}")?;
    }
    Ok(())
}

/// Writes all three output files for a finished run.
pub fn produce_summary(
    config: &SetBenchmarkConfig,
    result: &BenchmarkResult,
    summary_path: &Path,
    keys_csv: &Path,
    results_csv: &Path,
) -> io::Result<()> {
    let scheduling_rows: Vec<String> = result
        .scheduling
        .iter()
        .map(|info| {
            format!(
                "{},{},{},{},{},{}",
                config.table.name(),
                info.user_id,
                info.cpu,
                info.package,
                info.core,
                info.smt_index
            )
        })
        .collect();
    append_with_header(
        keys_csv,
        "table,thread,cpu,package,core,smt_index",
        &scheduling_rows,
    )?;

    let total = result.collate();
    let results_header = format!(
        "table,reclaimer,allocator,threads,size,updates,load_factor,\
         duration_secs,query_attempts,query_successes,addition_attempts,\
         addition_successes,removal_attempts,removal_successes,total_ops,\
         ops_per_sec,{}",
        EVENT_NAMES.join(",")
    );
    let counters = total
        .counters
        .0
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let results_row = format!(
        "{},{},{},{},{},{},{},{:.3},{},{},{},{},{},{},{},{:.1},{}",
        config.table.name(),
        config.base.reclaimer.name(),
        config.base.allocator.name(),
        config.base.threads,
        config.table_size,
        config.updates,
        config.load_factor,
        result.elapsed.as_secs_f64(),
        total.query_attempts,
        total.query_successes,
        total.addition_attempts,
        total.addition_successes,
        total.removal_attempts,
        total.removal_successes,
        total.total_attempts(),
        result.throughput(),
        counters,
    );
    append_with_header(results_csv, &results_header, &[results_row])?;

    let mut summary = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(summary_path)?;
    writeln!(summary, "{config}")?;
    writeln!(summary)?;
    writeln!(summary, "Elapsed: {:.3}s", result.elapsed.as_secs_f64())?;
    writeln!(summary, "Throughput: {:.1} ops/s", result.throughput())?;
    writeln!(
        summary,
        "Queries: {} attempts, {} hits",
        total.query_attempts, total.query_successes
    )?;
    writeln!(
        summary,
        "Additions: {} attempts, {} successes",
        total.addition_attempts, total.addition_successes
    )?;
    writeln!(
        summary,
        "Removals: {} attempts, {} successes",
        total.removal_attempts, total.removal_successes
    )?;
    for (name, value) in EVENT_NAMES.iter().zip(total.counters.0.iter()) {
        writeln!(summary, "{name}: {value}")?;
    }
    writeln!(summary)?;
    for info in &result.scheduling {
        writeln!(summary, "{info}")?;
    }
    Ok(())
}
