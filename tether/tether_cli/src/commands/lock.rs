//! The `lock-bench` command

use anyhow::Result;
use clap::Args;
use tether_concurrency::sync::{workload, LockDiscipline, WorkloadConfig};
use tether_concurrency::ToolkitConfig;

use super::millis;

/// Arguments for the lock-bench command
#[derive(Args)]
pub struct LockBenchArgs {
    /// Discipline to measure (exclusive or shared); the configured one when
    /// omitted
    #[clap(long, conflicts_with = "compare")]
    discipline: Option<LockDiscipline>,

    /// Run the workload under both disciplines
    #[clap(long)]
    compare: bool,

    /// Number of reader threads
    #[clap(long)]
    readers: Option<usize>,

    /// Number of writer threads
    #[clap(long)]
    writers: Option<usize>,

    /// Accesses per thread
    #[clap(long)]
    ops: Option<usize>,

    /// Time each access holds the lock, in microseconds
    #[clap(long)]
    hold_us: Option<u64>,
}

impl LockBenchArgs {
    fn workload(&self, base: &WorkloadConfig) -> WorkloadConfig {
        WorkloadConfig {
            discipline: self.discipline.unwrap_or(base.discipline),
            readers: self.readers.unwrap_or(base.readers),
            writers: self.writers.unwrap_or(base.writers),
            ops_per_thread: self.ops.unwrap_or(base.ops_per_thread),
            hold_time_us: self.hold_us.unwrap_or(base.hold_time_us),
        }
    }
}

/// Implementation of the lock-bench command
pub fn execute(args: &LockBenchArgs, toolkit: &ToolkitConfig) -> Result<()> {
    let config = args.workload(&toolkit.workload);
    if config.readers + config.writers == 0 {
        anyhow::bail!("workload needs at least one reader or writer");
    }

    let disciplines = if args.compare {
        vec![LockDiscipline::Exclusive, LockDiscipline::Shared]
    } else {
        vec![config.discipline]
    };

    println!(
        "Workload: {} readers, {} writers, {} ops each, {}us hold",
        config.readers, config.writers, config.ops_per_thread, config.hold_time_us
    );

    for discipline in disciplines {
        let report = workload::run_configured(&WorkloadConfig {
            discipline,
            ..config.clone()
        });

        println!(
            "{:<10} elapsed {:>12}  reads {:>8}  writes {:>8}  final count {}",
            report.discipline.as_str(),
            millis(report.elapsed),
            report.reads,
            report.writes,
            report.final_count
        );
        println!(
            "{:<10} max read wait {}us, max write wait {}us",
            "",
            report.max_read_wait_us,
            report.max_write_wait_us
        );
    }

    Ok(())
}
