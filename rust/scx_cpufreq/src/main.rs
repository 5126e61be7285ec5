// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use log::info;
use log::warn;
use scx_cpufreq::init_config;
use scx_cpufreq::parse_config_file;
use scx_cpufreq::CpufreqDriver;
use scx_cpufreq::CpufreqError;
use scx_cpufreq::FreqTransition;
use scx_cpufreq::Relation;
use scx_cpufreq::SysfsCpufreq;
use scx_cpufreq::TransitionObserver;
use scx_cpufreq::TransitionPhase;
use scx_cpufreq::SYSFS_CPU_ROOT;

/// scx_cpufreq: per-CPU frequency transition dispatcher
///
/// Resolves a requested frequency against the CPU's frequency table and
/// applies it from a worker bound to that CPU, refusing while the CPU is
/// suspended or going offline. Writes require the `userspace` cpufreq
/// governor.
#[derive(Debug, Parser)]
struct Opts {
    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML config file. Defaults to /etc/scx_cpufreq/config.toml
    /// or /etc/scx_cpufreq.toml if present.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Root of the cpu sysfs hierarchy.
    #[clap(long, default_value = SYSFS_CPU_ROOT)]
    sysfs_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the policy of every possible CPU.
    Show,

    /// Move one CPU to the table entry nearest the requested frequency.
    Set {
        /// Target CPU.
        #[clap(long)]
        cpu: usize,

        /// Requested frequency in kHz.
        #[clap(long)]
        freq: u32,

        /// Rounding when the frequency isn't a table entry: "down" or "up".
        #[clap(long, default_value = "down")]
        relation: Relation,
    },
}

struct TransitionLogger;

impl TransitionObserver for TransitionLogger {
    fn notify(&self, t: &FreqTransition, phase: TransitionPhase) {
        if phase == TransitionPhase::PostChange {
            info!("cpu{}: {} kHz -> {} kHz", t.cpu, t.old, t.new);
        }
    }
}

fn show(driver: &CpufreqDriver) -> Result<()> {
    for cpu in 0..driver.nr_cpus() {
        if let Err(e) = driver.init(cpu) {
            warn!("cpu{}: {:#}", cpu, e);
            continue;
        }
        let policy = driver.policy(cpu)?;
        let freqs = driver
            .available_frequencies(cpu)?
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "cpu{:<3} cur {:>8} limits {}-{} hw {}-{} latency {}ns state {:?}",
            cpu,
            policy.cur,
            policy.limits.min,
            policy.limits.max,
            policy.cpuinfo.min,
            policy.cpuinfo.max,
            policy.transition_latency.as_nanos(),
            driver.gate_state(cpu)?,
        );
        println!("       available: {}", freqs);
    }
    Ok(())
}

fn set(driver: &CpufreqDriver, cpu: usize, freq: u32, relation: Relation) -> Result<()> {
    driver.init(cpu)?;
    let op = driver.set_target(cpu, freq, relation)?;
    println!("cpu{}: {} kHz", cpu, op.frequency);
    Ok(())
}

fn run(opts: &Opts) -> Result<()> {
    let config = match &opts.config {
        Some(path) => parse_config_file(path)?,
        None => init_config()?,
    };

    let sysfs = Arc::new(
        SysfsCpufreq::new(&opts.sysfs_root)
            .with_context(|| format!("Failed to read cpufreq sysfs at {:?}", opts.sysfs_root))?,
    );
    let driver = CpufreqDriver::builder(sysfs.clone(), sysfs)
        .with_config(config)
        .build()?;
    driver.register_observer(Arc::new(TransitionLogger));

    match &opts.command {
        Command::Show => show(&driver),
        Command::Set {
            cpu,
            freq,
            relation,
        } => set(&driver, *cpu, *freq, *relation),
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    if let Err(e) = run(&opts) {
        match CpufreqError::of(&e) {
            Some(kind) => {
                eprintln!("scx_cpufreq: {:#}", e);
                std::process::exit(-kind.errno());
            }
            None => return Err(e),
        }
    }
    Ok(())
}
