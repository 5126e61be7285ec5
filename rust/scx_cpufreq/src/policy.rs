// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::time::Duration;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::info;

use crate::ClockSource;
use crate::CpufreqError;
use crate::FreqLimits;
use crate::FrequencyTable;
use crate::Platform;
use crate::PolicyBounds;
use crate::Relation;
use crate::SetRateReason;

/// Caller-visible frequency state of one CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyView {
    pub cpu: usize,
    /// Last applied operating point, kHz.
    pub cur: u32,
    /// Scaling limits requests are resolved within.
    pub limits: PolicyBounds,
    /// Hardware limits the scaling limits are verified against.
    pub cpuinfo: PolicyBounds,
    pub transition_latency: Duration,
    /// CPUs sharing this CPU's clock, including itself.
    pub related_cpus: Vec<usize>,
}

/// Initialized per-CPU policy: the view plus the table it resolves against.
#[derive(Debug, Clone)]
pub(crate) struct CorePolicy {
    pub view: PolicyView,
    pub table: FrequencyTable,
}

/// Bring up the policy for `cpu`.
///
/// The current hardware rate is settled onto a table entry within the
/// limits, rounding down first and up if nothing lies below. If that differs
/// from what the hardware reports, the clock is switched to it.
pub(crate) fn initialize(
    cpu: usize,
    clock: &dyn ClockSource,
    platform: &dyn Platform,
    forced: Option<FreqLimits>,
) -> Result<CorePolicy> {
    let table = match platform.frequency_table(cpu) {
        Some(table) => table,
        None => bail!(CpufreqError::NoTableAvailable { cpu }),
    };

    // Coupled cores can't be scaled independently, so every policy spans all
    // of them.
    let related_cpus = if platform.cores_share_clock() {
        (0..platform.nr_possible_cpus()).collect()
    } else {
        vec![cpu]
    };

    let cpuinfo = match forced {
        Some(limits) => limits.into(),
        None => table.bounds(),
    };
    let limits = cpuinfo;

    let hw_freq = clock
        .get_rate(cpu)
        .with_context(|| format!("Failed to read cpu{} clock rate", cpu))?;

    let op = table
        .resolve_within(&limits, hw_freq, Relation::RoundDown)
        .or_else(|| table.resolve_within(&limits, hw_freq, Relation::RoundUp))
        .ok_or_else(|| {
            info!("cpufreq: cpu{} at invalid freq: {}", cpu, hw_freq);
            anyhow!(CpufreqError::InvalidTarget {
                cpu,
                target_khz: hw_freq,
                relation: Relation::RoundUp,
            })
        })?;

    let mut cur = hw_freq;
    if hw_freq != op.frequency {
        clock
            .set_rate(cpu, op.frequency, SetRateReason::Init)
            .context(CpufreqError::ClockSetFailed {
                cpu,
                freq_khz: op.frequency,
            })?;
        info!(
            "cpufreq: cpu{} init at {} switching to {}",
            cpu, hw_freq, op.frequency
        );
        cur = op.frequency;
    }

    Ok(CorePolicy {
        view: PolicyView {
            cpu,
            cur,
            limits,
            cpuinfo,
            transition_latency: clock.switch_time(),
            related_cpus,
        },
        table,
    })
}
