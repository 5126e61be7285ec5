// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Clock source and platform backed by the cpufreq sysfs interface, e.g.
//!
//!```text
//!     /sys/devices/system/cpu/possible
//!     /sys/devices/system/cpu/cpuN/online
//!     /sys/devices/system/cpu/cpuN/cpufreq/scaling_available_frequencies
//!     /sys/devices/system/cpu/cpuN/cpufreq/scaling_cur_freq
//!     /sys/devices/system/cpu/cpuN/cpufreq/scaling_setspeed
//!     /sys/devices/system/cpu/cpuN/cpufreq/cpuinfo_transition_latency
//!     /sys/devices/system/cpu/cpuN/cpufreq/related_cpus
//!```
//!
//! Writes go through `scaling_setspeed`, which requires the `userspace`
//! governor to be active on the policy.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use sscanf::sscanf;

use crate::ClockSource;
use crate::FrequencyTable;
use crate::Platform;
use crate::SetRateReason;

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

fn read_file_string(path: &Path) -> Result<String> {
    let val = fs::read_to_string(path)
        .with_context(|| format!("Failed to open or read file {:?}", path))?;
    Ok(val.trim_end_matches('\0').trim().to_string())
}

fn read_file_u32(path: &Path) -> Result<u32> {
    let val = read_file_string(path)?;
    match val.parse::<u32>() {
        Ok(parsed) => Ok(parsed),
        Err(_) => bail!("Failed to parse content '{}' from {:?}", val, path),
    }
}

/// Parse a kernel cpulist such as "0-3,8,10-11".
pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    for group in cpulist.trim().split(',').filter(|g| !g.trim().is_empty()) {
        let group = group.trim();
        let (min, max) = match sscanf!(group, "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group, "{usize}") {
                Ok(x) => (x, x),
                Err(_) => bail!("Failed to parse cpulist {}", group),
            },
        };
        if min > max {
            bail!("Invalid cpulist range {}", group);
        }
        cpus.extend(min..=max);
    }
    Ok(cpus)
}

#[derive(Debug)]
pub struct SysfsCpufreq {
    root: PathBuf,
    nr_cpus: usize,
    shared_clock: bool,
    switch_time: Duration,
}

impl SysfsCpufreq {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<SysfsCpufreq> {
        let root = root.as_ref().to_path_buf();
        let possible = read_cpulist(&read_file_string(&root.join("possible"))?)?;
        let nr_cpus = match possible.iter().max() {
            Some(max) => max + 1,
            None => bail!("No possible cpus listed under {:?}", root),
        };

        let mut sysfs = SysfsCpufreq {
            root,
            nr_cpus,
            shared_clock: false,
            switch_time: Duration::ZERO,
        };

        // The slowest policy bounds the switch time.
        let latency_ns = (0..nr_cpus)
            .filter_map(|cpu| {
                read_file_u32(&sysfs.freq_path(cpu, "cpuinfo_transition_latency")).ok()
            })
            .max()
            .unwrap_or(0);
        sysfs.switch_time = Duration::from_nanos(latency_ns as u64);

        sysfs.shared_clock = nr_cpus > 1
            && read_file_string(&sysfs.freq_path(0, "related_cpus"))
                .and_then(|list| read_cpulist(&list))
                .map(|related| related.len() == nr_cpus)
                .unwrap_or(false);

        debug!(
            "cpufreq sysfs at {:?}: {} cpus, shared clock {}, switch time {:?}",
            sysfs.root, nr_cpus, sysfs.shared_clock, sysfs.switch_time
        );
        Ok(sysfs)
    }

    fn cpu_path(&self, cpu: usize) -> PathBuf {
        self.root.join(format!("cpu{}", cpu))
    }

    fn freq_path(&self, cpu: usize, attr: &str) -> PathBuf {
        self.cpu_path(cpu).join("cpufreq").join(attr)
    }
}

impl ClockSource for SysfsCpufreq {
    fn set_rate(&self, cpu: usize, freq_khz: u32, reason: SetRateReason) -> Result<()> {
        let path = self.freq_path(cpu, "scaling_setspeed");
        debug!("cpu{} setspeed {} ({:?})", cpu, freq_khz, reason);
        fs::write(&path, freq_khz.to_string())
            .with_context(|| format!("Failed to write {} to {:?}", freq_khz, path))
    }

    fn get_rate(&self, cpu: usize) -> Result<u32> {
        read_file_u32(&self.freq_path(cpu, "scaling_cur_freq"))
    }

    fn switch_time(&self) -> Duration {
        self.switch_time
    }
}

impl Platform for SysfsCpufreq {
    fn nr_possible_cpus(&self) -> usize {
        self.nr_cpus
    }

    fn frequency_table(&self, cpu: usize) -> Option<FrequencyTable> {
        let list = read_file_string(&self.freq_path(cpu, "scaling_available_frequencies")).ok()?;
        let freqs = list
            .split_whitespace()
            .filter_map(|f| f.parse::<u32>().ok())
            .collect();
        FrequencyTable::new(freqs).ok()
    }

    fn core_is_active(&self, cpu: usize) -> bool {
        if cpu >= self.nr_cpus {
            return false;
        }
        // CPUs that can't be hotplugged (usually cpu0) have no online file.
        match read_file_u32(&self.cpu_path(cpu).join("online")) {
            Ok(online) => online != 0,
            Err(_) => !self.cpu_path(cpu).join("online").exists(),
        }
    }

    fn cores_share_clock(&self) -> bool {
        self.shared_clock
    }
}
