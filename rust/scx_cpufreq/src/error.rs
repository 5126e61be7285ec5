// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;

use crate::Relation;

/// Failure kinds reported by the transition dispatcher.
///
/// Public operations return `anyhow::Result`. Errors from this taxonomy are
/// either the error itself or attached as context, so callers can classify a
/// failure with `err.downcast_ref::<CpufreqError>()` while the underlying
/// cause (e.g. the clock source's own error) stays in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpufreqError {
    /// The target CPU is not currently schedulable.
    CoreInactive { cpu: usize },
    /// The target CPU is suspended or being taken offline.
    DeviceSuspended { cpu: usize },
    /// No table entry within the policy bounds satisfies the relation.
    InvalidTarget {
        cpu: usize,
        target_khz: u32,
        relation: Relation,
    },
    /// The platform has no frequency table for the CPU.
    NoTableAvailable { cpu: usize },
    /// The clock source refused the rate change.
    ClockSetFailed { cpu: usize, freq_khz: u32 },
    /// CPU ID beyond the possible range.
    InvalidCpu { cpu: usize, nr_cpus: usize },
    /// The CPU's policy was never initialized.
    Uninitialized { cpu: usize },
}

impl CpufreqError {
    /// Negative errno for the condition, as cpufreq drivers report it.
    pub fn errno(&self) -> i32 {
        match self {
            CpufreqError::CoreInactive { .. } => -libc::ENODEV,
            CpufreqError::DeviceSuspended { .. } => -libc::EFAULT,
            CpufreqError::InvalidTarget { .. } => -libc::EINVAL,
            CpufreqError::NoTableAvailable { .. } => -libc::ENODEV,
            CpufreqError::ClockSetFailed { .. } => -libc::EIO,
            CpufreqError::InvalidCpu { .. } => -libc::EINVAL,
            CpufreqError::Uninitialized { .. } => -libc::ENODEV,
        }
    }

    /// Look up the taxonomy entry carried by an `anyhow::Error`, if any.
    pub fn of(err: &anyhow::Error) -> Option<CpufreqError> {
        err.downcast_ref::<CpufreqError>()
            .or_else(|| {
                err.chain()
                    .find_map(|cause| cause.downcast_ref::<CpufreqError>())
            })
            .copied()
    }
}

impl fmt::Display for CpufreqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpufreqError::CoreInactive { cpu } => write!(f, "cpu {} is not active", cpu),
            CpufreqError::DeviceSuspended { cpu } => {
                write!(f, "cpu {} frequency change requested in suspend", cpu)
            }
            CpufreqError::InvalidTarget {
                cpu,
                target_khz,
                relation,
            } => write!(
                f,
                "cpu {} invalid target_freq {} (relation {})",
                cpu, target_khz, relation
            ),
            CpufreqError::NoTableAvailable { cpu } => {
                write!(f, "no frequency table for cpu {}", cpu)
            }
            CpufreqError::ClockSetFailed { cpu, freq_khz } => {
                write!(f, "failed to set cpu {} clock to {} kHz", cpu, freq_khz)
            }
            CpufreqError::InvalidCpu { cpu, nr_cpus } => {
                write!(f, "invalid cpu {} passed, max {}", cpu, nr_cpus)
            }
            CpufreqError::Uninitialized { cpu } => {
                write!(f, "cpu {} has no initialized policy", cpu)
            }
        }
    }
}

impl std::error::Error for CpufreqError {}
