// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use log::trace;

use crate::ClockSource;
use crate::CpufreqError;
use crate::FreqTransition;
use crate::PriorityBoost;
use crate::PriorityControl;
use crate::SetRateReason;
use crate::TransitionNotifier;
use crate::TransitionPhase;

/// Performs the clock write for a single transition, in whatever context it
/// is called from.
pub struct TransitionExecutor {
    clock: Arc<dyn ClockSource>,
    notifier: Arc<TransitionNotifier>,
    priority: Arc<dyn PriorityControl>,
    rt_priority: i32,
}

impl TransitionExecutor {
    pub fn new(
        clock: Arc<dyn ClockSource>,
        notifier: Arc<TransitionNotifier>,
        priority: Arc<dyn PriorityControl>,
        rt_priority: i32,
    ) -> Self {
        Self {
            clock,
            notifier,
            priority,
            rt_priority,
        }
    }

    /// Move `cpu` from `old` to `new` kHz.
    ///
    /// Ramp-ups run the clock write in the FIFO class so lower priority work
    /// can't stretch the window in which the policy and the actual clock rate
    /// disagree. The post-change notification is only sent if the write
    /// succeeded; the prior scheduling class is restored either way.
    pub fn apply(&self, cpu: usize, old: u32, new: u32) -> Result<()> {
        let freqs = FreqTransition { cpu, old, new };

        let _boost = if new > old {
            Some(PriorityBoost::acquire(&self.priority, self.rt_priority))
        } else {
            None
        };

        self.notifier.notify(&freqs, TransitionPhase::PreChange);

        self.clock
            .set_rate(cpu, new, SetRateReason::Cpufreq)
            .context(CpufreqError::ClockSetFailed { cpu, freq_khz: new })?;

        self.notifier.notify(&freqs, TransitionPhase::PostChange);
        trace!("cpu{} transitioned {} -> {}", cpu, old, new);
        Ok(())
    }
}
