// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Transient real-time priority for the thread performing a clock ramp-up.
//!
//! While a CPU is being clocked up, the thread doing the clock write must not
//! be preempted by lower priority work. [`PriorityBoost`] moves the calling
//! thread into the FIFO class for the duration of the write and puts it back
//! where it was when dropped, regardless of how the write went.

use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use log::warn;

/// Highest FIFO priority, MAX_RT_PRIO - 1.
pub const DEFAULT_RT_PRIORITY: i32 = 99;

/// Scheduling class and priority a thread had before elevation. The policy
/// is kept as `sched_getscheduler(2)` reported it, flags included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorToken {
    policy: i32,
    priority: i32,
}

impl PriorToken {
    pub fn new(policy: i32, priority: i32) -> Self {
        Self { policy, priority }
    }

    pub fn policy(&self) -> i32 {
        self.policy
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Host facility for changing the calling thread's scheduling class.
pub trait PriorityControl: Send + Sync {
    /// Move the calling thread to the FIFO class at `rt_priority`. Returns
    /// `None` if it already runs in that class and nothing was changed.
    fn elevate(&self, rt_priority: i32) -> Result<Option<PriorToken>>;

    /// Put the calling thread back to the class recorded in `token`.
    fn restore(&self, token: PriorToken) -> Result<()>;
}

/// `sched_setscheduler(2)` based implementation.
#[derive(Debug, Default)]
pub struct RtPriority;

impl RtPriority {
    fn set(policy: i32, priority: i32) -> Result<()> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let ret = unsafe { libc::sched_setscheduler(0, policy, &param) };
        if ret != 0 {
            bail!(
                "sched_setscheduler({}, {}) failed: {}",
                policy,
                priority,
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }
}

/// Whether `policy`, as returned by `sched_getscheduler(2)`, is the FIFO
/// class. SCHED_RESET_ON_FORK may be or'ed in.
fn is_fifo(policy: i32) -> bool {
    policy & !libc::SCHED_RESET_ON_FORK == libc::SCHED_FIFO
}

impl PriorityControl for RtPriority {
    fn elevate(&self, rt_priority: i32) -> Result<Option<PriorToken>> {
        let policy = unsafe { libc::sched_getscheduler(0) };
        if policy < 0 {
            bail!(
                "sched_getscheduler failed: {}",
                std::io::Error::last_os_error()
            );
        }
        if is_fifo(policy) {
            return Ok(None);
        }

        let mut param = libc::sched_param { sched_priority: 0 };
        if unsafe { libc::sched_getparam(0, &mut param) } != 0 {
            bail!("sched_getparam failed: {}", std::io::Error::last_os_error());
        }

        Self::set(libc::SCHED_FIFO, rt_priority)?;
        // The raw policy keeps SCHED_RESET_ON_FORK, which restore() sets again.
        Ok(Some(PriorToken::new(policy, param.sched_priority)))
    }

    fn restore(&self, token: PriorToken) -> Result<()> {
        Self::set(token.policy(), token.priority())
    }
}

/// For hosts without a real-time class, or when boosting is disabled.
#[derive(Debug, Default)]
pub struct NoopPriority;

impl PriorityControl for NoopPriority {
    fn elevate(&self, _rt_priority: i32) -> Result<Option<PriorToken>> {
        Ok(None)
    }

    fn restore(&self, _token: PriorToken) -> Result<()> {
        Ok(())
    }
}

/// Scoped elevation. The prior class is restored on drop.
///
/// Elevation is best effort: if the host refuses (e.g. missing
/// CAP_SYS_NICE), the failure is logged and the guard is inert.
pub struct PriorityBoost {
    control: Arc<dyn PriorityControl>,
    token: Option<PriorToken>,
}

impl PriorityBoost {
    pub fn acquire(control: &Arc<dyn PriorityControl>, rt_priority: i32) -> Self {
        let token = match control.elevate(rt_priority) {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to elevate transition priority: {:#}", e);
                None
            }
        };
        Self {
            control: control.clone(),
            token,
        }
    }

    /// Whether this guard changed the thread's scheduling class.
    pub fn elevated(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for PriorityBoost {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.control.restore(token) {
                warn!("Failed to restore scheduling class {:?}: {:#}", token, e);
            }
        }
    }
}
