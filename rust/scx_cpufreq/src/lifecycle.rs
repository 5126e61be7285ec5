// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;

use log::info;

use crate::GateState;
use crate::SuspendGate;

/// Hotplug and system power events that gate transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    CoreOnline(usize),
    /// The CPU is about to go offline.
    CoreOfflinePrepare(usize),
    /// An offline attempt was aborted; the CPU stays up.
    CoreOfflineFailed(usize),
    SystemSuspend,
    SystemResume,
}

impl LifecycleEvent {
    /// The CPU this event is about, or `None` for system-wide events.
    pub fn cpu(&self) -> Option<usize> {
        match self {
            LifecycleEvent::CoreOnline(cpu)
            | LifecycleEvent::CoreOfflinePrepare(cpu)
            | LifecycleEvent::CoreOfflineFailed(cpu) => Some(*cpu),
            LifecycleEvent::SystemSuspend | LifecycleEvent::SystemResume => None,
        }
    }

    /// Gate state the affected CPUs end up in.
    pub fn target_state(&self) -> GateState {
        match self {
            LifecycleEvent::CoreOnline(_)
            | LifecycleEvent::CoreOfflineFailed(_)
            | LifecycleEvent::SystemResume => GateState::Active,
            LifecycleEvent::CoreOfflinePrepare(_) => GateState::SuspendPending,
            LifecycleEvent::SystemSuspend => GateState::Suspended,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::CoreOnline(cpu) => write!(f, "cpu{} online", cpu),
            LifecycleEvent::CoreOfflinePrepare(cpu) => write!(f, "cpu{} down prepare", cpu),
            LifecycleEvent::CoreOfflineFailed(cpu) => write!(f, "cpu{} down failed", cpu),
            LifecycleEvent::SystemSuspend => write!(f, "system suspend"),
            LifecycleEvent::SystemResume => write!(f, "system resume"),
        }
    }
}

/// Apply `event` to the per-CPU gates. `gates` must be indexed by CPU ID and
/// the event's CPU must be in range.
///
/// Each flip takes the gate's mutex, so it waits for a transition in flight
/// on that CPU and no transition starts after it returns.
pub fn apply_event(gates: &[&SuspendGate], event: LifecycleEvent) {
    let state = event.target_state();
    match event.cpu() {
        Some(cpu) => {
            let gate = gates[cpu];
            let prev = gate.set_state(state);
            if prev != state {
                info!("cpufreq: {}: {:?} -> {:?}", event, prev, state);
            }
        }
        None => {
            for gate in gates {
                let _ = gate.set_state(state);
            }
            info!("cpufreq: {}: all cpus {:?}", event, state);
        }
    }
}
