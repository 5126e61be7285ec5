// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::Mutex;
use std::sync::MutexGuard;

use anyhow::bail;
use anyhow::Result;

use crate::CpufreqError;

/// Per-CPU gate state. Anything but `Active` blocks transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Active,
    /// The CPU is being taken offline.
    SuspendPending,
    /// The system is suspended.
    Suspended,
}

impl GateState {
    pub fn is_suspended(&self) -> bool {
        *self != GateState::Active
    }
}

/// Per-CPU mutex guarding the suspended flag.
///
/// A transition holds the gate from the suspended check until the clock write
/// has completed, so the flag can never flip while a transition is in flight
/// on that CPU and no transition can start once a flip has completed.
#[derive(Debug)]
pub struct SuspendGate {
    cpu: usize,
    state: Mutex<GateState>,
}

/// Held for the duration of one transition.
#[derive(Debug)]
pub struct GateGuard<'a> {
    cpu: usize,
    _state: MutexGuard<'a, GateState>,
}

impl GateGuard<'_> {
    pub fn cpu(&self) -> usize {
        self.cpu
    }
}

impl SuspendGate {
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu,
            state: Mutex::new(GateState::Active),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the gate for a transition. Fails with `DeviceSuspended` without
    /// holding the mutex if the CPU is suspended.
    pub fn try_enter(&self) -> Result<GateGuard<'_>> {
        let state = self.lock();
        if state.is_suspended() {
            bail!(CpufreqError::DeviceSuspended { cpu: self.cpu });
        }
        Ok(GateGuard {
            cpu: self.cpu,
            _state: state,
        })
    }

    /// Set the state, waiting for any in-flight transition to finish first.
    /// Returns the previous state.
    pub fn set_state(&self, state: GateState) -> GateState {
        std::mem::replace(&mut *self.lock(), state)
    }

    pub fn set_suspended(&self, suspended: bool) {
        let _ = self.set_state(if suspended {
            GateState::Suspended
        } else {
            GateState::Active
        });
    }

    pub fn state(&self) -> GateState {
        *self.lock()
    }

    pub fn is_suspended(&self) -> bool {
        self.state().is_suspended()
    }
}
