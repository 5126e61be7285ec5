// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cross-CPU dispatch
//!
//! A clock write has to happen on the CPU whose clock is being changed. Every
//! possible CPU gets one persistent worker thread, pinned to that CPU, which
//! consumes transition requests from a single-slot channel and answers each
//! on a one-shot completion channel. The requester blocks on the completion
//! until the worker has run the transition.
//!
//! If the requesting thread is already restricted to the target CPU, the
//! hand-off is skipped and the transition runs inline.
//!
//! The kernel breaks a thread's affinity when its only CPU goes offline, and
//! a worker may be spawned while its CPU is still offline. The worker
//! therefore checks its pin before every transition and re-binds if needed;
//! if the CPU can't be bound, the request fails with `CoreInactive` and the
//! clock is left alone.
//!
//! Callers serialize dispatches per CPU through the suspend gate; the
//! per-worker [`DispatchState`] additionally guarantees that a completion left
//! behind by an earlier dispatch is drained before the slot is reused.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use crossbeam::channel;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use log::debug;
use log::warn;

use crate::Affinity;
use crate::CpufreqError;
use crate::TransitionExecutor;

struct WorkItem {
    old: u32,
    new: u32,
    done: Sender<Result<()>>,
}

/// Bookkeeping for the single in-flight dispatch a CPU supports.
#[derive(Debug, Default)]
pub struct DispatchState {
    pending: Option<Receiver<Result<()>>>,
    nr_dispatched: u64,
    nr_completed: u64,
    nr_inline: u64,
}

impl DispatchState {
    /// Wait out a completion that was never collected.
    fn drain(&mut self, cpu: usize) {
        if let Some(stale) = self.pending.take() {
            debug!("cpu{} draining stale dispatch", cpu);
            if stale.recv().is_ok() {
                self.nr_completed += 1;
            }
        }
    }
}

/// Counters describing a worker's dispatch history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub nr_dispatched: u64,
    pub nr_completed: u64,
    pub nr_inline: u64,
}

/// Make sure the calling thread runs on `cpu` and nowhere else.
fn pin_to(affinity: &dyn Affinity, cpu: usize) -> Result<()> {
    if affinity.current_is(cpu) {
        return Ok(());
    }
    affinity
        .bind_current(cpu)
        .context(CpufreqError::CoreInactive { cpu })?;
    debug!("cpufreq worker re-bound to cpu{}", cpu);
    Ok(())
}

pub struct CoreWorker {
    cpu: usize,
    executor: Arc<TransitionExecutor>,
    affinity: Arc<dyn Affinity>,
    tx: Option<Sender<WorkItem>>,
    handle: Option<JoinHandle<()>>,
    state: Mutex<DispatchState>,
}

impl CoreWorker {
    /// Start the worker thread for `cpu`.
    pub fn spawn(
        cpu: usize,
        executor: Arc<TransitionExecutor>,
        affinity: Arc<dyn Affinity>,
    ) -> Result<CoreWorker> {
        let (tx, rx) = channel::bounded::<WorkItem>(1);

        let worker_executor = executor.clone();
        let worker_affinity = affinity.clone();
        let handle = std::thread::Builder::new()
            .name(format!("cpufreq/{}", cpu))
            .spawn(move || {
                if let Err(e) = worker_affinity.bind_current(cpu) {
                    debug!("cpufreq worker not yet bound to cpu{}: {:#}", cpu, e);
                }
                for item in rx.iter() {
                    // Hotplug drops the pin; never run a transition off-core.
                    let status = pin_to(worker_affinity.as_ref(), cpu)
                        .and_then(|_| worker_executor.apply(cpu, item.old, item.new));
                    // The requester may have gone away; nothing to report to.
                    let _ = item.done.send(status);
                }
                debug!("cpufreq worker for cpu{} exiting", cpu);
            })
            .with_context(|| format!("Failed to spawn cpufreq worker for cpu{}", cpu))?;

        Ok(CoreWorker {
            cpu,
            executor,
            affinity,
            tx: Some(tx),
            handle: Some(handle),
            state: Mutex::new(DispatchState::default()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Return the dispatch slot to idle.
    pub fn prepare(&self) {
        self.lock_state().drain(self.cpu);
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.lock_state();
        DispatchStats {
            nr_dispatched: state.nr_dispatched,
            nr_completed: state.nr_completed,
            nr_inline: state.nr_inline,
        }
    }

    /// Run the transition `old -> new` on this worker's CPU and return its
    /// result. Blocks until the transition has completed.
    pub fn dispatch(&self, old: u32, new: u32) -> Result<()> {
        if self.affinity.current_is(self.cpu) {
            self.lock_state().nr_inline += 1;
            return self.executor.apply(self.cpu, old, new);
        }

        let mut state = self.lock_state();
        state.drain(self.cpu);

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("cpufreq worker for cpu{} is stopped", self.cpu))?;
        let (done_tx, done_rx) = channel::bounded(1);
        tx.send(WorkItem {
            old,
            new,
            done: done_tx,
        })
        .map_err(|_| anyhow!("cpufreq worker for cpu{} exited", self.cpu))?;
        state.nr_dispatched += 1;

        let status = state
            .pending
            .insert(done_rx)
            .recv()
            .map_err(|_| anyhow!("cpufreq worker for cpu{} dropped the request", self.cpu))?;
        state.pending = None;
        state.nr_completed += 1;
        status
    }
}

impl Drop for CoreWorker {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cpufreq worker for cpu{} panicked", self.cpu);
            }
        }
    }
}
