// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Services the dispatcher consumes but does not implement: the clock
//! primitive, platform queries and transition observers.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;

use crate::FrequencyTable;

/// Why a rate change is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetRateReason {
    /// Regular transition requested through the dispatcher.
    Cpufreq,
    /// Normalization of an off-table boot frequency.
    Init,
}

/// The clock-rate primitive.
pub trait ClockSource: Send + Sync {
    fn set_rate(&self, cpu: usize, freq_khz: u32, reason: SetRateReason) -> Result<()>;

    fn get_rate(&self, cpu: usize) -> Result<u32>;

    /// Worst-case time a rate switch takes.
    fn switch_time(&self) -> Duration;
}

/// Host platform queries.
pub trait Platform: Send + Sync {
    fn nr_possible_cpus(&self) -> usize;

    fn frequency_table(&self, cpu: usize) -> Option<FrequencyTable>;

    /// Whether the CPU is online and schedulable right now.
    fn core_is_active(&self, cpu: usize) -> bool;

    /// True when all CPUs are driven by a single clock and cannot be scaled
    /// independently.
    fn cores_share_clock(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    PreChange,
    PostChange,
}

/// Old and new frequency of a transition on `cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqTransition {
    pub cpu: usize,
    pub old: u32,
    pub new: u32,
}

pub trait TransitionObserver: Send + Sync {
    fn notify(&self, transition: &FreqTransition, phase: TransitionPhase);
}

/// Fans transition notifications out to every registered observer, in
/// registration order.
#[derive(Default)]
pub struct TransitionNotifier {
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl TransitionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn nr_observers(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn notify(&self, transition: &FreqTransition, phase: TransitionPhase) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.notify(transition, phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<(&'static str, TransitionPhase)>>>,
    }

    impl TransitionObserver for Recorder {
        fn notify(&self, _: &FreqTransition, phase: TransitionPhase) {
            self.log.lock().unwrap().push((self.tag, phase));
        }
    }

    #[test]
    fn test_notifier_preserves_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = TransitionNotifier::new();
        notifier.register(Arc::new(Recorder {
            tag: "a",
            log: log.clone(),
        }));
        notifier.register(Arc::new(Recorder {
            tag: "b",
            log: log.clone(),
        }));
        assert_eq!(notifier.nr_observers(), 2);

        let t = FreqTransition {
            cpu: 0,
            old: 300,
            new: 600,
        };
        notifier.notify(&t, TransitionPhase::PreChange);
        notifier.notify(&t, TransitionPhase::PostChange);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a", TransitionPhase::PreChange),
                ("b", TransitionPhase::PreChange),
                ("a", TransitionPhase::PostChange),
                ("b", TransitionPhase::PostChange),
            ]
        );
    }
}
