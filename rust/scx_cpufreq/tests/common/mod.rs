// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use scx_cpufreq::*;

pub const MHZ: u32 = 1000;

/// Table used by most tests: 300, 600, 900 MHz.
pub fn default_table() -> Vec<u32> {
    vec![300 * MHZ, 600 * MHZ, 900 * MHZ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCall {
    pub cpu: usize,
    pub freq: u32,
    pub reason: SetRateReason,
    pub thread: Option<usize>,
}

/// Clock that records every write and can be told to fail.
pub struct FakeClock {
    rates: Mutex<Vec<u32>>,
    calls: Mutex<Vec<SetCall>>,
    failing: Mutex<HashSet<u32>>,
    delay: Mutex<Duration>,
    switch_time: Duration,
    in_set: Vec<AtomicUsize>,
    max_in_set: Vec<AtomicUsize>,
    in_set_total: AtomicUsize,
    max_in_set_total: AtomicUsize,
}

impl FakeClock {
    pub fn new(initial: Vec<u32>) -> Arc<FakeClock> {
        let n = initial.len();
        Arc::new(FakeClock {
            rates: Mutex::new(initial),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            switch_time: Duration::from_micros(50),
            in_set: (0..n).map(|_| AtomicUsize::new(0)).collect(),
            max_in_set: (0..n).map(|_| AtomicUsize::new(0)).collect(),
            in_set_total: AtomicUsize::new(0),
            max_in_set_total: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<SetCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_on(&self, freq: u32) {
        self.failing.lock().unwrap().insert(freq);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn rate(&self, cpu: usize) -> u32 {
        self.rates.lock().unwrap()[cpu]
    }

    /// Highest number of concurrent writes ever seen on `cpu`.
    pub fn max_concurrency(&self, cpu: usize) -> usize {
        self.max_in_set[cpu].load(Ordering::SeqCst)
    }

    /// Highest number of concurrent writes ever seen across all CPUs.
    pub fn max_total_concurrency(&self) -> usize {
        self.max_in_set_total.load(Ordering::SeqCst)
    }
}

impl ClockSource for FakeClock {
    fn set_rate(&self, cpu: usize, freq_khz: u32, reason: SetRateReason) -> Result<()> {
        let now = self.in_set[cpu].fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_set[cpu].fetch_max(now, Ordering::SeqCst);
        let total = self.in_set_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_set_total.fetch_max(total, Ordering::SeqCst);

        self.calls.lock().unwrap().push(SetCall {
            cpu,
            freq: freq_khz,
            reason,
            thread: bound_cpu(),
        });

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let res = if self.failing.lock().unwrap().contains(&freq_khz) {
            Err(anyhow::anyhow!("acpuclk: cpu{} refused {} kHz", cpu, freq_khz))
        } else {
            self.rates.lock().unwrap()[cpu] = freq_khz;
            Ok(())
        };

        self.in_set[cpu].fetch_sub(1, Ordering::SeqCst);
        self.in_set_total.fetch_sub(1, Ordering::SeqCst);
        res
    }

    fn get_rate(&self, cpu: usize) -> Result<u32> {
        Ok(self.rates.lock().unwrap()[cpu])
    }

    fn switch_time(&self) -> Duration {
        self.switch_time
    }
}

pub struct FakePlatform {
    tables: Vec<Option<Vec<u32>>>,
    active: Vec<AtomicBool>,
    shared: bool,
}

impl FakePlatform {
    pub fn new(nr_cpus: usize, table: Vec<u32>) -> Arc<FakePlatform> {
        Self::with_tables((0..nr_cpus).map(|_| Some(table.clone())).collect(), false)
    }

    pub fn with_tables(tables: Vec<Option<Vec<u32>>>, shared: bool) -> Arc<FakePlatform> {
        let n = tables.len();
        Arc::new(FakePlatform {
            tables,
            active: (0..n).map(|_| AtomicBool::new(true)).collect(),
            shared,
        })
    }

    pub fn set_active(&self, cpu: usize, active: bool) {
        self.active[cpu].store(active, Ordering::SeqCst);
    }
}

impl Platform for FakePlatform {
    fn nr_possible_cpus(&self) -> usize {
        self.tables.len()
    }

    fn frequency_table(&self, cpu: usize) -> Option<FrequencyTable> {
        let freqs = self.tables.get(cpu)?.clone()?;
        FrequencyTable::new(freqs).ok()
    }

    fn core_is_active(&self, cpu: usize) -> bool {
        self.active[cpu].load(Ordering::SeqCst)
    }

    fn cores_share_clock(&self) -> bool {
        self.shared
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioEvent {
    Elevate(i32),
    Restore(PriorToken),
}

/// Priority facility that records calls instead of touching the scheduler.
pub struct FakePriority {
    events: Mutex<Vec<PrioEvent>>,
    prior: PriorToken,
    already_fifo: bool,
    fail: bool,
}

impl FakePriority {
    pub fn new() -> Arc<FakePriority> {
        Arc::new(FakePriority {
            events: Mutex::new(Vec::new()),
            prior: PriorToken::new(libc::SCHED_OTHER, 0),
            already_fifo: false,
            fail: false,
        })
    }

    pub fn already_fifo() -> Arc<FakePriority> {
        Arc::new(FakePriority {
            events: Mutex::new(Vec::new()),
            prior: PriorToken::new(libc::SCHED_FIFO, 10),
            already_fifo: true,
            fail: false,
        })
    }

    pub fn failing() -> Arc<FakePriority> {
        Arc::new(FakePriority {
            events: Mutex::new(Vec::new()),
            prior: PriorToken::new(libc::SCHED_OTHER, 0),
            already_fifo: false,
            fail: true,
        })
    }

    pub fn events(&self) -> Vec<PrioEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn prior(&self) -> PriorToken {
        self.prior
    }
}

impl PriorityControl for FakePriority {
    fn elevate(&self, rt_priority: i32) -> Result<Option<PriorToken>> {
        if self.fail {
            bail!("EPERM");
        }
        if self.already_fifo {
            return Ok(None);
        }
        self.events
            .lock()
            .unwrap()
            .push(PrioEvent::Elevate(rt_priority));
        Ok(Some(self.prior))
    }

    fn restore(&self, token: PriorToken) -> Result<()> {
        self.events.lock().unwrap().push(PrioEvent::Restore(token));
        Ok(())
    }
}

thread_local! {
    static PIN: RefCell<Option<(usize, Arc<AtomicBool>)>> = const { RefCell::new(None) };
}

/// CPU the calling thread is pinned to through [`ThreadAffinity`], if the
/// pin is still intact.
pub fn bound_cpu() -> Option<usize> {
    PIN.with(|pin| {
        pin.borrow()
            .as_ref()
            .filter(|(_, intact)| intact.load(Ordering::SeqCst))
            .map(|(cpu, _)| *cpu)
    })
}

/// Affinity tracked per thread in a thread-local, so tests can pin without
/// touching the host's CPU masks. Taking a CPU offline refuses new binds to
/// it and breaks the pins of threads already bound there, as the kernel does.
#[derive(Default)]
pub struct ThreadAffinity {
    offline: Mutex<HashSet<usize>>,
    pins: Mutex<Vec<(usize, Arc<AtomicBool>)>>,
}

impl ThreadAffinity {
    pub fn new() -> Arc<ThreadAffinity> {
        Arc::new(ThreadAffinity::default())
    }

    pub fn set_offline(&self, cpu: usize) {
        self.offline.lock().unwrap().insert(cpu);
        for (pinned, intact) in self.pins.lock().unwrap().iter() {
            if *pinned == cpu {
                intact.store(false, Ordering::SeqCst);
            }
        }
    }

    pub fn set_online(&self, cpu: usize) {
        self.offline.lock().unwrap().remove(&cpu);
    }

    pub fn unbind_current() {
        PIN.with(|pin| *pin.borrow_mut() = None);
    }
}

impl Affinity for ThreadAffinity {
    fn bind_current(&self, cpu: usize) -> Result<()> {
        if self.offline.lock().unwrap().contains(&cpu) {
            bail!("cpu{} is offline", cpu);
        }
        let intact = Arc::new(AtomicBool::new(true));
        self.pins.lock().unwrap().push((cpu, intact.clone()));
        PIN.with(|pin| *pin.borrow_mut() = Some((cpu, intact)));
        Ok(())
    }

    fn current_is(&self, cpu: usize) -> bool {
        bound_cpu() == Some(cpu)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub transition: FreqTransition,
    pub phase: TransitionPhase,
    pub thread: Option<usize>,
}

/// Records notifications and flags a pre-change arriving while another
/// transition on the same CPU has not posted yet.
pub struct PairingObserver {
    log: Mutex<Vec<Notification>>,
    in_flight: Vec<AtomicBool>,
    violations: AtomicUsize,
}

impl PairingObserver {
    pub fn new(nr_cpus: usize) -> Arc<PairingObserver> {
        Arc::new(PairingObserver {
            log: Mutex::new(Vec::new()),
            in_flight: (0..nr_cpus).map(|_| AtomicBool::new(false)).collect(),
            violations: AtomicUsize::new(0),
        })
    }

    pub fn log(&self) -> Vec<Notification> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

impl TransitionObserver for PairingObserver {
    fn notify(&self, t: &FreqTransition, phase: TransitionPhase) {
        match phase {
            TransitionPhase::PreChange => {
                if self.in_flight[t.cpu].swap(true, Ordering::SeqCst) {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
            }
            TransitionPhase::PostChange => {
                self.in_flight[t.cpu].store(false, Ordering::SeqCst);
            }
        }
        self.log.lock().unwrap().push(Notification {
            transition: *t,
            phase,
            thread: bound_cpu(),
        });
    }
}

pub struct Harness {
    pub driver: CpufreqDriver,
    pub clock: Arc<FakeClock>,
    pub platform: Arc<FakePlatform>,
    pub priority: Arc<FakePriority>,
    pub affinity: Arc<ThreadAffinity>,
    pub observer: Arc<PairingObserver>,
}

impl Harness {
    pub fn build(
        clock: Arc<FakeClock>,
        platform: Arc<FakePlatform>,
        priority: Arc<FakePriority>,
        config: Config,
    ) -> Harness {
        Self::with_affinity(clock, platform, priority, config, ThreadAffinity::new())
    }

    pub fn with_affinity(
        clock: Arc<FakeClock>,
        platform: Arc<FakePlatform>,
        priority: Arc<FakePriority>,
        config: Config,
        affinity: Arc<ThreadAffinity>,
    ) -> Harness {
        let nr_cpus = platform.nr_possible_cpus();
        let driver = CpufreqDriver::builder(clock.clone(), platform.clone())
            .with_priority(priority.clone())
            .with_affinity(affinity.clone())
            .with_config(config)
            .build()
            .unwrap();
        let observer = PairingObserver::new(nr_cpus);
        driver.register_observer(observer.clone());
        Harness {
            driver,
            clock,
            platform,
            priority,
            affinity,
            observer,
        }
    }

    /// `nr_cpus` CPUs on the default table, all at 600 MHz.
    pub fn new(nr_cpus: usize) -> Harness {
        Self::build(
            FakeClock::new(vec![600 * MHZ; nr_cpus]),
            FakePlatform::new(nr_cpus, default_table()),
            FakePriority::new(),
            Config::default(),
        )
    }

    /// Like [`Harness::new`] with every CPU's policy initialized.
    pub fn initialized(nr_cpus: usize) -> Harness {
        let h = Self::new(nr_cpus);
        for cpu in 0..nr_cpus {
            h.driver.init(cpu).unwrap();
        }
        h.clock.clear_calls();
        h
    }
}

/// Simple xorshift32 PRNG for deterministic randomization.
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn range(&mut self, min: u32, max: u32) -> u32 {
        min + (self.next_u32() % (max - min + 1))
    }

    pub fn bool(&mut self) -> bool {
        self.next_u32() % 2 == 0
    }
}

/// Get seed from environment or use default.
pub fn get_seed() -> u32 {
    std::env::var("STRESS_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(42)
}
