// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CPU frequency driver
//!
//! [`CpufreqDriver`] owns all per-CPU state, indexed by CPU ID: the suspend
//! gate, the policy and the dispatch worker. It is created once for every
//! possible CPU, whether online or not, and lives until dropped.
//!
//! CPUs that share a clock form one group owned by its lowest CPU. Requests
//! for any CPU of the group take the owner's gate and run on the owner's
//! worker, so the group sees one transition at a time.
//!
//! A frequency request flows through it as follows:
//!
//!```text
//!     set_target(cpu, target, relation)
//!         |
//!         o-- cpu not active?          -> CoreInactive
//!         o-- take owner's suspend gate, then cpu's
//!         |                            -> DeviceSuspended
//!         o-- resolve within limits    -> InvalidTarget
//!         o-- dispatch to owner's worker (or inline if already bound there)
//!         |       `-- TransitionExecutor::apply()
//!         o-- record new current frequency
//!         `-- release gate
//!```

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use log::debug;
use log::error;
use log::info;

use crate::apply_event;
use crate::policy;
use crate::policy::CorePolicy;
use crate::Affinity;
use crate::ClockSource;
use crate::Config;
use crate::CoreWorker;
use crate::CpufreqError;
use crate::DispatchStats;
use crate::GateGuard;
use crate::GateState;
use crate::HostAffinity;
use crate::LifecycleEvent;
use crate::NoopPriority;
use crate::OperatingPoint;
use crate::Platform;
use crate::PolicyBounds;
use crate::PolicyView;
use crate::PriorityControl;
use crate::Relation;
use crate::RtPriority;
use crate::SuspendGate;
use crate::TransitionExecutor;
use crate::TransitionNotifier;
use crate::TransitionObserver;

struct CoreSlot {
    gate: SuspendGate,
    policy: RwLock<Option<CorePolicy>>,
    worker: CoreWorker,
}

impl CoreSlot {
    fn read_policy(&self) -> RwLockReadGuard<'_, Option<CorePolicy>> {
        self.policy.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_policy(&self) -> RwLockWriteGuard<'_, Option<CorePolicy>> {
        self.policy.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for [`CpufreqDriver`].
///
/// Example:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use scx_cpufreq::{CpufreqDriver, Relation, SysfsCpufreq};
/// let sysfs = Arc::new(SysfsCpufreq::new("/sys/devices/system/cpu")?);
/// let driver = CpufreqDriver::builder(sysfs.clone(), sysfs).build()?;
/// driver.init(0)?;
/// driver.set_target(0, 1_200_000, Relation::RoundDown)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct CpufreqDriverBuilder {
    clock: Arc<dyn ClockSource>,
    platform: Arc<dyn Platform>,
    priority: Option<Arc<dyn PriorityControl>>,
    affinity: Option<Arc<dyn Affinity>>,
    config: Config,
}

impl CpufreqDriverBuilder {
    /// Use `priority` instead of `sched_setscheduler(2)` for ramp-up boosts.
    pub fn with_priority(mut self, priority: Arc<dyn PriorityControl>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Use `affinity` instead of `sched_{get,set}affinity(2)`.
    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Validate the config and start one dispatch worker per possible CPU.
    pub fn build(self) -> Result<CpufreqDriver> {
        self.config.validate()?;

        let priority: Arc<dyn PriorityControl> = if self.config.boost_upward {
            self.priority.unwrap_or_else(|| Arc::new(RtPriority))
        } else {
            Arc::new(NoopPriority)
        };
        let affinity = self.affinity.unwrap_or_else(|| Arc::new(HostAffinity));

        let notifier = Arc::new(TransitionNotifier::new());
        let executor = Arc::new(TransitionExecutor::new(
            self.clock.clone(),
            notifier.clone(),
            priority,
            self.config.rt_priority,
        ));

        let nr_cpus = self.platform.nr_possible_cpus();
        let mut cores = Vec::with_capacity(nr_cpus);
        for cpu in 0..nr_cpus {
            cores.push(CoreSlot {
                gate: SuspendGate::new(cpu),
                policy: RwLock::new(None),
                worker: CoreWorker::spawn(cpu, executor.clone(), affinity.clone())?,
            });
        }
        info!("cpufreq: started {} dispatch workers", nr_cpus);

        Ok(CpufreqDriver {
            clock: self.clock,
            platform: self.platform,
            notifier,
            config: self.config,
            cores,
        })
    }
}

pub struct CpufreqDriver {
    clock: Arc<dyn ClockSource>,
    platform: Arc<dyn Platform>,
    notifier: Arc<TransitionNotifier>,
    config: Config,
    cores: Vec<CoreSlot>,
}

impl CpufreqDriver {
    pub fn builder(
        clock: Arc<dyn ClockSource>,
        platform: Arc<dyn Platform>,
    ) -> CpufreqDriverBuilder {
        CpufreqDriverBuilder {
            clock,
            platform,
            priority: None,
            affinity: None,
            config: Config::default(),
        }
    }

    pub fn nr_cpus(&self) -> usize {
        self.cores.len()
    }

    fn core(&self, cpu: usize) -> Result<&CoreSlot> {
        self.cores.get(cpu).ok_or_else(|| {
            anyhow!(CpufreqError::InvalidCpu {
                cpu,
                nr_cpus: self.cores.len(),
            })
        })
    }

    /// Register an observer for pre/post change notifications.
    pub fn register_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.notifier.register(observer);
    }

    /// Set up the policy of `cpu`: settle its clock on a table entry, record
    /// the transition latency and reset its dispatch slot. May be called again
    /// when the CPU comes back online.
    pub fn init(&self, cpu: usize) -> Result<()> {
        let core = self.core(cpu)?;
        let policy = policy::initialize(
            cpu,
            self.clock.as_ref(),
            self.platform.as_ref(),
            self.config.freq_limits,
        )?;
        core.worker.prepare();

        debug!(
            "cpufreq: cpu{} policy cur {} limits {}-{} latency {:?}",
            cpu,
            policy.view.cur,
            policy.view.limits.min,
            policy.view.limits.max,
            policy.view.transition_latency
        );
        *core.write_policy() = Some(policy);
        Ok(())
    }

    /// Clamp `bounds` into the hardware limits of `cpu`.
    pub fn verify(&self, cpu: usize, bounds: PolicyBounds) -> Result<PolicyBounds> {
        let core = self.core(cpu)?;
        let policy = core.read_policy();
        match policy.as_ref() {
            Some(p) => Ok(bounds.verify_within(&p.view.cpuinfo)),
            None => bail!(CpufreqError::Uninitialized { cpu }),
        }
    }

    /// Verify `bounds` and make them the scaling limits of `cpu`. Returns the
    /// limits actually applied.
    pub fn set_limits(&self, cpu: usize, bounds: PolicyBounds) -> Result<PolicyBounds> {
        let core = self.core(cpu)?;
        let mut policy = core.write_policy();
        match policy.as_mut() {
            Some(p) => {
                p.view.limits = bounds.verify_within(&p.view.cpuinfo);
                Ok(p.view.limits)
            }
            None => bail!(CpufreqError::Uninitialized { cpu }),
        }
    }

    /// Move `cpu` to the table entry nearest `target_khz` in the direction of
    /// `relation` and return the entry applied.
    pub fn set_target(
        &self,
        cpu: usize,
        target_khz: u32,
        relation: Relation,
    ) -> Result<OperatingPoint> {
        let core = self.core(cpu)?;

        if !self.platform.core_is_active(cpu) {
            info!("cpufreq: cpu {} is not active.", cpu);
            bail!(CpufreqError::CoreInactive { cpu });
        }

        // A coupled group is driven through its lowest CPU. Its gate is taken
        // first, so every request on the group serializes there.
        let owner_cpu = self.owner_of(cpu);
        let owner = &self.cores[owner_cpu];
        let _owner_gate = self.enter_gate(owner)?;
        let _gate = if owner_cpu != cpu {
            Some(self.enter_gate(core)?)
        } else {
            None
        };

        let (old, op) = {
            let policy = core.read_policy();
            let p = match policy.as_ref() {
                Some(p) => p,
                None => bail!(CpufreqError::Uninitialized { cpu }),
            };

            let op = match p.table.resolve_within(&p.view.limits, target_khz, relation) {
                Some(op) => op,
                None => {
                    error!("cpufreq: invalid target_freq: {}", target_khz);
                    bail!(CpufreqError::InvalidTarget {
                        cpu,
                        target_khz,
                        relation,
                    });
                }
            };

            debug!(
                "CPU[{}] target {} relation {} ({}-{}) selected {}",
                cpu, target_khz, relation, p.view.limits.min, p.view.limits.max, op.frequency
            );
            (p.view.cur, op)
        };

        owner.worker.dispatch(old, op.frequency)?;
        self.record_current(cpu, op.frequency);
        Ok(op)
    }

    fn enter_gate<'a>(&self, core: &'a CoreSlot) -> Result<GateGuard<'a>> {
        core.gate.try_enter().map_err(|e| {
            debug!(
                "cpufreq: cpu{} scheduling frequency change in suspend.",
                core.worker.cpu()
            );
            e
        })
    }

    /// CPU whose gate and worker carry transitions for `cpu`: the lowest CPU
    /// sharing its clock, or `cpu` itself.
    fn owner_of(&self, cpu: usize) -> usize {
        self.cores[cpu]
            .read_policy()
            .as_ref()
            .and_then(|p| p.view.related_cpus.iter().min().copied())
            .filter(|&owner| owner < self.cores.len())
            .unwrap_or(cpu)
    }

    // Coupled CPUs move together; keep every initialized sibling in sync.
    fn record_current(&self, cpu: usize, freq: u32) {
        let related = match self.cores[cpu].read_policy().as_ref() {
            Some(p) => p.view.related_cpus.clone(),
            None => return,
        };
        for sibling in related {
            if let Some(core) = self.cores.get(sibling) {
                if let Some(p) = core.write_policy().as_mut() {
                    p.view.cur = freq;
                }
            }
        }
    }

    /// Last applied frequency of `cpu` in kHz.
    pub fn get_current(&self, cpu: usize) -> Result<u32> {
        Ok(self.policy(cpu)?.cur)
    }

    /// Snapshot of the policy of `cpu`.
    pub fn policy(&self, cpu: usize) -> Result<PolicyView> {
        let core = self.core(cpu)?;
        let policy = core.read_policy();
        match policy.as_ref() {
            Some(p) => Ok(p.view.clone()),
            None => bail!(CpufreqError::Uninitialized { cpu }),
        }
    }

    /// Rate the clock source currently reports for `cpu`.
    pub fn hardware_frequency(&self, cpu: usize) -> Result<u32> {
        self.core(cpu)?;
        self.clock.get_rate(cpu)
    }

    /// Frequency table of `cpu`, ascending.
    pub fn available_frequencies(&self, cpu: usize) -> Result<Vec<u32>> {
        let core = self.core(cpu)?;
        let policy = core.read_policy();
        match policy.as_ref() {
            Some(p) => Ok(p.table.frequencies().to_vec()),
            None => bail!(CpufreqError::Uninitialized { cpu }),
        }
    }

    pub fn gate_state(&self, cpu: usize) -> Result<GateState> {
        Ok(self.core(cpu)?.gate.state())
    }

    pub fn dispatch_stats(&self, cpu: usize) -> Result<DispatchStats> {
        Ok(self.core(cpu)?.worker.stats())
    }

    /// Hotplug and power event entry point.
    pub fn handle_event(&self, event: LifecycleEvent) -> Result<()> {
        if let Some(cpu) = event.cpu() {
            self.core(cpu)?;
        }
        let gates: Vec<&SuspendGate> = self.cores.iter().map(|core| &core.gate).collect();
        apply_event(&gates, event);
        Ok(())
    }

    /// Block transitions on every CPU.
    pub fn suspend_all(&self) -> Result<()> {
        self.handle_event(LifecycleEvent::SystemSuspend)
    }

    /// Allow transitions on every CPU again.
    pub fn resume_all(&self) -> Result<()> {
        self.handle_event(LifecycleEvent::SystemResume)
    }
}
