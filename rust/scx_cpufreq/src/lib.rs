// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Per-CPU frequency transition dispatcher
//!
//! This crate executes CPU frequency changes that some policy (a governor, a
//! scheduler, an operator) has already decided on. It does not decide what
//! frequency to run at.
//!
//! A request names a CPU, a target frequency and a rounding [`Relation`]. The
//! [`CpufreqDriver`] resolves it against the CPU's [`FrequencyTable`], makes
//! sure the CPU is not suspended or going offline, and has the clock write
//! performed on the CPU itself by that CPU's dispatch worker. The requester
//! blocks until the write is done and gets its result back.
//!
//! ## Collaborators
//!
//! The clock primitive, platform queries, transition observers, host
//! priority control and CPU affinity are all traits: [`ClockSource`],
//! [`Platform`], [`TransitionObserver`], [`PriorityControl`] and
//! [`Affinity`]. [`SysfsCpufreq`] implements the first two on top of the
//! Linux cpufreq sysfs interface; [`RtPriority`] and [`HostAffinity`] use the
//! corresponding syscalls.
//!
//! ## Lifecycle
//!
//! Hotplug and suspend/resume are delivered as [`LifecycleEvent`]s through
//! [`CpufreqDriver::handle_event`].

mod affinity;
pub use affinity::Affinity;
pub use affinity::HostAffinity;

mod config;
pub use config::get_config_path;
pub use config::init_config;
pub use config::parse_config_file;
pub use config::Config;
pub use config::FreqLimits;

mod dispatch;
pub use dispatch::CoreWorker;
pub use dispatch::DispatchState;
pub use dispatch::DispatchStats;

mod driver;
pub use driver::CpufreqDriver;
pub use driver::CpufreqDriverBuilder;

mod error;
pub use error::CpufreqError;

mod executor;
pub use executor::TransitionExecutor;

mod freq_table;
pub use freq_table::FrequencyTable;
pub use freq_table::OperatingPoint;
pub use freq_table::PolicyBounds;
pub use freq_table::Relation;

mod lifecycle;
pub use lifecycle::apply_event;
pub use lifecycle::LifecycleEvent;

mod platform;
pub use platform::ClockSource;
pub use platform::FreqTransition;
pub use platform::Platform;
pub use platform::SetRateReason;
pub use platform::TransitionNotifier;
pub use platform::TransitionObserver;
pub use platform::TransitionPhase;

mod policy;
pub use policy::PolicyView;

mod priority;
pub use priority::NoopPriority;
pub use priority::PriorToken;
pub use priority::PriorityBoost;
pub use priority::PriorityControl;
pub use priority::RtPriority;
pub use priority::DEFAULT_RT_PRIORITY;

mod suspend;
pub use suspend::GateGuard;
pub use suspend::GateState;
pub use suspend::SuspendGate;

mod sysfs;
pub use sysfs::read_cpulist;
pub use sysfs::SysfsCpufreq;
pub use sysfs::SYSFS_CPU_ROOT;
