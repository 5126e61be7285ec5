// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::PolicyBounds;
use crate::DEFAULT_RT_PRIORITY;

/// Forced hardware and policy limits, overriding the table extremes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreqLimits {
    pub min_khz: u32,
    pub max_khz: u32,
}

impl From<FreqLimits> for PolicyBounds {
    fn from(limits: FreqLimits) -> Self {
        PolicyBounds::new(limits.min_khz, limits.max_khz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub freq_limits: Option<FreqLimits>,
    /// FIFO priority used while ramping a clock up.
    pub rt_priority: i32,
    /// Elevate the transition thread's priority on ramp-ups at all.
    pub boost_upward: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            freq_limits: None,
            rt_priority: DEFAULT_RT_PRIORITY,
            boost_upward: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if let Some(limits) = self.freq_limits {
            if limits.min_khz == 0 || limits.min_khz > limits.max_khz {
                bail!(
                    "Invalid freq_limits: min_khz {} max_khz {}",
                    limits.min_khz,
                    limits.max_khz
                );
            }
        }
        if !(1..=DEFAULT_RT_PRIORITY).contains(&self.rt_priority) {
            bail!(
                "rt_priority {} out of range 1..={}",
                self.rt_priority,
                DEFAULT_RT_PRIORITY
            );
        }
        Ok(())
    }
}

/// Initialize config from first found config path, otherwise fall back to the
/// default config.
pub fn init_config() -> Result<Config> {
    match get_config_path() {
        Some(config_path) => parse_config_file(&config_path),
        None => Ok(Config::default()),
    }
}

pub fn parse_config_file<P: AsRef<Path>>(filepath: P) -> Result<Config> {
    let filepath = filepath.as_ref();
    let file_content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read config {}", filepath.display()))?;
    parse_config_content(&file_content)
        .with_context(|| format!("Failed to parse config {}", filepath.display()))
}

pub fn get_config_path() -> Option<String> {
    let check_paths = [
        "/etc/scx_cpufreq/config.toml".to_owned(),
        "/etc/scx_cpufreq.toml".to_owned(),
    ];
    check_paths
        .into_iter()
        .find(|check_path| Path::new(check_path).exists())
}

fn parse_config_content(file_content: &str) -> Result<Config> {
    if file_content.trim().is_empty() {
        bail!("The config file is empty!")
    }
    let config: Config = toml::from_str(file_content)?;
    config.validate()?;
    Ok(config)
}
