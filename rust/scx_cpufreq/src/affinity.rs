// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use anyhow::bail;
use anyhow::Result;

/// CPU affinity of the calling thread.
pub trait Affinity: Send + Sync {
    /// Pin the calling thread to `cpu`.
    fn bind_current(&self, cpu: usize) -> Result<()>;

    /// True if the calling thread may run on `cpu` and nowhere else.
    fn current_is(&self, cpu: usize) -> bool;
}

/// `sched_{get,set}affinity(2)` based implementation.
#[derive(Debug, Default)]
pub struct HostAffinity;

impl Affinity for HostAffinity {
    fn bind_current(&self, cpu: usize) -> Result<()> {
        if cpu >= libc::CPU_SETSIZE as usize {
            bail!("cpu {} exceeds CPU_SETSIZE", cpu);
        }
        let ret = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if ret != 0 {
            bail!(
                "sched_setaffinity to cpu {} failed: {}",
                cpu,
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }

    fn current_is(&self, cpu: usize) -> bool {
        if cpu >= libc::CPU_SETSIZE as usize {
            return false;
        }
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
                return false;
            }
            libc::CPU_COUNT(&set) == 1 && libc::CPU_ISSET(cpu, &set)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_then_query() {
        let aff = HostAffinity;
        // Runs on its own thread so the test harness thread keeps its mask.
        std::thread::spawn(move || {
            if aff.bind_current(0).is_ok() {
                assert!(aff.current_is(0));
                assert!(!aff.current_is(1));
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_out_of_range_cpu() {
        let aff = HostAffinity;
        assert!(!aff.current_is(libc::CPU_SETSIZE as usize));
        assert!(aff.bind_current(libc::CPU_SETSIZE as usize).is_err());
    }
}
