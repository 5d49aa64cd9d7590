//! Orphan decoder-process reaper (C10)
//!
//! Sweeps OS processes that look like stray decoder subprocesses, leaving
//! every process belonging to a tracked supervisor strictly alone. The
//! manager's reconciliation loop calls `sweep` once per tick.

use crate::error::Result;
use std::collections::HashSet;
use std::process::Command as StdCommand;
use tracing::{debug, warn};

/// Small capability set a process backend must provide. Isolating this
/// behind a trait lets tests substitute a fake process table instead of
/// shelling out to `pgrep`/`tasklist`.
pub trait ProcessOps: Send + Sync {
    fn find_processes(&self, binary_name: &str) -> Result<Vec<u32>>;
    fn is_process_running(&self, pid: u32) -> bool;
    fn terminate_process(&self, pid: u32);
}

pub struct SystemProcessOps;

#[cfg(unix)]
impl ProcessOps for SystemProcessOps {
    fn find_processes(&self, binary_name: &str) -> Result<Vec<u32>> {
        let output = StdCommand::new("pgrep").arg(binary_name).output().map_err(|e| {
            crate::error::IngestError::System(format!("pgrep failed: {e}"))
        })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect())
    }

    fn is_process_running(&self, pid: u32) -> bool {
        extern "C" {
            fn kill(pid: i32, sig: i32) -> i32;
        }
        unsafe { kill(pid as i32, 0) == 0 }
    }

    fn terminate_process(&self, pid: u32) {
        crate::supervisor::process_group::kill_process_group(pid);
    }
}

#[cfg(windows)]
impl ProcessOps for SystemProcessOps {
    fn find_processes(&self, binary_name: &str) -> Result<Vec<u32>> {
        let image = format!("{binary_name}.exe");
        let output = StdCommand::new("tasklist")
            .args(["/FO", "CSV", "/NH", "/FI", &format!("IMAGENAME eq {image}")])
            .output()
            .map_err(|e| crate::error::IngestError::System(format!("tasklist failed: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split(',').collect();
                fields.get(1)?.trim_matches('"').parse::<u32>().ok()
            })
            .collect())
    }

    fn is_process_running(&self, pid: u32) -> bool {
        self.find_processes("").map(|pids| pids.contains(&pid)).unwrap_or(false)
    }

    fn terminate_process(&self, pid: u32) {
        crate::supervisor::process_group::kill_process_group(pid);
    }
}

/// Periodically sweeps for decoder processes the manager is not tracking.
pub struct OrphanReaper<P: ProcessOps = SystemProcessOps> {
    decoder_binary: String,
    ops: P,
}

impl OrphanReaper<SystemProcessOps> {
    pub fn new(decoder_binary: String) -> Self {
        Self { decoder_binary, ops: SystemProcessOps }
    }
}

impl<P: ProcessOps> OrphanReaper<P> {
    pub fn with_ops(decoder_binary: String, ops: P) -> Self {
        Self { decoder_binary, ops }
    }

    /// Terminates any discovered decoder process whose pid is absent from
    /// `tracked_pids`. Returns the count of processes terminated. Discovery
    /// errors are reported and the sweep returns early without panicking.
    pub fn sweep(&self, tracked_pids: &HashSet<u32>) -> Result<usize> {
        let pids = self.ops.find_processes(&self.decoder_binary)?;
        let mut terminated = 0;
        for pid in pids {
            if tracked_pids.contains(&pid) {
                continue;
            }
            if self.ops.is_process_running(pid) {
                warn!(pid, binary = %self.decoder_binary, "terminating untracked decoder process");
                self.ops.terminate_process(pid);
                terminated += 1;
            }
        }
        if terminated == 0 {
            debug!(binary = %self.decoder_binary, "orphan sweep found nothing to reap");
        }
        Ok(terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeOps {
        discovered: Vec<u32>,
        running: HashSet<u32>,
        terminated: Mutex<Vec<u32>>,
    }

    impl ProcessOps for FakeOps {
        fn find_processes(&self, _binary_name: &str) -> Result<Vec<u32>> {
            Ok(self.discovered.clone())
        }
        fn is_process_running(&self, pid: u32) -> bool {
            self.running.contains(&pid)
        }
        fn terminate_process(&self, pid: u32) {
            self.terminated.lock().unwrap().push(pid);
        }
    }

    #[test]
    fn leaves_tracked_processes_alone() {
        let ops = FakeOps {
            discovered: vec![10, 20, 30],
            running: [10, 20, 30].into_iter().collect(),
            terminated: Mutex::new(Vec::new()),
        };
        let reaper = OrphanReaper::with_ops("ffmpeg".to_string(), ops);
        let tracked: HashSet<u32> = [10, 20].into_iter().collect();
        let count = reaper.sweep(&tracked).unwrap();
        assert_eq!(count, 1);
        assert_eq!(*reaper.ops.terminated.lock().unwrap(), vec![30]);
    }

    #[test]
    fn ignores_pids_that_are_no_longer_running() {
        let ops = FakeOps {
            discovered: vec![99],
            running: HashSet::new(),
            terminated: Mutex::new(Vec::new()),
        };
        let reaper = OrphanReaper::with_ops("ffmpeg".to_string(), ops);
        let count = reaper.sweep(&HashSet::new()).unwrap();
        assert_eq!(count, 0);
        assert!(reaper.ops.terminated.lock().unwrap().is_empty());
    }
}
