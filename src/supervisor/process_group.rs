//! Cross-platform decoder process-group control (C9)
//!
//! Spawning the decoder in its own process group lets us kill the whole
//! subprocess tree (ffmpeg frequently forks helpers) instead of leaving
//! orphans behind when the supervisor restarts a stream.

use tokio::process::Command;
use tracing::warn;

#[cfg(unix)]
pub fn setup_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid() is async-signal-safe and called before exec in the
    // forked child; it only affects that child's own process group.
    unsafe {
        cmd.pre_exec(|| {
            libc_setsid();
            Ok(())
        });
    }
}

#[cfg(unix)]
fn libc_setsid() {
    extern "C" {
        fn setsid() -> i32;
    }
    unsafe {
        setsid();
    }
}

#[cfg(windows)]
pub fn setup_process_group(cmd: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
pub fn kill_process_group(pid: u32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    const SIGKILL: i32 = 9;
    // Negative pid targets the whole process group created by setsid().
    let group = -(pid as i32);
    unsafe {
        if kill(group, SIGKILL) != 0 {
            warn!(pid, "failed to signal decoder process group, falling back to direct kill");
            kill(pid as i32, SIGKILL);
        }
    }
}

#[cfg(windows)]
pub fn kill_process_group(pid: u32) {
    use std::process::Command as StdCommand;
    let status = StdCommand::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .status();
    if !matches!(status, Ok(s) if s.success()) {
        warn!(pid, "taskkill failed, process may be orphaned");
    }
}
