//! Platform-specific process capabilities.
//!
//! Centralizes the two OS-level operations the coordination layer needs:
//! checking whether a PID exists, and replacing the current process image
//! for restart. All `#[cfg]` blocks for OS-specific behavior live here.

// Windows process queries go through the Win32 API directly.
#![cfg_attr(windows, allow(unsafe_code))]

use std::env;
use std::process::Command;
use tracing::debug;

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)` signal check via nix
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
///
/// A positive result only proves a process exists under that PID, not that
/// it is the instance we recorded (PID reuse); the HTTP identity probe is
/// the authority of record.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal "None" (kill -0) checks existence without delivering anything.
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: OpenProcess/CloseHandle are plain Win32 calls; the handle
        // is checked for null before use and closed on the same path.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                false
            } else {
                CloseHandle(handle);
                true
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        true
    }
}

/// Re-execute the current program image with the same arguments.
///
/// # Platform Behavior
/// - **Linux/macOS**: `execv` replaces the process in place; only returns on error
/// - **Windows**: spawns a detached copy, then exits the current process
///
/// This is the capability the restart route invokes; it must only be called
/// once the control-plane response has been flushed, since nothing survives
/// the replacement.
pub fn respawn_self() -> std::io::Result<()> {
    let exe = env::current_exe()?;
    let args: Vec<String> = env::args().skip(1).collect();
    debug!("Re-executing {} with args {:?}", exe.display(), args);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        // exec only returns on failure
        let err = Command::new(exe).args(args).exec();
        Err(err)
    }

    #[cfg(not(unix))]
    {
        Command::new(exe).args(args).spawn()?;
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        // Our own process should be alive
        let pid = std::process::id();
        assert!(is_process_alive(pid));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // A very high PID should not exist
        assert!(!is_process_alive(4_000_000_000));
    }
}
