//! Daemon lifecycle utilities: daemonizing, PID files and socket cleanup.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::{debug, info};

use crate::config::expand_tilde;
use crate::event::{Event, EventSender};

/// Daemonize the current process.
///
/// Forks, detaches from the terminal and writes `pid_file` (supports `~`
/// expansion). The working directory becomes `/`.
pub fn daemonize(pid_file: impl AsRef<Path>) -> Result<()> {
    let pid_path = expand_tilde(&pid_file.as_ref().to_string_lossy());

    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }

    daemonize::Daemonize::new()
        .pid_file(&pid_path)
        .working_directory(Path::new("/"))
        .start()
        .context("Failed to daemonize process")?;

    Ok(())
}

/// Write a PID file for the current process.
pub fn write_pid_file(pid_file: impl AsRef<Path>) -> Result<()> {
    let pid_path = expand_tilde(&pid_file.as_ref().to_string_lossy());

    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(&pid_path)
        .with_context(|| format!("Failed to create {}", pid_path.display()))?;
    writeln!(file, "{}", std::process::id())?;

    Ok(())
}

/// Read a PID from a PID file; `None` if missing or unparsable.
pub fn read_pid_file(pid_file: impl AsRef<Path>) -> Option<u32> {
    let pid_path = expand_tilde(&pid_file.as_ref().to_string_lossy());
    let content = fs::read_to_string(pid_path).ok()?;
    content.trim().parse().ok()
}

/// Check if a process with the given PID is running.
pub fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) probes for existence without delivering a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Remove a stale socket left by a dead provider.
///
/// Fails when another provider is still running: its PID file names a live
/// process other than us, or something answers on the socket.
///
/// # Returns
/// * `Ok(true)` - A stale socket was removed
/// * `Ok(false)` - No socket existed
pub fn cleanup_socket(socket_path: impl AsRef<Path>, pid_file: Option<&Path>) -> Result<bool> {
    let socket = expand_tilde(&socket_path.as_ref().to_string_lossy());

    if let Some(pid_path) = pid_file {
        if let Some(pid) = read_pid_file(pid_path) {
            if pid != std::process::id() && is_process_running(pid) {
                bail!("Location provider already running (PID {})", pid);
            }
        }
    }

    if !socket.exists() {
        return Ok(false);
    }

    if UnixStream::connect(&socket).is_ok() {
        bail!(
            "Location provider already listening on {}",
            socket.display()
        );
    }

    debug!(socket = %socket.display(), "Removing stale socket");
    fs::remove_file(&socket)?;
    if let Some(pid_path) = pid_file {
        let _ = fs::remove_file(expand_tilde(&pid_path.to_string_lossy()));
    }
    Ok(true)
}

/// Remove socket and PID files on exit.
pub fn cleanup_files(socket_path: impl AsRef<Path>, pid_file: Option<&Path>) {
    let _ = fs::remove_file(expand_tilde(&socket_path.as_ref().to_string_lossy()));

    if let Some(pid_path) = pid_file {
        let _ = fs::remove_file(expand_tilde(&pid_path.to_string_lossy()));
    }
    info!("Removed runtime files");
}

/// Post [`Event::Shutdown`] to the coordination loop on SIGINT or SIGTERM.
///
/// Can be installed once per process.
pub fn install_shutdown_handler(events: EventSender) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Termination signal received");
        events.post(Event::Shutdown);
    })
    .context("Failed to set signal handler")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("run/provider.pid");
        write_pid_file(&pid_path).unwrap();
        assert_eq!(read_pid_file(&pid_path), Some(std::process::id()));
        assert!(is_process_running(std::process::id()));
    }

    #[test]
    fn test_cleanup_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("provider.sock");
        drop(UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        assert!(cleanup_socket(&socket, None).unwrap());
        assert!(!socket.exists());
        assert!(!cleanup_socket(&socket, None).unwrap());
    }

    #[test]
    fn test_cleanup_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("provider.sock");
        let _listener = UnixListener::bind(&socket).unwrap();

        assert!(cleanup_socket(&socket, None).is_err());
        assert!(socket.exists());
    }

    #[test]
    fn test_termination_signal_posts_shutdown() {
        let (events, receiver) = crate::event::channel();
        install_shutdown_handler(events).unwrap();

        // SAFETY: the handler installed above replaces the default action.
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);

        let event = receiver
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert!(matches!(event, Event::Shutdown));
    }
}
