//! tmux-backed runtime for foreman.
//!
//! Each agent runs in its own detached tmux session; the session name is
//! the opaque runtime handle persisted in session metadata. All tmux
//! invocations are argv-based; nothing is ever passed through a shell.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use foreman_plugins::Runtime;
//! use foreman_tmux::TmuxRuntime;
//!
//! let tmux = TmuxRuntime::new().expect("tmux not found");
//! let handle = tmux
//!     .start(&["claude".to_string()], &HashMap::new(), "/work/app-1".as_ref())
//!     .unwrap();
//! assert!(tmux.is_alive(&handle));
//! tmux.send(&handle, "fix the failing test").unwrap();
//! let tail = tmux.output(&handle, Some(50)).unwrap();
//! println!("{tail}");
//! tmux.stop(&handle).unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use tracing::{debug, trace};
use uuid::Uuid;

use foreman_plugins::{PluginError, Result, Runtime};

/// Prefix for tmux sessions owned by foreman.
const HANDLE_PREFIX: &str = "fm";

/// Runtime plugin backed by the local tmux server.
#[derive(Debug)]
pub struct TmuxRuntime;

impl TmuxRuntime {
    /// Creates the runtime after confirming a usable tmux is on PATH.
    pub fn new() -> Result<Self> {
        let version = Self::server_version()?;
        debug!(%version, "using tmux");
        Ok(Self)
    }

    /// Check if tmux is available in PATH.
    pub fn is_available() -> bool {
        Self::server_version().is_ok()
    }

    fn server_version() -> Result<String> {
        let output = Command::new("tmux").arg("-V").output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PluginError::NotAvailable("tmux".to_string())
            } else {
                PluginError::Io(e)
            }
        })?;
        if !output.status.success() {
            return Err(PluginError::NotAvailable("tmux".to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs one tmux command, returning stdout or the trimmed stderr as
    /// a `CommandFailed`.
    fn exec(&self, args: &[&str]) -> Result<String> {
        trace!(cmd = %args.join(" "), "tmux");
        let output = Command::new("tmux").args(args).output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(PluginError::CommandFailed(format!(
                "tmux {}: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Yes/no tmux question; any failure (including a missing server)
    /// counts as no.
    fn probe(&self, args: &[&str]) -> bool {
        Command::new("tmux")
            .args(args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Fails with `NotFound` unless the handle names a live session.
    fn require(&self, handle: &str) -> Result<()> {
        if self.probe(&["has-session", "-t", handle]) {
            Ok(())
        } else {
            Err(PluginError::NotFound(format!("session '{handle}'")))
        }
    }

    fn next_handle() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{HANDLE_PREFIX}-{}", &id[..12])
    }
}

impl Runtime for TmuxRuntime {
    fn name(&self) -> &str {
        "tmux"
    }

    fn start(
        &self,
        argv: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<String> {
        if argv.is_empty() {
            return Err(PluginError::CommandFailed("empty launch command".to_string()));
        }

        let handle = Self::next_handle();
        let cwd_str = cwd.display().to_string();
        let mut args: Vec<String> = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            handle.clone(),
            "-c".to_string(),
            cwd_str,
        ];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("--".to_string());
        args.extend(argv.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec(&arg_refs)?;

        debug!(handle = %handle, cwd = %cwd.display(), cmd = ?argv, "started agent session");
        Ok(handle)
    }

    fn is_alive(&self, handle: &str) -> bool {
        self.probe(&["has-session", "-t", handle])
    }

    fn output(&self, handle: &str, last_lines: Option<u32>) -> Result<String> {
        self.require(handle)?;

        let mut args = vec!["capture-pane", "-t", handle, "-p"];
        let lines_arg;
        if let Some(n) = last_lines {
            lines_arg = format!("-{n}");
            args.push("-S");
            args.push(&lines_arg);
        }
        self.exec(&args)
    }

    fn send(&self, handle: &str, text: &str) -> Result<()> {
        self.require(handle)?;

        // Literal text first (-l disables key-name lookup), then Enter.
        self.exec(&["send-keys", "-t", handle, "-l", text])?;
        self.exec(&["send-keys", "-t", handle, "Enter"])?;
        Ok(())
    }

    fn stop(&self, handle: &str) -> Result<()> {
        self.require(handle)?;
        self.exec(&["kill-session", "-t", handle])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_shape() {
        let handle = TmuxRuntime::next_handle();
        assert!(handle.starts_with("fm-"));
        assert_eq!(handle.len(), 3 + 12);
        assert_ne!(handle, TmuxRuntime::next_handle());
    }

    #[test]
    fn new_when_tmux_not_found() {
        let result = TmuxRuntime::new();
        if let Err(e) = result {
            assert!(matches!(e, PluginError::NotAvailable(_)));
        }
    }

    // Integration tests that require a running tmux server.

    #[test]
    #[ignore]
    fn start_is_alive_stop() {
        let tmux = TmuxRuntime::new().unwrap();
        let handle = tmux
            .start(
                &["sleep".to_string(), "30".to_string()],
                &HashMap::new(),
                Path::new("/tmp"),
            )
            .unwrap();

        assert!(tmux.is_alive(&handle));
        tmux.stop(&handle).unwrap();
        assert!(!tmux.is_alive(&handle));
    }

    #[test]
    #[ignore]
    fn env_is_passed_to_session() {
        let tmux = TmuxRuntime::new().unwrap();
        let env = HashMap::from([("FOREMAN_SESSION".to_string(), "app-1".to_string())]);
        let handle = tmux
            .start(
                &["sh".to_string(), "-c".to_string(), "echo $FOREMAN_SESSION; sleep 5".to_string()],
                &env,
                Path::new("/tmp"),
            )
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(300));
        let output = tmux.output(&handle, Some(10)).unwrap();
        assert!(output.contains("app-1"));
        tmux.stop(&handle).unwrap();
    }

    #[test]
    #[ignore]
    fn send_types_into_session() {
        let tmux = TmuxRuntime::new().unwrap();
        let handle = tmux
            .start(&["sh".to_string()], &HashMap::new(), Path::new("/tmp"))
            .unwrap();

        tmux.send(&handle, "echo forty-two").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));
        let output = tmux.output(&handle, Some(10)).unwrap();
        assert!(output.contains("forty-two"));
        tmux.stop(&handle).unwrap();
    }

    #[test]
    #[ignore]
    fn probes_on_dead_handle() {
        let tmux = TmuxRuntime::new().unwrap();
        assert!(!tmux.is_alive("fm-doesnotexist"));
        assert!(matches!(
            tmux.output("fm-doesnotexist", None),
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            tmux.send("fm-doesnotexist", "hi"),
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            tmux.stop("fm-doesnotexist"),
            Err(PluginError::NotFound(_))
        ));
    }
}
