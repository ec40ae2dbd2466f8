// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Process-restart mechanics: the [Restarter] this crate defaults to, and
//! the environment-variable marker an embedding binary checks at startup to
//! tell a fresh process launch apart from one the engine itself re-exec'd.

use crate::traits::Restarter;

/// Set (to `"1"`) in the child process's environment immediately before
/// re-exec, so [was_restarted] can tell the two apart.
pub const RESTARTED_ENV_VAR: &str = "CUEHUB_RESTARTED";

/// True if this process was launched by [EnvRestarter::request_restart]
/// rather than directly by the user or a supervisor. An embedding binary
/// calls this once at startup to decide whether to log "starting" or
/// "restarted".
pub fn was_restarted() -> bool {
    std::env::var(RESTARTED_ENV_VAR).as_deref() == Ok("1")
}

/// Restarts the current process in place: re-execs `std::env::current_exe()`
/// with the original arguments and the [RESTARTED_ENV_VAR] marker set.
///
/// On Unix this replaces the process image directly
/// (`CommandExt::exec`), preserving the PID, which matters for supervisors
/// (systemd, launchd) that track restarts by PID rather than by exit code.
/// On other platforms, `exec` isn't available, so this instead spawns a
/// replacement process and exits the current one — losing PID continuity,
/// but behaviorally equivalent from the supervisor's perspective (a process
/// exits, and a new one with the same arguments immediately starts).
pub struct EnvRestarter;

impl Restarter for EnvRestarter {
    fn request_restart(&self) {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(err) => {
                tracing::error!(%err, "restart requested but current_exe() failed; exiting instead");
                std::process::exit(1);
            }
        };
        let args: Vec<_> = std::env::args_os().skip(1).collect();

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = std::process::Command::new(&exe)
                .args(&args)
                .env(RESTARTED_ENV_VAR, "1")
                .exec();
            tracing::error!(%err, "exec() for restart failed; exiting instead");
            std::process::exit(1);
        }

        #[cfg(not(unix))]
        {
            match std::process::Command::new(&exe)
                .args(&args)
                .env(RESTARTED_ENV_VAR, "1")
                .spawn()
            {
                Ok(_) => std::process::exit(0),
                Err(err) => {
                    tracing::error!(%err, "spawning restart replacement failed; exiting instead");
                    std::process::exit(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn was_restarted_reflects_the_marker_env_var() {
        std::env::remove_var(RESTARTED_ENV_VAR);
        assert!(!was_restarted());
        std::env::set_var(RESTARTED_ENV_VAR, "1");
        assert!(was_restarted());
        std::env::remove_var(RESTARTED_ENV_VAR);
    }
}
