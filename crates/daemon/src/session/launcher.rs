//! Spawning session processes.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::User;

use super::profile::{ProcessConfig, StdioBehavior};

/// Spawns a detached child process and returns its pid.
///
/// The returned process is not waited on by the launcher; callers register
/// the pid with a [`ProcessTracker`](super::ProcessTracker) for reaping.
pub trait ChildLauncher: Send + Sync {
    /// Launch `executable_path` with `config`, as `run_as_user` when set.
    fn launch_child_process(
        &self,
        executable_path: &Path,
        run_as_user: Option<&str>,
        config: &ProcessConfig,
    ) -> io::Result<u32>;
}

/// Launches children with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl ChildLauncher for CommandLauncher {
    fn launch_child_process(
        &self,
        executable_path: &Path,
        run_as_user: Option<&str>,
        config: &ProcessConfig,
    ) -> io::Result<u32> {
        let mut cmd = Command::new(executable_path);
        cmd.args(config.argv());
        cmd.envs(config.environment.iter().map(|(k, v)| (k, v)));

        match config.stdio {
            StdioBehavior::Inherit => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            StdioBehavior::Null => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }

        if let Some(username) = run_as_user {
            let user = User::from_name(username)
                .map_err(io::Error::from)?
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("user {username} does not exist"),
                    )
                })?;
            cmd.uid(user.uid.as_raw()).gid(user.gid.as_raw());
            if let Some(home) = user.dir.to_str() {
                cmd.env("HOME", home);
            }
            cmd.env("USER", username);
        }

        let child = cmd.spawn()?;
        Ok(child.id())
    }
}
