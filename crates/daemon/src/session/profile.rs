//! Session launch profiles.
//!
//! A [`SessionLaunchProfile`] is the fully resolved executable path,
//! argument list and environment for spawning one session process. The
//! [`SessionProfileBuilder`] derives it from the launch configuration, the
//! session context and the triggering request.

use std::path::{Path, PathBuf};

use protocol::JsonRpcRequest;
use serde::{Deserialize, Serialize};

use super::context::{SessionContext, WORKBENCH_RSTUDIO};
use crate::config::LaunchConfig;

/// Environment variable overriding the session idle timeout.
pub const SESSION_TIMEOUT_ENV: &str = "RSTUDIO_SESSION_TIMEOUT";

/// What the child does with its standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StdioBehavior {
    /// Share the server's stdio.
    #[default]
    Inherit,
    /// Redirect to /dev/null.
    Null,
}

/// Arguments, environment and stdio behaviour of one child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessConfig {
    /// Ordered `(name, value)` argument pairs.
    pub args: Vec<(String, String)>,
    /// Ordered environment; later entries win when names repeat.
    pub environment: Vec<(String, String)>,
    /// Standard stream handling.
    pub stdio: StdioBehavior,
}

impl ProcessConfig {
    /// Appends an argument pair.
    pub fn push_arg(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.args.push((name.into(), value.into()));
    }

    /// Sets an environment variable, replacing an existing entry.
    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.environment.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.environment.push((name.to_string(), value)),
        }
    }

    /// Value of the last environment entry with this name.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first argument pair with this name.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments flattened into an argv tail.
    pub fn argv(&self) -> Vec<String> {
        self.args
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .collect()
    }
}

/// How to spawn one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLaunchProfile {
    /// Session identity.
    pub context: SessionContext,
    /// Session executable.
    pub executable_path: PathBuf,
    /// Process configuration.
    pub config: ProcessConfig,
}

/// The HTTP request that triggered a launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LaunchRequest {
    /// Request URI.
    pub uri: String,
    /// Request body (a JSON-RPC request for `client_init`).
    pub body: String,
    /// Whether the request arrived over TLS.
    pub is_secure: bool,
}

impl LaunchRequest {
    /// Extra session arguments carried by a `client_init` request.
    ///
    /// Only `client_init` requests contribute; a body that does not parse
    /// contributes nothing.
    pub fn session_args(&self) -> Vec<(String, String)> {
        let mut args = Vec::new();
        if !self.uri.ends_with("client_init") {
            return args;
        }

        let Ok(client_init) = JsonRpcRequest::from_json(&self.body) else {
            return args;
        };

        if let Some(restore) = client_init.kwparam_i64("restore_workspace") {
            if restore != -1 {
                args.push(("--r-restore-workspace".to_string(), restore.to_string()));
            }
        }
        if let Some(rprofile) = client_init.kwparam_i64("run_rprofile") {
            if rprofile != -1 {
                args.push(("--r-run-rprofile".to_string(), rprofile.to_string()));
            }
        }
        args
    }
}

/// Builds session process configurations.
pub struct SessionProfileBuilder {
    config: LaunchConfig,
    launcher_token: String,
    rpc_socket_path: PathBuf,
}

impl SessionProfileBuilder {
    /// Creates a builder. The launcher token is generated here and stays
    /// fixed for the builder's lifetime.
    pub fn new(config: LaunchConfig, rpc_socket_path: impl Into<PathBuf>) -> Self {
        let launcher_token = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            config,
            launcher_token,
            rpc_socket_path: rpc_socket_path.into(),
        }
    }

    /// Token passed to every session with `--launcher-token`.
    pub fn launcher_token(&self) -> &str {
        &self.launcher_token
    }

    /// Session executable path.
    pub fn executable_path(&self) -> &Path {
        &self.config.rsession_path
    }

    /// Builds an unfiltered profile.
    pub fn profile(
        &self,
        context: &SessionContext,
        extra_args: &[(String, String)],
        extra_env: &[(String, String)],
        request_is_secure: bool,
        open_file: Option<&str>,
    ) -> SessionLaunchProfile {
        SessionLaunchProfile {
            context: context.clone(),
            executable_path: self.config.rsession_path.clone(),
            config: self.process_config(
                context,
                extra_args,
                extra_env,
                request_is_secure,
                open_file,
            ),
        }
    }

    /// Arguments and environment for one session process.
    pub fn process_config(
        &self,
        context: &SessionContext,
        extra_args: &[(String, String)],
        extra_env: &[(String, String)],
        request_is_secure: bool,
        open_file: Option<&str>,
    ) -> ProcessConfig {
        let opts = &self.config;
        let scope = &context.scope;
        let mut config = ProcessConfig::default();

        if let Some(file) = &opts.rsession_config_file {
            config.push_arg("--config-file", file.display().to_string());
        }

        config.push_arg("-u", context.username.clone());
        if !scope.project.is_empty() {
            config.push_arg("-p", scope.project.clone());
        }
        if !scope.id.is_empty() {
            config.push_arg("-s", scope.id.clone());
        }

        let secure_cookies =
            opts.auth_cookies_force_secure || opts.ssl_enabled || request_is_secure;
        config.push_arg("--www-use-secure-cookies", flag(secure_cookies));
        config.push_arg("--www-root-path", opts.www_root_path.clone());
        config.push_arg("--www-same-site", opts.same_site.clone());
        config.push_arg("--session-use-file-storage", flag(opts.use_file_storage));
        config.push_arg("--launcher-token", self.launcher_token.clone());

        if let Ok(timeout) = std::env::var(SESSION_TIMEOUT_ENV) {
            if !timeout.is_empty() {
                config.push_arg("--timeout", timeout);
            }
        }

        if let Some(file) = open_file.filter(|f| !f.is_empty()) {
            if scope.workbench == WORKBENCH_RSTUDIO {
                config.push_arg("--open-files", file);
            }
        }

        config.args.extend(extra_args.iter().cloned());

        config.environment.extend(extra_env.iter().cloned());
        config.set_env(
            "RSTUDIO_LIMIT_RPC_CLIENT_UID",
            nix::unistd::getuid().as_raw().to_string(),
        );
        if !scope.project.is_empty() {
            config.set_env("RSTUDIO_SESSION_SCOPE_PROJECT", scope.project.clone());
        }
        if !scope.id.is_empty() {
            config.set_env("RSTUDIO_SESSION_SCOPE_ID", scope.id.clone());
        }

        if !opts.r_home.is_empty() {
            config.set_env("R_HOME", opts.r_home.clone());
        }
        config.set_env("RSTUDIO_DEFAULT_R_VERSION", opts.r_version.clone());
        config.set_env("RSTUDIO_DEFAULT_R_VERSION_HOME", opts.r_home.clone());

        config.set_env(
            "RSTUDIO_REQUIRED_USER_GROUP",
            opts.auth_required_user_group.clone(),
        );
        config.set_env(
            "RSTUDIO_MINIMUM_USER_ID",
            opts.auth_minimum_user_id.to_string(),
        );
        config.set_env(
            "RS_MONITOR_SHARED_SECRET",
            opts.monitor_shared_secret.clone(),
        );

        // sessions log an error when this differs from their own version
        config.set_env("RSTUDIO_VERSION", env!("CARGO_PKG_VERSION"));

        config.set_env(
            "RS_SESSION_TMP_DIR",
            opts.session_tmp_dir.display().to_string(),
        );
        config.set_env(
            "RS_SERVER_RPC_SOCKET_PATH",
            self.rpc_socket_path.display().to_string(),
        );

        config.stdio = StdioBehavior::Inherit;
        config
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::context::SessionScope;
    use serial_test::serial;

    fn builder() -> SessionProfileBuilder {
        SessionProfileBuilder::new(LaunchConfig::default(), "/run/rserver/rpc.sock")
    }

    fn alice() -> SessionContext {
        SessionContext::new("alice", SessionScope::new("~/analysis", "s1"))
    }

    #[test]
    #[serial]
    fn test_args_for_project_session() {
        std::env::remove_var(SESSION_TIMEOUT_ENV);
        let config = builder().process_config(&alice(), &[], &[], false, None);

        assert_eq!(config.arg("-u"), Some("alice"));
        assert_eq!(config.arg("-p"), Some("~/analysis"));
        assert_eq!(config.arg("-s"), Some("s1"));
        assert_eq!(config.arg("--www-use-secure-cookies"), Some("0"));
        assert_eq!(config.arg("--www-root-path"), Some("/"));
        assert_eq!(config.arg("--session-use-file-storage"), Some("1"));
        assert!(config.arg("--config-file").is_none());
        assert!(config.arg("--timeout").is_none());
        assert_eq!(config.stdio, StdioBehavior::Inherit);
    }

    #[test]
    fn test_default_session_omits_project_and_scope() {
        let ctx = SessionContext::new("bob", SessionScope::new("", ""));
        let config = builder().process_config(&ctx, &[], &[], false, None);

        assert!(config.arg("-p").is_none());
        assert!(config.arg("-s").is_none());
        assert!(config.env("RSTUDIO_SESSION_SCOPE_PROJECT").is_none());
        assert!(config.env("RSTUDIO_SESSION_SCOPE_ID").is_none());
    }

    #[test]
    fn test_secure_cookies_sources() {
        let ctx = alice();
        let b = builder();
        assert_eq!(
            b.process_config(&ctx, &[], &[], true, None)
                .arg("--www-use-secure-cookies"),
            Some("1")
        );

        let mut launch = LaunchConfig::default();
        launch.ssl_enabled = true;
        let b = SessionProfileBuilder::new(launch, "/tmp/rpc.sock");
        assert_eq!(
            b.process_config(&ctx, &[], &[], false, None)
                .arg("--www-use-secure-cookies"),
            Some("1")
        );
    }

    #[test]
    fn test_launcher_token_is_stable() {
        let b = builder();
        let first = b.process_config(&alice(), &[], &[], false, None);
        let second = b.process_config(&alice(), &[], &[], false, None);
        assert_eq!(first.arg("--launcher-token"), Some(b.launcher_token()));
        assert_eq!(
            first.arg("--launcher-token"),
            second.arg("--launcher-token")
        );
        assert_eq!(b.launcher_token().len(), 8);
    }

    #[test]
    #[serial]
    fn test_session_timeout_from_environment() {
        std::env::set_var(SESSION_TIMEOUT_ENV, "30");
        let config = builder().process_config(&alice(), &[], &[], false, None);
        assert_eq!(config.arg("--timeout"), Some("30"));
        std::env::remove_var(SESSION_TIMEOUT_ENV);
    }

    #[test]
    fn test_open_files_only_for_rstudio_workbench() {
        let mut ctx = alice();
        let config = builder().process_config(&ctx, &[], &[], false, Some("/home/alice/a.R"));
        assert_eq!(config.arg("--open-files"), Some("/home/alice/a.R"));

        ctx.scope.workbench = "vscode".to_string();
        let config = builder().process_config(&ctx, &[], &[], false, Some("/home/alice/a.R"));
        assert!(config.arg("--open-files").is_none());
    }

    #[test]
    fn test_environment_contents() {
        let extra = vec![("CUSTOM".to_string(), "yes".to_string())];
        let config = builder().process_config(&alice(), &[], &extra, false, None);

        assert_eq!(config.env("CUSTOM"), Some("yes"));
        assert_eq!(config.env("RSTUDIO_SESSION_SCOPE_PROJECT"), Some("~/analysis"));
        assert_eq!(config.env("RSTUDIO_SESSION_SCOPE_ID"), Some("s1"));
        assert_eq!(config.env("RSTUDIO_MINIMUM_USER_ID"), Some("1000"));
        assert_eq!(config.env("RSTUDIO_VERSION"), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(
            config.env("RS_SERVER_RPC_SOCKET_PATH"),
            Some("/run/rserver/rpc.sock")
        );
        assert!(config.env("RSTUDIO_LIMIT_RPC_CLIENT_UID").is_some());
        assert!(config.env("RS_SERVER_RPC_SECRET").is_none());
    }

    #[test]
    fn test_rpc_client_uid_replaces_inherited_value() {
        let extra = vec![("RSTUDIO_LIMIT_RPC_CLIENT_UID".to_string(), "0".to_string())];
        let config = builder().process_config(&alice(), &[], &extra, false, None);

        let uid = nix::unistd::getuid().as_raw().to_string();
        assert_eq!(config.env("RSTUDIO_LIMIT_RPC_CLIENT_UID"), Some(uid.as_str()));
        let entries = config
            .environment
            .iter()
            .filter(|(name, _)| name == "RSTUDIO_LIMIT_RPC_CLIENT_UID")
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_extra_args_appended_last() {
        let extra = vec![("--r-run-rprofile".to_string(), "0".to_string())];
        let config = builder().process_config(&alice(), &extra, &[], false, None);
        assert_eq!(
            config.args.last(),
            Some(&("--r-run-rprofile".to_string(), "0".to_string()))
        );
    }

    #[test]
    fn test_client_init_request_args() {
        let request = LaunchRequest {
            uri: "/rpc/client_init".to_string(),
            body: r#"{"method":"client_init","kwparams":{"restore_workspace":1,"run_rprofile":-1}}"#
                .to_string(),
            is_secure: false,
        };
        assert_eq!(
            request.session_args(),
            vec![("--r-restore-workspace".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_non_client_init_and_bad_body_add_nothing() {
        let request = LaunchRequest {
            uri: "/rpc/get_events".to_string(),
            body: r#"{"method":"x","kwparams":{"restore_workspace":1}}"#.to_string(),
            is_secure: false,
        };
        assert!(request.session_args().is_empty());

        let request = LaunchRequest {
            uri: "/rpc/client_init".to_string(),
            body: "not json".to_string(),
            is_secure: false,
        };
        assert!(request.session_args().is_empty());
    }

    #[test]
    fn test_set_env_replaces() {
        let mut config = ProcessConfig::default();
        config.set_env("A", "1");
        config.set_env("A", "2");
        assert_eq!(config.environment.len(), 1);
        assert_eq!(config.env("A"), Some("2"));
    }

    #[test]
    fn test_argv_flattening() {
        let mut config = ProcessConfig::default();
        config.push_arg("-u", "alice");
        config.push_arg("-s", "s1");
        assert_eq!(config.argv(), vec!["-u", "alice", "-s", "s1"]);
    }
}
