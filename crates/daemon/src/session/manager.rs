//! Session launch manager.
//!
//! The [`SessionManager`] decides whether a request for a session needs a new
//! process. A launch for a context that is already pending and younger than
//! the dedup window is collapsed into the in-flight one. Pending entries are
//! cleared when the new session connects back, when the launch fails, or by
//! a sweep once they outlive the stale window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use super::context::SessionContext;
use super::launcher::{ChildLauncher, CommandLauncher};
use super::profile::{LaunchRequest, ProcessConfig, SessionLaunchProfile, SessionProfileBuilder};
use super::tracker::ProcessTracker;
use crate::config::LaunchConfig;

/// Metrics target for launch events.
const METRICS_TARGET: &str = "rserver::metrics";

/// Errors returned from the launch path.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The session process could not be spawned.
    #[error("{description} (user: '{user}', executable: '{executable_path}'): {source}")]
    SpawnFailed {
        /// What was being attempted.
        description: String,
        /// User the process was to run as; empty when not switching users.
        user: String,
        /// Executable that failed to start.
        executable_path: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A replacement launch function reported failure.
    #[error("session launch failed: {0}")]
    Failed(String),
}

/// Mutates a profile before launch.
pub type ProfileFilter = Box<dyn Fn(&mut SessionLaunchProfile) + Send + Sync>;

/// Mutates the process configuration right before spawning.
pub type ProcessConfigFilter = Arc<dyn Fn(&mut ProcessConfig) + Send + Sync>;

/// Pluggable replacement for the default launch-and-track behaviour.
pub trait LaunchFunction: Send + Sync {
    /// Launch the session described by `profile`.
    fn launch(&self, profile: &SessionLaunchProfile) -> Result<(), LaunchError>;
}

impl<F> LaunchFunction for F
where
    F: Fn(&SessionLaunchProfile) -> Result<(), LaunchError> + Send + Sync,
{
    fn launch(&self, profile: &SessionLaunchProfile) -> Result<(), LaunchError> {
        self(profile)
    }
}

/// Tracks pending launches and spawns session processes.
pub struct SessionManager {
    builder: SessionProfileBuilder,
    pending_launches: Mutex<HashMap<SessionContext, Instant>>,
    dedup_window: Duration,
    stale_window: Duration,
    profile_filters: RwLock<Vec<ProfileFilter>>,
    launch_function: RwLock<Option<Arc<dyn LaunchFunction>>>,
    process_config_filter: RwLock<Option<ProcessConfigFilter>>,
    child_launcher: Arc<dyn ChildLauncher>,
    process_tracker: Arc<ProcessTracker>,
    launch_count: AtomicU64,
}

impl SessionManager {
    /// Creates a manager that spawns with [`CommandLauncher`].
    pub fn new(config: LaunchConfig, rpc_socket_path: impl Into<std::path::PathBuf>) -> Self {
        let dedup_window = Duration::from_secs(config.dedup_window_secs);
        let stale_window = Duration::from_secs(config.stale_launch_secs);
        Self {
            builder: SessionProfileBuilder::new(config, rpc_socket_path),
            pending_launches: Mutex::new(HashMap::new()),
            dedup_window,
            stale_window,
            profile_filters: RwLock::new(Vec::new()),
            launch_function: RwLock::new(None),
            process_config_filter: RwLock::new(None),
            child_launcher: Arc::new(CommandLauncher),
            process_tracker: Arc::new(ProcessTracker::new()),
            launch_count: AtomicU64::new(0),
        }
    }

    /// Replaces the process-spawn collaborator.
    pub fn with_child_launcher(mut self, launcher: Arc<dyn ChildLauncher>) -> Self {
        self.child_launcher = launcher;
        self
    }

    /// Ensures a session is running for `context`.
    ///
    /// Returns `Ok(false)` when a launch for the same context is already in
    /// flight and younger than the dedup window, `Ok(true)` after a new
    /// process was launched. On failure the pending entry is removed so the
    /// caller may retry.
    pub fn launch_session(
        &self,
        context: &SessionContext,
        request: &LaunchRequest,
        environment: &[(String, String)],
        open_file: Option<&str>,
    ) -> Result<bool, LaunchError> {
        let removed = {
            let mut pending = self.lock_pending();
            let now = Instant::now();

            if let Some(started) = pending.get(context) {
                if now.duration_since(*started) < self.dedup_window {
                    tracing::debug!(
                        user = %context.username,
                        scope_id = %context.scope.id,
                        "Found existing recent launch, not launching again"
                    );
                    return Ok(false);
                }

                // expected behind a load balancer: the connect may have gone to another node
                tracing::info!(
                    user = %context.username,
                    scope_id = %context.scope.id,
                    "Found pending previous session launch, aborting wait"
                );
                pending.remove(context);
            }

            pending.insert(context.clone(), now);
            self.clean_stale_locked(&mut pending, now)
        };

        if removed > 0 {
            tracing::debug!(
                removed,
                "Evicted sessions launched but never connected within the stale window"
            );
        }

        let process_name = if context.scope.is_workspaces() {
            "Homepage (rworkspaces)".to_string()
        } else {
            context.scope.workbench.clone()
        };
        tracing::debug!(
            user = %context.username,
            scope_id = %context.scope.id,
            "Launching {} session",
            process_name
        );

        let extra_args = request.session_args();
        let mut profile = self.builder.profile(
            context,
            &extra_args,
            environment,
            request.is_secure,
            open_file,
        );
        self.apply_profile_filters(&mut profile);

        let launch_function = self
            .launch_function
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let result = match launch_function {
            Some(f) => f.launch(&profile),
            None => self.launch_and_track_session(&profile),
        };

        if let Err(e) = result {
            self.remove_pending_launch(context, false, &format!("error during launch: {e}"));
            return Err(e);
        }

        Ok(true)
    }

    /// Builds and filters a profile without launching anything.
    pub fn create_session_launch_profile(
        &self,
        context: &SessionContext,
        extra_args: &[(String, String)],
    ) -> SessionLaunchProfile {
        let mut profile = self.builder.profile(context, extra_args, &[], false, None);
        self.apply_profile_filters(&mut profile);
        profile
    }

    /// Default launch function: spawn the session and track its pid.
    pub fn launch_and_track_session(
        &self,
        profile: &SessionLaunchProfile,
    ) -> Result<(), LaunchError> {
        let run_as_user = if nix::unistd::getuid().is_root() {
            Some(profile.context.username.as_str())
        } else {
            None
        };

        let mut config = profile.config.clone();
        let filter = self
            .process_config_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(filter) = filter {
            filter(&mut config);
        }

        let pid = self
            .child_launcher
            .launch_child_process(&profile.executable_path, run_as_user, &config)
            .map_err(|source| LaunchError::SpawnFailed {
                description: "Error launching session process".to_string(),
                user: run_as_user.unwrap_or_default().to_string(),
                executable_path: profile.executable_path.display().to_string(),
                source,
            })?;

        tracing::debug!(
            user = run_as_user.unwrap_or_default(),
            executable = %profile.executable_path.display(),
            pid,
            "Launched session process"
        );
        self.launch_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: METRICS_TARGET,
            event = "session_launch",
            editor = %profile.context.scope.workbench,
            "session launch"
        );

        let username = profile.context.username.clone();
        self.process_tracker.add_process(pid, move |status| {
            tracing::debug!(user = %username, pid, status, "Session process exited");
        });

        Ok(())
    }

    /// Clears the pending launch for `context` and logs its outcome.
    pub fn remove_pending_launch(&self, context: &SessionContext, success: bool, error_msg: &str) {
        let started = self.lock_pending().remove(context);
        let Some(started) = started else {
            return;
        };

        let elapsed = Instant::now().duration_since(started);
        if success {
            if !context.scope.is_workspaces() {
                tracing::info!(
                    target: METRICS_TARGET,
                    event = "session_start_connect",
                    editor = %context.scope.workbench,
                    user = %context.username,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "session start connect"
                );
            }
            tracing::debug!(
                user = %context.username,
                "{} started and connection made in {}",
                context.process_name(),
                format_elapsed(elapsed)
            );
        } else if !error_msg.is_empty() {
            tracing::error!(
                user = %context.username,
                scope_id = %context.scope.id,
                error = error_msg,
                "{} session start failed in {}",
                context.scope.workbench,
                format_elapsed(elapsed)
            );
        }
    }

    /// Clears the pending launch matching a username and scope id.
    pub fn remove_pending_session_launch(
        &self,
        username: &str,
        session_id: &str,
        success: bool,
        error_msg: &str,
    ) {
        let started = {
            let mut pending = self.lock_pending();
            let key = pending
                .keys()
                .find(|ctx| ctx.username == username && ctx.scope.id == session_id)
                .cloned();
            key.and_then(|k| pending.remove(&k))
        };
        let Some(started) = started else {
            return;
        };

        let elapsed = Instant::now().duration_since(started);
        if success {
            tracing::debug!(
                user = username,
                session_id,
                "Session started and connection made in {}",
                format_elapsed(elapsed)
            );
        } else {
            tracing::error!(
                user = username,
                session_id,
                error = error_msg,
                "Session start failed in {}",
                format_elapsed(elapsed)
            );
        }
    }

    /// Removes pending launches older than the stale window.
    pub fn clean_stale_pending_launches(&self) -> usize {
        let mut pending = self.lock_pending();
        self.clean_stale_locked(&mut pending, Instant::now())
    }

    /// Registers a profile filter. Filters run in registration order.
    pub fn add_session_launch_profile_filter<F>(&self, filter: F)
    where
        F: Fn(&mut SessionLaunchProfile) + Send + Sync + 'static,
    {
        self.profile_filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(filter));
    }

    /// Replaces the launch function used by [`launch_session`](Self::launch_session).
    pub fn set_session_launch_function(&self, launch_function: Arc<dyn LaunchFunction>) {
        *self
            .launch_function
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(launch_function);
    }

    /// Sets the filter applied to the process config in
    /// [`launch_and_track_session`](Self::launch_and_track_session).
    pub fn set_process_config_filter<F>(&self, filter: F)
    where
        F: Fn(&mut ProcessConfig) + Send + Sync + 'static,
    {
        *self
            .process_config_filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(filter));
    }

    /// Forwards SIGCHLD to the process tracker and returns how many
    /// session processes were reaped.
    pub fn notify_sigchld(&self) -> usize {
        self.process_tracker.notify_sigchld()
    }

    /// The tracker holding launched session pids.
    pub fn process_tracker(&self) -> &Arc<ProcessTracker> {
        &self.process_tracker
    }

    /// Whether a launch for `context` is pending.
    pub fn has_pending_launch(&self, context: &SessionContext) -> bool {
        self.lock_pending().contains_key(context)
    }

    /// Number of pending launches.
    pub fn pending_launch_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Number of sessions launched by the default launch function.
    pub fn launch_count(&self) -> u64 {
        self.launch_count.load(Ordering::Relaxed)
    }

    fn apply_profile_filters(&self, profile: &mut SessionLaunchProfile) {
        let filters = self
            .profile_filters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for filter in filters.iter() {
            filter(profile);
        }
    }

    fn clean_stale_locked(
        &self,
        pending: &mut HashMap<SessionContext, Instant>,
        now: Instant,
    ) -> usize {
        let before = pending.len();
        pending.retain(|_, started| now.duration_since(*started) <= self.stale_window);
        before - pending.len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<SessionContext, Instant>> {
        self.pending_launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::context::SessionScope;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Records launches instead of spawning anything.
    #[derive(Default)]
    struct RecordingLauncher {
        launches: Mutex<Vec<(String, Option<String>, ProcessConfig)>>,
        fail: bool,
    }

    impl RecordingLauncher {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn count(&self) -> usize {
            self.launches.lock().unwrap().len()
        }

        fn last_config(&self) -> ProcessConfig {
            self.launches.lock().unwrap().last().unwrap().2.clone()
        }
    }

    impl ChildLauncher for RecordingLauncher {
        fn launch_child_process(
            &self,
            executable_path: &Path,
            run_as_user: Option<&str>,
            config: &ProcessConfig,
        ) -> io::Result<u32> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
            }
            let mut launches = self.launches.lock().unwrap();
            launches.push((
                executable_path.display().to_string(),
                run_as_user.map(str::to_string),
                config.clone(),
            ));
            // far outside any real pid range so the tracker drops it on ECHILD
            Ok(4_000_000 + launches.len() as u32)
        }
    }

    fn manager_with(launcher: Arc<RecordingLauncher>) -> SessionManager {
        SessionManager::new(LaunchConfig::default(), "/tmp/rserver-test.sock")
            .with_child_launcher(launcher)
    }

    fn ctx(user: &str, id: &str) -> SessionContext {
        SessionContext::new(user, SessionScope::new("", id))
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_launch_within_window_spawns_once() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        let alice = ctx("alice", "s1");

        let first = manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let second = manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(launcher.count(), 1);
        assert_eq!(manager.launch_count(), 1);
        assert!(manager.has_pending_launch(&alice));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_after_dedup_window_relaunches() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        let alice = ctx("alice", "s1");

        assert!(manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap());

        assert_eq!(launcher.count(), 2);
        assert_eq!(manager.pending_launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_swept_by_any_launch() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        let c1 = ctx("alice", "s1");
        let c2 = ctx("bob", "s9");

        manager
            .launch_session(&c1, &LaunchRequest::default(), &[], None)
            .unwrap();
        tokio::time::advance(Duration::from_secs(181)).await;

        manager
            .launch_session(&c2, &LaunchRequest::default(), &[], None)
            .unwrap();
        assert!(!manager.has_pending_launch(&c1));
        assert!(manager.has_pending_launch(&c2));

        assert!(manager
            .launch_session(&c1, &LaunchRequest::default(), &[], None)
            .unwrap());
        assert_eq!(launcher.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_stale_keeps_recent_entries() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher);

        manager
            .launch_session(&ctx("a", "1"), &LaunchRequest::default(), &[], None)
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        manager
            .launch_session(&ctx("b", "2"), &LaunchRequest::default(), &[], None)
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(manager.clean_stale_pending_launches(), 1);
        assert_eq!(manager.pending_launch_count(), 1);
        assert!(manager.has_pending_launch(&ctx("b", "2")));
    }

    #[test]
    fn test_spawn_failure_removes_pending_and_annotates_error() {
        let launcher = Arc::new(RecordingLauncher::failing());
        let manager = manager_with(launcher);
        let alice = ctx("alice", "s1");

        let err = manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap_err();
        match &err {
            LaunchError::SpawnFailed {
                description,
                executable_path,
                ..
            } => {
                assert_eq!(description, "Error launching session process");
                assert!(executable_path.ends_with("rsession"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!manager.has_pending_launch(&alice));
        assert_eq!(manager.launch_count(), 0);
    }

    #[test]
    fn test_retry_after_failure_launches_again() {
        let manager = SessionManager::new(LaunchConfig::default(), "/tmp/rserver-test.sock");
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        manager.set_session_launch_function(Arc::new(move |_: &SessionLaunchProfile| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LaunchError::Failed("node unavailable".to_string()))
            } else {
                Ok(())
            }
        }));

        let alice = ctx("alice", "s1");
        assert!(manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .is_err());
        assert!(manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_profile_filters_run_in_order() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        manager.add_session_launch_profile_filter(|p| p.config.set_env("ORDER", "first"));
        manager.add_session_launch_profile_filter(|p| {
            let prev = p.config.env("ORDER").unwrap_or_default().to_string();
            p.config.set_env("ORDER", format!("{prev},second"));
            p.config.push_arg("--log-level", "debug");
        });

        manager
            .launch_session(&ctx("alice", "s1"), &LaunchRequest::default(), &[], None)
            .unwrap();

        let config = launcher.last_config();
        assert_eq!(config.env("ORDER"), Some("first,second"));
        assert_eq!(config.arg("--log-level"), Some("debug"));
    }

    #[test]
    fn test_create_session_launch_profile_applies_filters() {
        let manager = manager_with(Arc::new(RecordingLauncher::default()));
        manager.add_session_launch_profile_filter(|p| p.config.set_env("FORWARDED", "1"));

        let extra = vec![("--verify-installation".to_string(), "1".to_string())];
        let profile = manager.create_session_launch_profile(&ctx("alice", ""), &extra);
        assert_eq!(profile.config.env("FORWARDED"), Some("1"));
        assert_eq!(profile.config.arg("--verify-installation"), Some("1"));
        assert_eq!(manager.pending_launch_count(), 0);
    }

    #[test]
    fn test_process_config_filter_applied_at_spawn() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        manager.set_process_config_filter(|config| config.set_env("PAM_RESTORED", "1"));

        manager
            .launch_session(&ctx("alice", "s1"), &LaunchRequest::default(), &[], None)
            .unwrap();
        assert_eq!(launcher.last_config().env("PAM_RESTORED"), Some("1"));
    }

    #[test]
    fn test_custom_launch_function_replaces_default() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.set_session_launch_function(Arc::new(move |p: &SessionLaunchProfile| {
            sink.lock().unwrap().push(p.context.clone());
            Ok(())
        }));

        let alice = ctx("alice", "s1");
        assert!(manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap());
        assert_eq!(launcher.count(), 0);
        assert_eq!(seen.lock().unwrap().as_slice(), &[alice]);
    }

    #[test]
    fn test_request_args_reach_launcher() {
        let launcher = Arc::new(RecordingLauncher::default());
        let manager = manager_with(launcher.clone());
        let request = LaunchRequest {
            uri: "/rpc/client_init".to_string(),
            body: r#"{"method":"client_init","kwparams":{"run_rprofile":0}}"#.to_string(),
            is_secure: true,
        };
        let env = vec![("FROM_CALLER".to_string(), "x".to_string())];

        manager
            .launch_session(&ctx("alice", "s1"), &request, &env, None)
            .unwrap();
        let config = launcher.last_config();
        assert_eq!(config.arg("--r-run-rprofile"), Some("0"));
        assert_eq!(config.arg("--www-use-secure-cookies"), Some("1"));
        assert_eq!(config.env("FROM_CALLER"), Some("x"));
    }

    #[test]
    fn test_remove_pending_launch_on_connect() {
        let manager = manager_with(Arc::new(RecordingLauncher::default()));
        let alice = ctx("alice", "s1");
        manager
            .launch_session(&alice, &LaunchRequest::default(), &[], None)
            .unwrap();

        manager.remove_pending_launch(&alice, true, "");
        assert!(!manager.has_pending_launch(&alice));

        // removing again is a no-op
        manager.remove_pending_launch(&alice, true, "");
    }

    #[test]
    fn test_remove_pending_session_launch_matches_user_and_id() {
        let manager = manager_with(Arc::new(RecordingLauncher::default()));
        manager
            .launch_session(&ctx("alice", "s1"), &LaunchRequest::default(), &[], None)
            .unwrap();
        manager
            .launch_session(&ctx("alice", "s2"), &LaunchRequest::default(), &[], None)
            .unwrap();

        manager.remove_pending_session_launch("bob", "s1", true, "");
        assert_eq!(manager.pending_launch_count(), 2);

        manager.remove_pending_session_launch("alice", "s1", false, "timed out");
        assert_eq!(manager.pending_launch_count(), 1);
        assert!(manager.has_pending_launch(&ctx("alice", "s2")));
    }

    #[test]
    fn test_launched_pid_is_tracked_until_reaped() {
        let manager = manager_with(Arc::new(RecordingLauncher::default()));
        manager
            .launch_session(&ctx("alice", "s1"), &LaunchRequest::default(), &[], None)
            .unwrap();
        assert_eq!(manager.process_tracker().tracked_count(), 1);

        // the fake pid is not our child, so SIGCHLD handling drops it
        assert_eq!(manager.notify_sigchld(), 0);
        assert_eq!(manager.process_tracker().tracked_count(), 0);
    }

    #[test]
    fn test_sigchld_reports_reaped_count() {
        let manager = manager_with(Arc::new(RecordingLauncher::default()));
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        manager.process_tracker().add_process(child.id(), |_| {});

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut reaped = 0;
        while reaped == 0 && std::time::Instant::now() < deadline {
            reaped = manager.notify_sigchld();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reaped, 1);
        assert_eq!(manager.notify_sigchld(), 0);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(2_045)), "2.045s");
        assert_eq!(format_elapsed(Duration::from_millis(7)), "0.007s");
    }
}
