//! Session launch management.
//!
//! This module decides when a user's session process must be spawned, builds
//! its command line and environment, spawns it, and reaps it on exit.
//! Duplicate launch requests for the same [`SessionContext`] arriving while a
//! launch is in flight are collapsed into one.

pub mod context;
pub mod launcher;
pub mod manager;
pub mod profile;
pub mod tracker;

pub use context::{SessionContext, SessionScope, WORKBENCH_RSTUDIO, WORKBENCH_WORKSPACES};
pub use launcher::{ChildLauncher, CommandLauncher};
pub use manager::{LaunchError, LaunchFunction, ProcessConfigFilter, ProfileFilter, SessionManager};
pub use profile::{
    LaunchRequest, ProcessConfig, SessionLaunchProfile, SessionProfileBuilder, StdioBehavior,
    SESSION_TIMEOUT_ENV,
};
pub use tracker::{ExitCallback, ProcessTracker};
