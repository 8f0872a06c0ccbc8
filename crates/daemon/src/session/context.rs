//! Session identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workbench name of the classic IDE.
pub const WORKBENCH_RSTUDIO: &str = "rstudio";

/// Workbench name of the workspaces homepage.
pub const WORKBENCH_WORKSPACES: &str = "rworkspaces";

/// A logical workspace within a user's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionScope {
    /// Project path, empty when the session has no project.
    pub project: String,
    /// Scope id, empty for the user's default session.
    pub id: String,
    /// Workbench (editor) serving the session.
    pub workbench: String,
}

impl SessionScope {
    /// Scope for a project/id pair in the classic IDE.
    pub fn new(project: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            id: id.into(),
            workbench: WORKBENCH_RSTUDIO.to_string(),
        }
    }

    /// Whether this scope is the workspaces homepage rather than a session.
    pub fn is_workspaces(&self) -> bool {
        self.workbench == WORKBENCH_WORKSPACES
    }
}

/// Identity key for launch deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionContext {
    /// Owning user.
    pub username: String,
    /// Scope within the user's sessions.
    #[serde(default)]
    pub scope: SessionScope,
}

impl SessionContext {
    /// Creates a context.
    pub fn new(username: impl Into<String>, scope: SessionScope) -> Self {
        Self {
            username: username.into(),
            scope,
        }
    }

    /// Label used in log lines: the homepage or `<workbench> session(<id>)`.
    pub fn process_name(&self) -> String {
        if self.scope.is_workspaces() {
            "Homepage (rworkspaces)".to_string()
        } else {
            format!("{} session({})", self.scope.workbench, self.scope.id)
        }
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.username, self.scope.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_contexts_hash_by_value() {
        let a = SessionContext::new("alice", SessionScope::new("", "s1"));
        let b = SessionContext::new("alice", SessionScope::new("", "s1"));
        let c = SessionContext::new("alice", SessionScope::new("", "s2"));

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_workspaces_scope() {
        let mut scope = SessionScope::new("", "");
        assert!(!scope.is_workspaces());
        scope.workbench = WORKBENCH_WORKSPACES.to_string();
        assert!(scope.is_workspaces());

        let ctx = SessionContext::new("bob", scope);
        assert_eq!(ctx.process_name(), "Homepage (rworkspaces)");
    }

    #[test]
    fn test_display_and_process_name() {
        let ctx = SessionContext::new("alice", SessionScope::new("~/proj", "s1"));
        assert_eq!(ctx.to_string(), "alice:s1");
        assert_eq!(ctx.process_name(), "rstudio session(s1)");
    }

    #[test]
    fn test_deserialize_missing_scope() {
        let ctx: SessionContext = serde_json::from_str(r#"{"username":"carol"}"#).unwrap();
        assert_eq!(ctx.username, "carol");
        assert_eq!(ctx.scope, SessionScope::default());
    }
}
