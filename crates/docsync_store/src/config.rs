//! Store configuration.

use std::time::Duration;

/// Remote repository settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Remote name (e.g. `origin`).
    pub name: String,
    /// Clone/push URL.
    pub url: String,
    /// Branch pulled from and pushed to.
    pub branch: String,
}

impl RemoteConfig {
    /// Creates a remote named `origin` tracking `main`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: "origin".into(),
            url: url.into(),
            branch: "main".into(),
        }
    }

    /// Sets the remote name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

/// Configuration for opening a [`crate::GitStore`].
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Remote to clone from, pull from and push to.
    pub remote: Option<RemoteConfig>,
    /// Commit author name.
    pub author_name: String,
    /// Commit author email.
    pub author_email: String,
    /// Branch created for fresh repositories without a remote.
    pub default_branch: String,
    /// Deadline for local git commands (add, commit, diff).
    pub command_timeout: Duration,
    /// Deadline for network git commands (clone, pull, push).
    pub network_timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: None,
            author_name: "docsync".into(),
            author_email: "docsync@localhost".into(),
            default_branch: "main".into(),
            command_timeout: Duration::from_secs(60),
            network_timeout: Duration::from_secs(300),
        }
    }
}

impl GitConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the commit author identity.
    #[must_use]
    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    /// Sets the deadline for network commands.
    #[must_use]
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Sets the deadline for local commands.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Branch used for pushes and pulls.
    #[must_use]
    pub fn branch(&self) -> &str {
        self.remote
            .as_ref()
            .map_or(self.default_branch.as_str(), |r| r.branch.as_str())
    }
}
