//! TOML-based configuration for bibsync.
//!
//! Credentials are never stored in the file; `*_env` fields name the
//! environment variable holding them and are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub git: GitConfig,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            library: LibraryConfig::default(),
            git: GitConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// Bibliography file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Library file used when a command is given no explicit path.
    #[serde(default = "default_library_path")]
    pub path: PathBuf,
}

fn default_library_path() -> PathBuf {
    PathBuf::from("library.json")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Remote tracking and commit identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Remote to fetch from. Default `origin`.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch tracked on the remote. Default `main`.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Full remote-tracking ref; derived from `remote`/`branch` when unset.
    #[serde(default)]
    pub remote_ref: Option<String>,

    /// Environment variable holding a token for authenticated fetches.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Signature used when the repository has no `user.name`.
    #[serde(default)]
    pub author_name: Option<String>,

    /// Signature email used when the repository has no `user.email`.
    #[serde(default)]
    pub author_email: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "main".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: default_branch(),
            remote_ref: None,
            token_env: None,
            author_name: None,
            author_email: None,
            token: None,
        }
    }
}

impl GitConfig {
    /// The remote-tracking ref a pull merges from.
    pub fn remote_ref(&self) -> String {
        self.remote_ref
            .clone()
            .unwrap_or_else(|| format!("refs/remotes/{}/{}", self.remote, self.branch))
    }

    /// Configured fallback signature, if both parts are set.
    pub fn fallback_signature(&self) -> Option<(String, String)> {
        match (&self.author_name, &self.author_email) {
            (Some(name), Some(email)) => Some((name.clone(), email.clone())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from the environment.
    ///
    /// A missing variable only logs a warning; fetch then runs without
    /// credentials.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.git.token_env {
            self.git.token = resolve_optional_env(env_name, "git.token_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.remote.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.git.branch.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.branch".into(),
                detail: "branch name must not be empty".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level".into(),
                detail: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if let Some(ref remote_ref) = self.git.remote_ref {
            if !remote_ref.starts_with("refs/") {
                return Err(ConfigError::InvalidValue {
                    field: "git.remote_ref".into(),
                    detail: "must be a full ref name starting with 'refs/'".into(),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// A commented starter file, as written by `bibsync init`.
    pub fn template() -> &'static str {
        r#"# bibsync configuration
log_level = "info"

[library]
path = "library.json"

[git]
remote = "origin"
branch = "main"
# remote_ref = "refs/remotes/origin/main"
# token_env = "BIBSYNC_GIT_TOKEN"
# author_name = "bibsync"
# author_email = "bibsync@localhost"
"#
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
