//! Configuration for tumblr-mirror

mod blog;
mod logging;

pub use blog::BlogConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default semaphore capacity for all network I/O.
pub const DEFAULT_CONCURRENCY: usize = 24;

const TUMBLR_HOST_SUFFIX: &str = ".tumblr.com";

/// Main configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key for the public listing endpoint.
    #[serde(default)]
    pub api_key: String,

    /// Semaphore capacity shared by all fetches and downloads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Credentials enabling the session-authenticated fallback.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Where per-blog high-water marks are persisted.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Blogs to mirror, processed in order after a stable sort by name.
    #[serde(default)]
    pub blogs: Vec<BlogConfig>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_state_file() -> PathBuf {
    PathBuf::from("tumblr-mirror.marks.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            username: None,
            password: None,
            state_file: default_state_file(),
            logging: LoggingConfig::default(),
            blogs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// After deserializing, this validates all fields and normalizes blog
    /// names to fully-qualified hosts so callers never see bare names.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;
        config.validate()?;
        config.normalize();
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.concurrency == 0 {
            errors.push("concurrency must be positive".to_string());
        }

        if self.api_key.is_empty() {
            errors.push("api_key must be set".to_string());
        }

        if self.username.is_some() != self.password.is_some() {
            errors.push("username and password must be set together".to_string());
        }

        if self.state_file.as_os_str().is_empty() {
            errors.push("state_file must not be empty".to_string());
        }

        for (idx, blog) in self.blogs.iter().enumerate() {
            if blog.name.is_empty() {
                errors.push(format!("blogs[{}]: name must not be empty", idx));
            }
            if blog.target.as_os_str().is_empty() {
                errors.push(format!("blogs[{}]: target must not be empty", idx));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }

    /// Qualify bare blog names and order blogs by name (stable, so equal
    /// names keep their configured order).
    fn normalize(&mut self) {
        for blog in &mut self.blogs {
            blog.name = name_to_host(&blog.name);
        }
        self.blogs.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Username and password when both are configured and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }
}

/// Qualify a bare blog name; names already containing a dot pass through.
pub fn name_to_host(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}{}", name, TUMBLR_HOST_SUFFIX)
    }
}

/// Strip the standard host suffix back off, for endpoints that want the
/// short name.
pub fn host_to_name(host: &str) -> &str {
    host.strip_suffix(TUMBLR_HOST_SUFFIX).unwrap_or(host)
}
