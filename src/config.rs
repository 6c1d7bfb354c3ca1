//! Layered daemon configuration.
//!
//! Configuration merges three layers per watched directory, most specific
//! wins: directory overrides > app overrides > global defaults. Merging is
//! explicit and field-by-field so precedence is testable independent of the
//! data's shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default rsync flags when no layer provides any: archive, omit directory
/// times, itemize changes. Itemized output is what the executor's line
/// classifier keys on.
pub const DEFAULT_RSYNC_FLAGS: [char; 3] = ['a', 'O', 'i'];

/// Errors raised while loading, parsing, or validating configuration.
///
/// All of these are fatal pre-flight errors: they are reported to the
/// operator and the process exits before any watcher starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid or empty apps list")]
    EmptyApps,

    #[error("invalid or empty directories list for app '{app}'")]
    EmptyDirectories { app: String },

    #[error("missing source for app '{app}' directories[{index}]")]
    MissingSource { app: String, index: usize },

    #[error("missing destination for app '{app}' directories[{index}]")]
    MissingDestination { app: String, index: usize },

    #[error("source path '{path}' does not exist, cannot sync an unavailable directory")]
    SourceNotFound { path: PathBuf },

    #[error("ssh option '{key}' for app '{app}' must be a string or number")]
    InvalidShellOption { app: String, key: String },

    #[error("invalid ignore pattern '{pattern}': {source}")]
    InvalidIgnorePattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Top-level configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Append sync output to this file instead of the console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Log the generated rsync command line for each invocation.
    #[serde(default)]
    pub debug: bool,

    /// Global watcher defaults.
    #[serde(default)]
    pub watch: WatchOverrides,

    /// Global rsync defaults.
    #[serde(default)]
    pub rsync: RsyncOverrides,

    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

/// One logical application: a target host plus its watched directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub host: HostOptions,

    #[serde(default)]
    pub watch: WatchOverrides,

    #[serde(default)]
    pub rsync: RsyncOverrides,

    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
}

/// Remote host addressing. Empty hostname and username yield a purely local
/// destination path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostOptions {
    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub username: String,

    /// Exact key/value pairs matching the ssh manual, e.g. {"-p": "2222"}.
    /// Order is preserved into the generated shell string.
    #[serde(default)]
    pub ssh_options: serde_json::Map<String, Value>,
}

/// One watched directory entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub source: PathBuf,

    #[serde(default)]
    pub destination: String,

    #[serde(default)]
    pub watch: WatchOverrides,

    #[serde(default)]
    pub rsync: RsyncOverrides,
}

/// Watcher options as they appear in a config layer. `None` means "inherit
/// from the next layer out".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_initial: Option<bool>,

    /// Regex predicates; a path matching any of them is never forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored: Option<Vec<String>>,
}

/// Fully resolved watcher options for one directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchOptions {
    pub ignore_initial: bool,
    pub ignored: Vec<String>,
}

/// Rsync options as they appear in a config layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RsyncOverrides {
    /// Single-character option codes, e.g. ["a", "O", "i", "s"].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<char>>,

    /// Ordered exclude glob patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
}

/// Fully resolved rsync options for one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RsyncOptions {
    pub flags: Vec<char>,
    pub exclude: Vec<String>,
}

/// Resolve watcher options across the three layers, most specific wins.
pub fn resolve_watch_options(
    global: &WatchOverrides,
    app: &WatchOverrides,
    dir: &WatchOverrides,
) -> WatchOptions {
    WatchOptions {
        ignore_initial: dir
            .ignore_initial
            .or(app.ignore_initial)
            .or(global.ignore_initial)
            .unwrap_or(false),
        ignored: dir
            .ignored
            .clone()
            .or_else(|| app.ignored.clone())
            .or_else(|| global.ignored.clone())
            .unwrap_or_default(),
    }
}

/// Resolve rsync options across the three layers, most specific wins.
pub fn resolve_rsync_options(
    global: &RsyncOverrides,
    app: &RsyncOverrides,
    dir: &RsyncOverrides,
) -> RsyncOptions {
    RsyncOptions {
        flags: dir
            .flags
            .clone()
            .or_else(|| app.flags.clone())
            .or_else(|| global.flags.clone())
            .unwrap_or_else(|| DEFAULT_RSYNC_FLAGS.to_vec()),
        exclude: dir
            .exclude
            .clone()
            .or_else(|| app.exclude.clone())
            .or_else(|| global.exclude.clone())
            .unwrap_or_default(),
    }
}

impl HostOptions {
    /// Build the `user@host:` prefix for destination paths. Empty fragments
    /// are omitted; with neither set the result is empty and destinations
    /// stay local.
    pub fn remote_uri_prefix(&self) -> String {
        let mut uri = String::new();
        if !self.username.is_empty() {
            uri.push_str(&self.username);
            uri.push('@');
        }
        if !self.hostname.is_empty() {
            uri.push_str(&self.hostname);
            uri.push(':');
        }
        uri
    }

    /// Format the ssh option mapping as a remote-shell override string,
    /// e.g. `ssh -p 2222 -i /key`. An empty mapping yields `None` so rsync
    /// uses its default shell. Values must be strings or numbers.
    pub fn ssh_shell(&self, app: &str) -> Result<Option<String>, ConfigError> {
        if self.ssh_options.is_empty() {
            return Ok(None);
        }

        let mut parts = Vec::new();
        for (key, value) in &self.ssh_options {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => {
                    return Err(ConfigError::InvalidShellOption {
                        app: app.to_string(),
                        key: key.clone(),
                    })
                }
            };
            // Empty fragments are dropped rather than emitting stray spaces.
            let pair: Vec<&str> = [key.as_str(), rendered.as_str()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect();
            if !pair.is_empty() {
                parts.push(pair.join(" "));
            }
        }

        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("ssh {}", parts.join(" "))))
        }
    }
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// The resolved, immutable description of one directory's sync target and
/// options. Created once at startup; coordinators and executors only read it.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    /// Local directory to watch and sync from. Exists at startup.
    pub source: PathBuf,

    /// Full destination URI, `[user@][host:]path`.
    pub destination: String,

    /// Single-character rsync option codes.
    pub flags: Vec<char>,

    /// Ordered exclude glob patterns.
    pub exclude: Vec<String>,

    /// Remote-shell override (`--rsh`), if any.
    pub shell: Option<String>,

    /// Skip the synthetic startup enumeration.
    pub ignore_initial: bool,

    /// Compiled ignore predicates applied to every event path.
    pub ignored: Vec<Regex>,

    /// Log tag, e.g. " myapp:[1]". Empty for unnamed apps.
    pub tag: String,

    /// Index into the console color palette.
    pub color_index: usize,
}

impl WatchSpec {
    /// Whether a path matches any of the ignore predicates.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.ignored.iter().any(|re| re.is_match(&text))
    }
}

/// Compile the resolved ignore patterns, surfacing bad regexes as config
/// errors.
pub fn compile_ignored(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidIgnorePattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}
