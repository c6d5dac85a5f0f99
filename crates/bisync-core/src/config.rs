//! Configuration module for bisync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum percentage of files one side may delete in a run.
pub const DEFAULT_MAX_DELETE: u8 = 50;

/// Default name of the access-check marker file.
pub const DEFAULT_CHECK_FILENAME: &str = "BISYNC_CHECK";

/// Default modification-time tolerance in milliseconds.
pub const DEFAULT_MODTIME_TOLERANCE_MS: u64 = 1000;

/// Default number of concurrent transfers.
pub const DEFAULT_TRANSFERS: u32 = 4;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for bisync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub safety: SafetyConfig,
    pub compare: CompareConfig,
    pub conflicts: ConflictsConfig,
    pub propagation: PropagationConfig,
    pub check_sync: CheckSyncMode,
    pub run: RunConfig,
    pub logging: LoggingConfig,
}

/// Locations of the two trees, the history files and the filter definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the first tree.
    pub path1: Option<PathBuf>,
    /// Root of the second tree.
    pub path2: Option<PathBuf>,
    /// Directory holding listings, lock and lockout files.
    pub workdir: PathBuf,
    /// Optional filter definition file (`+ glob` / `- glob` lines).
    pub filters_file: Option<PathBuf>,
}

/// Safety gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Abort if more than this percentage of one side's files were deleted.
    pub max_delete: u8,
    /// Require matching access-check files on both sides.
    pub check_access: bool,
    /// Name of the access-check file.
    pub check_filename: String,
    /// Bypass the max-delete check.
    pub force: bool,
}

/// Delta comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Modification times closer than this are considered equal.
    pub modtime_tolerance_ms: u64,
    /// Ask the backend for content hashes when listing.
    pub compare_hash: bool,
}

/// Naming of preserved conflict versions.
///
/// A conflicting `notes.txt` is kept as `notes.txt..path1` and
/// `notes.txt..path2` with the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    pub separator: String,
    pub path1_suffix: String,
    pub path2_suffix: String,
}

/// Propagation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Maximum concurrent transfer actions.
    pub transfers: u32,
    /// Remove directories left empty after propagation.
    pub remove_empty_dirs: bool,
}

/// Per-invocation run switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Rebuild both listings from current state.
    pub resync: bool,
    /// Plan and report without mutating anything.
    pub dry_run: bool,
    /// Keep `.lst-new` working snapshots after the run.
    pub retain_working_files: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

/// When the post-run integrity check runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSyncMode {
    /// Compare the fresh listings after every run.
    #[default]
    Enabled,
    /// Skip the comparison.
    Disabled,
    /// Compare the stored listings and do nothing else.
    Only,
}

impl fmt::Display for CheckSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckSyncMode::Enabled => write!(f, "enabled"),
            CheckSyncMode::Disabled => write!(f, "disabled"),
            CheckSyncMode::Only => write!(f, "only"),
        }
    }
}

impl FromStr for CheckSyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enabled" | "true" => Ok(CheckSyncMode::Enabled),
            "disabled" | "false" => Ok(CheckSyncMode::Disabled),
            "only" | "verify-only" => Ok(CheckSyncMode::Only),
            other => Err(format!(
                "invalid check-sync mode '{other}'; valid: enabled, disabled, only"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/bisync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("bisync")
            .join("config.yaml")
    }

    /// Modification-time tolerance as a [`Duration`].
    pub fn modtime_tolerance(&self) -> Duration {
        Duration::from_millis(self.compare.modtime_tolerance_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            path1: None,
            path2: None,
            workdir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("bisync"),
            filters_file: None,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_delete: DEFAULT_MAX_DELETE,
            check_access: false,
            check_filename: DEFAULT_CHECK_FILENAME.to_string(),
            force: false,
        }
    }
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            modtime_tolerance_ms: DEFAULT_MODTIME_TOLERANCE_MS,
            compare_hash: false,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            separator: "..".to_string(),
            path1_suffix: "path1".to_string(),
            path2_suffix: "path2".to_string(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            transfers: DEFAULT_TRANSFERS,
            remove_empty_dirs: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"safety.max_delete"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Tolerances above one day are almost certainly a unit mistake.
const MAX_MODTIME_TOLERANCE_MS: u64 = 24 * 60 * 60 * 1000;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- paths ---
        if let (Some(p1), Some(p2)) = (&self.paths.path1, &self.paths.path2) {
            if p1 == p2 {
                errors.push(ValidationError {
                    field: "paths.path2".into(),
                    message: "path1 and path2 must differ".into(),
                });
            }
        }
        if self.paths.workdir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "paths.workdir".into(),
                message: "must not be empty".into(),
            });
        }

        // --- safety ---
        if self.safety.max_delete > 100 {
            errors.push(ValidationError {
                field: "safety.max_delete".into(),
                message: format!("must be between 0 and 100, got {}", self.safety.max_delete),
            });
        }
        if self.safety.check_filename.is_empty() {
            errors.push(ValidationError {
                field: "safety.check_filename".into(),
                message: "must not be empty".into(),
            });
        } else if self.safety.check_filename.contains('/') {
            errors.push(ValidationError {
                field: "safety.check_filename".into(),
                message: "must be a bare file name".into(),
            });
        }

        // --- compare ---
        if self.compare.modtime_tolerance_ms > MAX_MODTIME_TOLERANCE_MS {
            errors.push(ValidationError {
                field: "compare.modtime_tolerance_ms".into(),
                message: format!("must not exceed {MAX_MODTIME_TOLERANCE_MS}"),
            });
        }

        // --- conflicts ---
        if self.conflicts.separator.is_empty() || self.conflicts.separator.contains('/') {
            errors.push(ValidationError {
                field: "conflicts.separator".into(),
                message: "must be non-empty and contain no '/'".into(),
            });
        }
        for (field, suffix) in [
            ("conflicts.path1_suffix", &self.conflicts.path1_suffix),
            ("conflicts.path2_suffix", &self.conflicts.path2_suffix),
        ] {
            if suffix.is_empty() || suffix.contains('/') {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be non-empty and contain no '/'".into(),
                });
            }
        }
        if self.conflicts.path1_suffix == self.conflicts.path2_suffix {
            errors.push(ValidationError {
                field: "conflicts.path2_suffix".into(),
                message: "must differ from path1_suffix".into(),
            });
        }

        // --- propagation ---
        if self.propagation.transfers == 0 {
            errors.push(ValidationError {
                field: "propagation.transfers".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from an existing configuration (e.g. one loaded from disk).
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // --- paths ---

    pub fn path1(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.path1 = Some(path.into());
        self
    }

    pub fn path2(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.path2 = Some(path.into());
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.workdir = dir.into();
        self
    }

    pub fn filters_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.paths.filters_file = Some(file.into());
        self
    }

    // --- safety ---

    pub fn max_delete(mut self, percent: u8) -> Self {
        self.config.safety.max_delete = percent;
        self
    }

    pub fn check_access(mut self, enabled: bool) -> Self {
        self.config.safety.check_access = enabled;
        self
    }

    pub fn check_filename(mut self, name: impl Into<String>) -> Self {
        self.config.safety.check_filename = name.into();
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.safety.force = force;
        self
    }

    // --- compare ---

    pub fn modtime_tolerance_ms(mut self, ms: u64) -> Self {
        self.config.compare.modtime_tolerance_ms = ms;
        self
    }

    pub fn compare_hash(mut self, enabled: bool) -> Self {
        self.config.compare.compare_hash = enabled;
        self
    }

    // --- conflicts ---

    pub fn conflict_separator(mut self, separator: impl Into<String>) -> Self {
        self.config.conflicts.separator = separator.into();
        self
    }

    pub fn conflict_suffixes(
        mut self,
        path1_suffix: impl Into<String>,
        path2_suffix: impl Into<String>,
    ) -> Self {
        self.config.conflicts.path1_suffix = path1_suffix.into();
        self.config.conflicts.path2_suffix = path2_suffix.into();
        self
    }

    // --- propagation ---

    pub fn transfers(mut self, n: u32) -> Self {
        self.config.propagation.transfers = n;
        self
    }

    pub fn remove_empty_dirs(mut self, enabled: bool) -> Self {
        self.config.propagation.remove_empty_dirs = enabled;
        self
    }

    // --- check_sync ---

    pub fn check_sync(mut self, mode: CheckSyncMode) -> Self {
        self.config.check_sync = mode;
        self
    }

    // --- run ---

    pub fn resync(mut self, enabled: bool) -> Self {
        self.config.run.resync = enabled;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.config.run.dry_run = enabled;
        self
    }

    pub fn retain_working_files(mut self, enabled: bool) -> Self {
        self.config.run.retain_working_files = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
