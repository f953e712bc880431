//! Configuration loading for Waypoint.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.waypoint/config.toml`)
//! 3. User config (`~/.waypoint/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. The system runs with sensible defaults
//! when no config exists.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::{FailOpen, Result, WaypointError};
use crate::util::read_to_string_limited;

/// Main configuration struct for Waypoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Document store location.
    pub store: StoreConfig,
    /// Retry behavior for store calls.
    pub sync: SyncConfig,
    /// Achievement reward behavior.
    pub achievements: AchievementsConfig,
}

/// Document store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file store. Defaults to `<waypoint_home>/documents`.
    pub dir: Option<PathBuf>,
}

/// Retry configuration for transient store faults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per store call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay.
    pub max_backoff_ms: u64,
}

/// Minimum valid max_attempts value (a call is always attempted once).
pub const MIN_MAX_ATTEMPTS: u32 = 1;

impl SyncConfig {
    /// Check if max_attempts is valid (must be >= 1).
    pub fn is_valid_max_attempts(value: u32) -> bool {
        value >= MIN_MAX_ATTEMPTS
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

/// Achievement configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AchievementsConfig {
    /// Credit star XP rewards to the learner's XP when a star unlocks.
    pub award_xp: bool,
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self { award_xp: true }
    }
}

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables
    /// 2. Project config (`.waypoint/config.toml` in cwd)
    /// 3. User config (`~/.waypoint/config.toml`)
    /// 4. Defaults
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(_) => {
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration with a specific working directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Load user config from `~/.waypoint/config.toml`.
    fn load_user_config() -> Option<Config> {
        let home = waypoint_home()?;
        Self::load_optional(&home.join("config.toml"))
    }

    /// Load project config from `.waypoint/config.toml` in the given directory.
    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_optional(&cwd.join(".waypoint").join("config.toml"))
    }

    // Missing files are silent; unreadable or invalid ones are logged.
    fn load_optional(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        Self::load_from_file(path)
            .map(Some)
            .fail_open_with(&format!("loading {}", path.display()), None)
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = read_to_string_limited(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| WaypointError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no layer may set.
    pub fn validate(&self) -> Result<()> {
        if !SyncConfig::is_valid_max_attempts(self.sync.max_attempts) {
            return Err(WaypointError::config(format!(
                "sync.max_attempts must be >= {}, got {}",
                MIN_MAX_ATTEMPTS, self.sync.max_attempts
            )));
        }
        if self.sync.initial_backoff_ms > self.sync.max_backoff_ms {
            return Err(WaypointError::config(format!(
                "sync.initial_backoff_ms ({}) exceeds sync.max_backoff_ms ({})",
                self.sync.initial_backoff_ms, self.sync.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // WAYPOINT_STORE_DIR
        if let Ok(val) = env::var("WAYPOINT_STORE_DIR") {
            if val.is_empty() {
                warn!("WAYPOINT_STORE_DIR is empty, ignoring");
            } else {
                self.store.dir = Some(PathBuf::from(val));
            }
        }

        // WAYPOINT_SYNC_MAX_ATTEMPTS
        if let Ok(val) = env::var("WAYPOINT_SYNC_MAX_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) if SyncConfig::is_valid_max_attempts(n) => self.sync.max_attempts = n,
                _ => warn!(
                    value = %val,
                    current = self.sync.max_attempts,
                    "invalid WAYPOINT_SYNC_MAX_ATTEMPTS, expected an integer >= {}",
                    MIN_MAX_ATTEMPTS
                ),
            }
        }

        // WAYPOINT_SYNC_BACKOFF_MS
        if let Ok(val) = env::var("WAYPOINT_SYNC_BACKOFF_MS") {
            match val.parse::<u64>() {
                Ok(n) => {
                    self.sync.initial_backoff_ms = n;
                    self.sync.max_backoff_ms = self.sync.max_backoff_ms.max(n);
                }
                Err(_) => warn!(
                    value = %val,
                    current = self.sync.initial_backoff_ms,
                    "invalid WAYPOINT_SYNC_BACKOFF_MS, expected milliseconds"
                ),
            }
        }

        // WAYPOINT_AWARD_XP
        if let Ok(val) = env::var("WAYPOINT_AWARD_XP") {
            match val.as_str() {
                "true" | "1" => self.achievements.award_xp = true,
                "false" | "0" => self.achievements.award_xp = false,
                _ => warn!(value = %val, "invalid WAYPOINT_AWARD_XP, expected true or false"),
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// The `other` config takes precedence. Non-default fields from `other`
    /// are applied field by field, so a layer only needs to list its
    /// customizations.
    ///
    /// # Limitation
    ///
    /// A layer cannot set a value back to its default to undo a lower layer:
    /// a project `max_attempts = 3` does not override a user
    /// `max_attempts = 5`, because the project value equals the default.
    fn merge(mut self, other: Config) -> Self {
        if other.store.dir.is_some() {
            self.store.dir = other.store.dir;
        }

        let default_sync = SyncConfig::default();
        if other.sync.max_attempts != default_sync.max_attempts {
            self.sync.max_attempts = other.sync.max_attempts;
        }
        if other.sync.initial_backoff_ms != default_sync.initial_backoff_ms {
            self.sync.initial_backoff_ms = other.sync.initial_backoff_ms;
        }
        if other.sync.max_backoff_ms != default_sync.max_backoff_ms {
            self.sync.max_backoff_ms = other.sync.max_backoff_ms;
        }

        let default_achievements = AchievementsConfig::default();
        if other.achievements.award_xp != default_achievements.award_xp {
            self.achievements.award_xp = other.achievements.award_xp;
        }

        self
    }

    /// Load config with fail-open behavior.
    ///
    /// If loading fails for any reason, returns defaults.
    pub fn load_fail_open() -> Self {
        let result: Result<Self> = Ok(Self::load());
        result.fail_open_default("loading config")
    }

    /// Directory the file store uses: `[store] dir` or the default.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store.dir.clone().or_else(documents_dir)
    }
}

/// Get the Waypoint home directory.
///
/// Checks `WAYPOINT_HOME` first, then falls back to `~/.waypoint`. An empty
/// `WAYPOINT_HOME` is ignored; a relative one is canonicalized when it exists.
pub fn waypoint_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("WAYPOINT_HOME") {
        if home.is_empty() {
            warn!("WAYPOINT_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            warn!("WAYPOINT_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".waypoint"));
    }

    // Containerized/minimal environments without HOME
    let fallback_path = fallback_waypoint_home();
    warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

#[cfg(unix)]
fn fallback_waypoint_home() -> PathBuf {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/").map(|m| m.uid()).unwrap_or(0);
    PathBuf::from(format!("/tmp/waypoint-{}", uid))
}

#[cfg(not(unix))]
fn fallback_waypoint_home() -> PathBuf {
    std::env::temp_dir().join("waypoint")
}

/// Get the default documents directory.
///
/// Returns `<waypoint_home>/documents/`.
pub fn documents_dir() -> Option<PathBuf> {
    waypoint_home().map(|h| h.join("documents"))
}

/// Get the crash log path.
///
/// Returns `<waypoint_home>/crash.log`.
pub fn crash_log_path() -> Option<PathBuf> {
    waypoint_home().map(|h| h.join("crash.log"))
}
