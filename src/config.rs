//! Configuration loading for cogcycle.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.cogcycle/config.toml`)
//! 3. User config (`~/.cogcycle/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! All configuration is optional. The system runs with sensible defaults
//! when no config exists.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CycleError, Result};
use crate::util::atomic_write;

/// Name of the per-project and per-user configuration directory.
pub const CONFIG_DIR_NAME: &str = ".cogcycle";

/// Main configuration struct for cogcycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Approval gate timeouts and the global auto-approve flag.
    pub approval: ApprovalConfig,
    /// Validation gate configuration.
    pub validation: ValidationConfig,
    /// Cycle limits and artifact layout.
    pub cycle: CycleConfig,
    /// Reflection thresholds.
    pub reflection: ReflectionConfig,
    /// Model sampling and the external completion command.
    pub model: ModelConfig,
}

/// Approval gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds to wait for a context decision.
    pub context_timeout_secs: u64,
    /// Seconds to wait for a proposal decision.
    pub proposal_timeout_secs: u64,
    /// Global context auto-approve flag. Never applies to proposals.
    pub auto_approve_context: bool,
}

/// Smallest accepted approval timeout.
pub const MIN_TIMEOUT_SECS: u64 = 1;

impl ApprovalConfig {
    pub fn is_valid_timeout(value: u64) -> bool {
        value >= MIN_TIMEOUT_SECS
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_secs(self.proposal_timeout_secs)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            context_timeout_secs: 300,
            proposal_timeout_secs: 600,
            auto_approve_context: false,
        }
    }
}

/// Validation gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Whether self-tests run before apply.
    pub enabled: bool,
    /// Minimum success rate (percent) required to apply.
    pub threshold: f64,
    /// Block apply when the self-tester is unavailable.
    pub fail_closed: bool,
    /// Shell commands run as self-test suites.
    pub commands: Vec<String>,
}

impl ValidationConfig {
    pub fn is_valid_threshold(value: f64) -> bool {
        value.is_finite() && (0.0..=100.0).contains(&value)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 80.0,
            fail_closed: false,
            commands: Vec::new(),
        }
    }
}

/// Cycle limits and artifact layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    /// Cap on revise decisions and continuations per cycle.
    pub max_iterations: u32,
    /// Transition history entries kept per engine.
    pub history_limit: usize,
    /// Artifact directory holding per-session turn bundles.
    pub sessions_root: String,
    /// Files bundled when the model selects none.
    pub max_context_files: usize,
}

impl CycleConfig {
    pub fn is_valid_max_iterations(value: u32) -> bool {
        value >= 1
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            history_limit: 50,
            sessions_root: "/sessions".to_string(),
            max_context_files: 20,
        }
    }
}

/// Reflection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Reflection-driven continuations allowed per cycle.
    pub max_continuations: u32,
    /// Success rate (percent) that must be exceeded to continue.
    pub continue_threshold: f64,
    /// Share of cycle time above which a state is a bottleneck.
    pub bottleneck_ratio: f64,
    /// Context approval wait that triggers an auto-approve suggestion.
    pub context_wait_warn_secs: u64,
    /// Proposal approval wait that triggers a smaller-changeset suggestion.
    pub proposal_wait_warn_secs: u64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_continuations: 3,
            continue_threshold: 50.0,
            bottleneck_ratio: 0.30,
            context_wait_warn_secs: 60,
            proposal_wait_warn_secs: 120,
        }
    }
}

/// Model configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// External completion command as `[program, args...]`.
    pub command: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 8192,
            command: Vec::new(),
        }
    }
}

fn warn_invalid(var: &str, value: &str, expected: &str, current: impl std::fmt::Display) {
    eprintln!(
        "Warning: Invalid {} value '{}'. {}. Using default '{}'.",
        var, value, expected, current
    );
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from all sources for the current directory.
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

    /// Load configuration with `cwd` as the project directory.
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

    /// Load only the user config file, or defaults if absent.
    pub fn load_user() -> Self {
        Self::load_user_config().unwrap_or_default()
    }

    fn load_user_config() -> Option<Config> {
        let path = user_config_path()?;
        Self::load_from_file(&path).ok()
    }

    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_from_file(&project_config_path(cwd)).ok()
    }

    fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| CycleError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| CycleError::config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        // COGCYCLE_CONTEXT_TIMEOUT
        if let Ok(val) = env::var("COGCYCLE_CONTEXT_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(n) if ApprovalConfig::is_valid_timeout(n) => {
                    self.approval.context_timeout_secs = n
                }
                _ => warn_invalid(
                    "COGCYCLE_CONTEXT_TIMEOUT",
                    &val,
                    "Expected seconds >= 1",
                    self.approval.context_timeout_secs,
                ),
            }
        }

        // COGCYCLE_PROPOSAL_TIMEOUT
        if let Ok(val) = env::var("COGCYCLE_PROPOSAL_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(n) if ApprovalConfig::is_valid_timeout(n) => {
                    self.approval.proposal_timeout_secs = n
                }
                _ => warn_invalid(
                    "COGCYCLE_PROPOSAL_TIMEOUT",
                    &val,
                    "Expected seconds >= 1",
                    self.approval.proposal_timeout_secs,
                ),
            }
        }

        // COGCYCLE_AUTO_APPROVE_CONTEXT
        if let Ok(val) = env::var("COGCYCLE_AUTO_APPROVE_CONTEXT") {
            match parse_bool(&val) {
                Some(b) => self.approval.auto_approve_context = b,
                None => warn_invalid(
                    "COGCYCLE_AUTO_APPROVE_CONTEXT",
                    &val,
                    "Expected true/false",
                    self.approval.auto_approve_context,
                ),
            }
        }

        // COGCYCLE_VALIDATION_THRESHOLD
        if let Ok(val) = env::var("COGCYCLE_VALIDATION_THRESHOLD") {
            match val.parse::<f64>() {
                Ok(n) if ValidationConfig::is_valid_threshold(n) => self.validation.threshold = n,
                _ => warn_invalid(
                    "COGCYCLE_VALIDATION_THRESHOLD",
                    &val,
                    "Must be in range [0, 100]",
                    self.validation.threshold,
                ),
            }
        }

        // COGCYCLE_FAIL_CLOSED
        if let Ok(val) = env::var("COGCYCLE_FAIL_CLOSED") {
            match parse_bool(&val) {
                Some(b) => self.validation.fail_closed = b,
                None => warn_invalid(
                    "COGCYCLE_FAIL_CLOSED",
                    &val,
                    "Expected true/false",
                    self.validation.fail_closed,
                ),
            }
        }

        // COGCYCLE_MAX_ITERATIONS
        if let Ok(val) = env::var("COGCYCLE_MAX_ITERATIONS") {
            match val.parse::<u32>() {
                Ok(n) if CycleConfig::is_valid_max_iterations(n) => self.cycle.max_iterations = n,
                _ => warn_invalid(
                    "COGCYCLE_MAX_ITERATIONS",
                    &val,
                    "Expected a positive integer",
                    self.cycle.max_iterations,
                ),
            }
        }
    }

    /// Layer `other` over `self`, taking each field that differs from default.
    fn merge(mut self, other: Config) -> Self {
        let default_approval = ApprovalConfig::default();
        if other.approval.context_timeout_secs != default_approval.context_timeout_secs {
            self.approval.context_timeout_secs = other.approval.context_timeout_secs;
        }
        if other.approval.proposal_timeout_secs != default_approval.proposal_timeout_secs {
            self.approval.proposal_timeout_secs = other.approval.proposal_timeout_secs;
        }
        if other.approval.auto_approve_context != default_approval.auto_approve_context {
            self.approval.auto_approve_context = other.approval.auto_approve_context;
        }

        let default_validation = ValidationConfig::default();
        if other.validation.enabled != default_validation.enabled {
            self.validation.enabled = other.validation.enabled;
        }
        if other.validation.threshold != default_validation.threshold {
            self.validation.threshold = other.validation.threshold;
        }
        if other.validation.fail_closed != default_validation.fail_closed {
            self.validation.fail_closed = other.validation.fail_closed;
        }
        if !other.validation.commands.is_empty() {
            self.validation.commands = other.validation.commands;
        }

        let default_cycle = CycleConfig::default();
        if other.cycle.max_iterations != default_cycle.max_iterations {
            self.cycle.max_iterations = other.cycle.max_iterations;
        }
        if other.cycle.history_limit != default_cycle.history_limit {
            self.cycle.history_limit = other.cycle.history_limit;
        }
        if other.cycle.sessions_root != default_cycle.sessions_root {
            self.cycle.sessions_root = other.cycle.sessions_root;
        }
        if other.cycle.max_context_files != default_cycle.max_context_files {
            self.cycle.max_context_files = other.cycle.max_context_files;
        }

        let default_reflection = ReflectionConfig::default();
        if other.reflection.max_continuations != default_reflection.max_continuations {
            self.reflection.max_continuations = other.reflection.max_continuations;
        }
        if other.reflection.continue_threshold != default_reflection.continue_threshold {
            self.reflection.continue_threshold = other.reflection.continue_threshold;
        }
        if other.reflection.bottleneck_ratio != default_reflection.bottleneck_ratio {
            self.reflection.bottleneck_ratio = other.reflection.bottleneck_ratio;
        }
        if other.reflection.context_wait_warn_secs != default_reflection.context_wait_warn_secs {
            self.reflection.context_wait_warn_secs = other.reflection.context_wait_warn_secs;
        }
        if other.reflection.proposal_wait_warn_secs != default_reflection.proposal_wait_warn_secs {
            self.reflection.proposal_wait_warn_secs = other.reflection.proposal_wait_warn_secs;
        }

        let default_model = ModelConfig::default();
        if other.model.temperature != default_model.temperature {
            self.model.temperature = other.model.temperature;
        }
        if other.model.max_output_tokens != default_model.max_output_tokens {
            self.model.max_output_tokens = other.model.max_output_tokens;
        }
        if !other.model.command.is_empty() {
            self.model.command = other.model.command;
        }

        self
    }

    /// Save configuration to `.cogcycle/config.toml` under `cwd`.
    pub fn save_project(&self, cwd: &Path) -> Result<()> {
        self.save_to(&project_config_path(cwd))
    }

    /// Save configuration to the user config file.
    pub fn save_user(&self) -> Result<()> {
        let path = user_config_path()
            .ok_or_else(|| CycleError::config("Could not determine cogcycle home directory"))?;
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CycleError::config(e.to_string()))?;
        atomic_write(path, content.as_bytes())
    }
}

/// Get the cogcycle home directory.
///
/// Checks `COGCYCLE_HOME` first, then falls back to `~/.cogcycle`. An empty
/// `COGCYCLE_HOME` is ignored.
pub fn cogcycle_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("COGCYCLE_HOME") {
        if home.is_empty() {
            tracing::warn!("COGCYCLE_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("COGCYCLE_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(CONFIG_DIR_NAME));
    }

    let fallback_path = env::temp_dir().join("cogcycle");
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

/// `<cogcycle_home>/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    cogcycle_home().map(|h| h.join("config.toml"))
}

/// `<cogcycle_home>/sessions/`, where session records live.
pub fn sessions_dir() -> Option<PathBuf> {
    cogcycle_home().map(|h| h.join("sessions"))
}

/// `<cwd>/.cogcycle/`.
pub fn project_dir(cwd: &Path) -> PathBuf {
    cwd.join(CONFIG_DIR_NAME)
}

/// `<cwd>/.cogcycle/config.toml`.
pub fn project_config_path(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("config.toml")
}

/// `<cwd>/.cogcycle/reflections.jsonl`.
pub fn project_reflections_path(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("reflections.jsonl")
}

/// `<cwd>/.cogcycle/commits.jsonl`.
pub fn project_commits_path(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("commits.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "COGCYCLE_CONTEXT_TIMEOUT",
        "COGCYCLE_PROPOSAL_TIMEOUT",
        "COGCYCLE_AUTO_APPROVE_CONTEXT",
        "COGCYCLE_VALIDATION_THRESHOLD",
        "COGCYCLE_FAIL_CLOSED",
        "COGCYCLE_MAX_ITERATIONS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    fn write_project_config(dir: &Path, content: &str) {
        let path = project_config_path(dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.approval.context_timeout_secs, 300);
        assert_eq!(config.approval.proposal_timeout_secs, 600);
        assert!(!config.approval.auto_approve_context);
        assert!(config.validation.enabled);
        assert_eq!(config.validation.threshold, 80.0);
        assert!(!config.validation.fail_closed);
        assert_eq!(config.cycle.max_iterations, 10);
        assert_eq!(config.cycle.history_limit, 50);
        assert_eq!(config.cycle.sessions_root, "/sessions");
        assert_eq!(config.reflection.max_continuations, 3);
        assert_eq!(config.reflection.continue_threshold, 50.0);
        assert_eq!(config.reflection.bottleneck_ratio, 0.30);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[validation]
threshold = 90.0
"#,
        )
        .unwrap();
        assert_eq!(config.validation.threshold, 90.0);
        assert!(config.validation.enabled);
        assert_eq!(config.approval, ApprovalConfig::default());
    }

    #[test]
    #[serial]
    fn test_project_config_precedence() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("COGCYCLE_HOME", home.path());
        let dir = TempDir::new().unwrap();
        write_project_config(
            dir.path(),
            r#"
[approval]
context_timeout_secs = 30
"#,
        );

        let config = Config::load_from_cwd(dir.path());

        assert_eq!(config.approval.context_timeout_secs, 30);
        assert_eq!(config.approval.proposal_timeout_secs, 600);
        env::remove_var("COGCYCLE_HOME");
    }

    #[test]
    #[serial]
    fn test_user_config_under_project_config() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("COGCYCLE_HOME", home.path());
        fs::write(
            home.path().join("config.toml"),
            "[approval]\nauto_approve_context = true\nproposal_timeout_secs = 60\n",
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        write_project_config(dir.path(), "[approval]\nproposal_timeout_secs = 90\n");

        let config = Config::load_from_cwd(dir.path());

        assert!(config.approval.auto_approve_context);
        assert_eq!(config.approval.proposal_timeout_secs, 90);
        env::remove_var("COGCYCLE_HOME");
    }

    #[test]
    #[serial]
    fn test_env_var_precedence() {
        clear_env();
        let home = TempDir::new().unwrap();
        env::set_var("COGCYCLE_HOME", home.path());
        let dir = TempDir::new().unwrap();
        write_project_config(dir.path(), "[cycle]\nmax_iterations = 4\n");
        env::set_var("COGCYCLE_MAX_ITERATIONS", "6");

        let config = Config::load_from_cwd(dir.path());

        assert_eq!(config.cycle.max_iterations, 6);
        clear_env();
        env::remove_var("COGCYCLE_HOME");
    }

    #[test]
    #[serial]
    fn test_env_var_overrides() {
        clear_env();
        env::set_var("COGCYCLE_CONTEXT_TIMEOUT", "10");
        env::set_var("COGCYCLE_PROPOSAL_TIMEOUT", "20");
        env::set_var("COGCYCLE_AUTO_APPROVE_CONTEXT", "1");
        env::set_var("COGCYCLE_VALIDATION_THRESHOLD", "95.5");
        env::set_var("COGCYCLE_FAIL_CLOSED", "true");
        env::set_var("COGCYCLE_MAX_ITERATIONS", "3");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.approval.context_timeout_secs, 10);
        assert_eq!(config.approval.proposal_timeout_secs, 20);
        assert!(config.approval.auto_approve_context);
        assert_eq!(config.validation.threshold, 95.5);
        assert!(config.validation.fail_closed);
        assert_eq!(config.cycle.max_iterations, 3);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_ignored() {
        clear_env();
        env::set_var("COGCYCLE_CONTEXT_TIMEOUT", "0");
        env::set_var("COGCYCLE_VALIDATION_THRESHOLD", "150");
        env::set_var("COGCYCLE_FAIL_CLOSED", "maybe");
        env::set_var("COGCYCLE_MAX_ITERATIONS", "-2");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config, Config::default());
        clear_env();
    }

    #[test]
    fn test_merge_field_by_field() {
        let mut base = Config::default();
        base.approval.context_timeout_secs = 42;
        base.validation.commands = vec!["make test".to_string()];

        let mut other = Config::default();
        other.validation.threshold = 70.0;

        let merged = base.merge(other);

        assert_eq!(merged.approval.context_timeout_secs, 42);
        assert_eq!(merged.validation.threshold, 70.0);
        assert_eq!(merged.validation.commands, vec!["make test"]);
    }

    #[test]
    fn test_save_project_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.approval.auto_approve_context = true;
        config.model.command = vec!["llm".to_string(), "-m".to_string(), "local".to_string()];

        config.save_project(dir.path()).unwrap();

        let loaded = Config::load_from_file(&project_config_path(dir.path())).unwrap();
        assert_eq!(loaded, config);
        assert!(!project_dir(dir.path()).join(".config.toml.tmp").exists());
    }

    #[test]
    #[serial]
    fn test_cogcycle_home_with_env() {
        env::set_var("COGCYCLE_HOME", "/custom/cogcycle");
        assert_eq!(cogcycle_home(), Some(PathBuf::from("/custom/cogcycle")));
        assert_eq!(
            sessions_dir(),
            Some(PathBuf::from("/custom/cogcycle/sessions"))
        );
        env::remove_var("COGCYCLE_HOME");
    }

    #[test]
    #[serial]
    fn test_cogcycle_home_empty_env_falls_back() {
        env::set_var("COGCYCLE_HOME", "");
        let home = cogcycle_home().unwrap();
        assert!(home.ends_with(CONFIG_DIR_NAME) || home.ends_with("cogcycle"));
        env::remove_var("COGCYCLE_HOME");
    }

    #[test]
    fn test_project_paths() {
        let cwd = Path::new("/project");
        assert_eq!(
            project_reflections_path(cwd),
            PathBuf::from("/project/.cogcycle/reflections.jsonl")
        );
        assert_eq!(
            project_commits_path(cwd),
            PathBuf::from("/project/.cogcycle/commits.jsonl")
        );
    }
}
