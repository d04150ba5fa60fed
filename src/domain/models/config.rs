use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the refinery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Rig (repository) this coordinator serves
    #[serde(default)]
    pub rig: RigConfig,

    /// Processing daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Priority scoring weights
    #[serde(default)]
    pub scoring: ScoringWeights,

    /// Reference git merge engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The repository and the worker naming conventions around it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RigConfig {
    /// Rig name, used as the address namespace (`<rig>/<role>`)
    #[serde(default = "default_rig_name")]
    pub name: String,

    /// Working checkout the merge engine operates in
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// Target branch used when a request does not name one
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Prefix of worker branches, e.g. `polecat/` for `polecat/nux`
    #[serde(default = "default_worker_branch_prefix")]
    pub worker_branch_prefix: String,

    /// Directory holding the liveness marker
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Directory holding worker worktrees, `<dir>/<worker>`
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,
}

fn default_rig_name() -> String {
    "rig".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_worker_branch_prefix() -> String {
    "polecat/".to_string()
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(".refinery")
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from("polecats")
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            name: default_rig_name(),
            repo_path: default_repo_path(),
            default_branch: default_branch(),
            worker_branch_prefix: default_worker_branch_prefix(),
            runtime_dir: default_runtime_dir(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

impl RigConfig {
    /// Mail address of a role in this rig, e.g. `gastown/refinery`.
    pub fn role_address(&self, role: &str) -> String {
        format!("{}/{role}", self.name)
    }

    /// Mail address of a worker in this rig.
    pub fn worker_address(&self, worker: &str) -> String {
        format!("{}/{worker}", self.name)
    }

    /// Source branch a worker conventionally pushes to.
    pub fn worker_branch(&self, worker: &str) -> String {
        format!("{}{worker}", self.worker_branch_prefix)
    }
}

/// Processing daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DaemonConfig {
    /// Safety-net timer interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Role name of the coordinator that owns the daemon
    #[serde(default = "default_coordinator_role")]
    pub coordinator_role: String,

    /// Role name of the supervisor that receives outcomes
    #[serde(default = "default_supervisor_role")]
    pub supervisor_role: String,

    /// Mailbox unrecognized messages are forwarded to
    #[serde(default = "default_overseer_address")]
    pub overseer_address: String,

    /// Install OS signal handlers for termination and wakeup
    #[serde(default = "default_true")]
    pub handle_os_signals: bool,
}

const fn default_poll_interval_secs() -> u64 {
    30
}

fn default_coordinator_role() -> String {
    "refinery".to_string()
}

fn default_supervisor_role() -> String {
    "witness".to_string()
}

fn default_overseer_address() -> String {
    "mayor/".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            coordinator_role: default_coordinator_role(),
            supervisor_role: default_supervisor_role(),
            overseer_address: default_overseer_address(),
            handle_os_signals: true,
        }
    }
}

/// Priority scoring weights
///
/// All weights must be non-negative; the scorer is monotonic in each input
/// only under that condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScoringWeights {
    #[serde(default = "default_base")]
    pub base: f64,

    /// Added per tier of urgency above the least urgent tier
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,

    /// Least urgent tier; higher tiers are clamped to it
    #[serde(default = "default_max_tier")]
    pub max_tier: u8,

    #[serde(default = "default_age_weight_per_hour")]
    pub age_weight_per_hour: f64,

    #[serde(default = "default_retry_weight")]
    pub retry_weight: f64,

    /// Retries beyond this count add nothing
    #[serde(default = "default_max_retry_boost_count")]
    pub max_retry_boost_count: u32,

    #[serde(default = "default_convoy_age_weight_per_hour")]
    pub convoy_age_weight_per_hour: f64,
}

const fn default_base() -> f64 {
    1000.0
}

const fn default_priority_weight() -> f64 {
    100.0
}

const fn default_max_tier() -> u8 {
    4
}

const fn default_age_weight_per_hour() -> f64 {
    1.0
}

const fn default_retry_weight() -> f64 {
    10.0
}

const fn default_max_retry_boost_count() -> u32 {
    30
}

const fn default_convoy_age_weight_per_hour() -> f64 {
    10.0
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: default_base(),
            priority_weight: default_priority_weight(),
            max_tier: default_max_tier(),
            age_weight_per_hour: default_age_weight_per_hour(),
            retry_weight: default_retry_weight(),
            max_retry_boost_count: default_max_retry_boost_count(),
            convoy_age_weight_per_hour: default_convoy_age_weight_per_hour(),
        }
    }
}

/// Reference git merge engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Remote fetched from and pushed to
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Shell command run after a clean merge; failure rejects the merge
    #[serde(default)]
    pub test_command: Option<String>,

    /// Push the target branch after a successful merge
    #[serde(default = "default_true")]
    pub push: bool,

    /// Fetch the remote before each merge
    #[serde(default = "default_true")]
    pub fetch: bool,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            test_command: None,
            push: true,
            fetch: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".refinery/refinery.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
