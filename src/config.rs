//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - planshare.toml (default configuration)
//! - planshare.local.toml (git-ignored local overrides)
//! - Environment variables (PLANSHARE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # planshare.toml
//! [merge]
//! skip_failed_scripts = true
//!
//! [rewrite]
//! max_iterations = 64
//! rule_sets = [["merge_identical"], ["combine_projections", "combine_filters"]]
//!
//! [matcher]
//! min_subplan_size = 3
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! PLANSHARE_REWRITE__MAX_ITERATIONS=128
//! PLANSHARE_LOGGING__FORMAT=json
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plan merging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Record a failed script and continue with the rest of the batch;
    /// when false the first failure aborts the run
    #[serde(default = "default_true")]
    pub skip_failed_scripts: bool,

    /// Name given to the merged plan
    #[serde(default = "default_plan_name")]
    pub plan_name: String,
}

/// Rewrite engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Passes over all rule sets before giving up on a fixpoint
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Rule sets in application order; each set lists rule names
    #[serde(default = "default_rule_sets")]
    pub rule_sets: Vec<Vec<String>>,
}

/// Common-subplan matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Smallest subplan (in operators) kept in the report
    #[serde(default = "default_min_subplan_size")]
    pub min_subplan_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

fn default_true() -> bool {
    true
}
fn default_plan_name() -> String {
    "merged".to_string()
}
fn default_max_iterations() -> usize {
    32
}
fn default_rule_sets() -> Vec<Vec<String>> {
    vec![
        vec!["merge_identical".to_string()],
        vec![
            "combine_projections".to_string(),
            "combine_filters".to_string(),
        ],
    ]
}
fn default_min_subplan_size() -> usize {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. planshare.toml (base configuration)
    /// 2. planshare.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (PLANSHARE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("planshare.toml"))
            .merge(Toml::file("planshare.local.toml"))
            .merge(Env::prefixed("PLANSHARE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PLANSHARE_").split("__"))
            .extract()
    }

    /// Create default configuration
    pub fn default() -> Self {
        Config {
            merge: MergeConfig::default(),
            rewrite: RewriteConfig::default(),
            matcher: MatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            skip_failed_scripts: true,
            plan_name: default_plan_name(),
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig {
            enabled: true,
            max_iterations: default_max_iterations(),
            rule_sets: default_rule_sets(),
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            enabled: true,
            min_subplan_size: default_min_subplan_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}
