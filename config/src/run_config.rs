//! `RunConfig`: the options a controller run is parameterised by.
//!
//! Values come from (lowest to highest priority) built-in defaults, the `[run]` table of the XDG
//! `config.toml`, and `<APP>_<FIELD>` environment variables (which `.env` may have populated via
//! [`crate::load_and_apply`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid combination of run options.
#[derive(Debug, Error, PartialEq)]
pub enum RunConfigError {
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        min: usize,
        value: usize,
    },
    #[error("keep_threshold ({keep}) must be greater than retry_threshold ({retry})")]
    ThresholdOrder { keep: f64, retry: f64 },
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("budget_limit must not be negative, got {0}")]
    NegativeBudget(f64),
    #[error("acceptance_threshold must be within [0, 1], got {0}")]
    AcceptanceOutOfRange(f64),
    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride { key: String, value: String },
}

/// Options for one run of a graph of operations.
///
/// `num_branches`, `keep_n`, the thresholds and `max_retries` shape the graphs built by the
/// pipeline helpers; `concurrency_limit`, `budget_limit` and `call_timeout_secs` are enforced by
/// the controller for every capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Samples generated per parent thought.
    pub num_branches: usize,
    /// Thoughts kept per branch by KeepBestN.
    pub keep_n: usize,
    /// Score at or above which a thought is kept without retry.
    pub keep_threshold: f64,
    /// Score at or above which (and below `keep_threshold`) a thought gets another attempt.
    pub retry_threshold: f64,
    /// Upper bound on regenerations per branch.
    pub max_retries: u32,
    /// Capability calls allowed in flight at once, across the whole run.
    pub concurrency_limit: usize,
    /// Cost ceiling; `None` means unlimited.
    pub budget_limit: Option<f64>,
    /// Per-call timeout in seconds.
    pub call_timeout_secs: u64,
    /// Minimum similarity for a fuzzy label match to count.
    pub acceptance_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_branches: 1,
            keep_n: 1,
            keep_threshold: 0.8,
            retry_threshold: 0.5,
            max_retries: 2,
            concurrency_limit: 4,
            budget_limit: None,
            call_timeout_secs: 60,
            acceptance_threshold: 0.7,
        }
    }
}

impl RunConfig {
    /// Checks the options are usable together.
    pub fn validate(&self) -> Result<(), RunConfigError> {
        for (field, value) in [
            ("num_branches", self.num_branches),
            ("keep_n", self.keep_n),
            ("concurrency_limit", self.concurrency_limit),
            ("call_timeout_secs", self.call_timeout_secs as usize),
        ] {
            if value < 1 {
                return Err(RunConfigError::TooSmall {
                    field,
                    min: 1,
                    value,
                });
            }
        }
        for (field, value) in [
            ("keep_threshold", self.keep_threshold),
            ("retry_threshold", self.retry_threshold),
            ("acceptance_threshold", self.acceptance_threshold),
        ] {
            if !value.is_finite() {
                return Err(RunConfigError::NotFinite { field, value });
            }
        }
        if self.keep_threshold <= self.retry_threshold {
            return Err(RunConfigError::ThresholdOrder {
                keep: self.keep_threshold,
                retry: self.retry_threshold,
            });
        }
        if let Some(limit) = self.budget_limit {
            if !limit.is_finite() {
                return Err(RunConfigError::NotFinite {
                    field: "budget_limit",
                    value: limit,
                });
            }
            if limit < 0.0 {
                return Err(RunConfigError::NegativeBudget(limit));
            }
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(RunConfigError::AcceptanceOutOfRange(
                self.acceptance_threshold,
            ));
        }
        Ok(())
    }

    /// Applies `<PREFIX>_<FIELD>` overrides read through `lookup` (e.g. `THOUGHTLOOM_BUDGET_LIMIT`).
    ///
    /// An empty `BUDGET_LIMIT` (or `none`) clears the limit.
    pub fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> Result<(), RunConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |field: &str| format!("{}_{}", prefix, field.to_uppercase());

        if let Some(v) = lookup(&key("num_branches")) {
            self.num_branches = parse_override(&key("num_branches"), &v)?;
        }
        if let Some(v) = lookup(&key("keep_n")) {
            self.keep_n = parse_override(&key("keep_n"), &v)?;
        }
        if let Some(v) = lookup(&key("keep_threshold")) {
            self.keep_threshold = parse_override(&key("keep_threshold"), &v)?;
        }
        if let Some(v) = lookup(&key("retry_threshold")) {
            self.retry_threshold = parse_override(&key("retry_threshold"), &v)?;
        }
        if let Some(v) = lookup(&key("max_retries")) {
            self.max_retries = parse_override(&key("max_retries"), &v)?;
        }
        if let Some(v) = lookup(&key("concurrency_limit")) {
            self.concurrency_limit = parse_override(&key("concurrency_limit"), &v)?;
        }
        if let Some(v) = lookup(&key("budget_limit")) {
            let trimmed = v.trim();
            self.budget_limit = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_override(&key("budget_limit"), trimmed)?)
            };
        }
        if let Some(v) = lookup(&key("call_timeout_secs")) {
            self.call_timeout_secs = parse_override(&key("call_timeout_secs"), &v)?;
        }
        if let Some(v) = lookup(&key("acceptance_threshold")) {
            self.acceptance_threshold = parse_override(&key("acceptance_threshold"), &v)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RunConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| RunConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        })
}
