use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// What a traced process that is still running at the poll ceiling means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutPolicy {
    /// Kill it and treat the dependencies as resolved.
    AssumeResolved,
    /// Kill it and fail the session.
    Fail,
}

/// What to do when a traced path has no counterpart on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Base image; `None` means `<host flavor>:latest`.
    pub image: Option<String>,
    pub tracer: String,
    pub syscalls: Vec<String>,
    pub poll_interval_ms: u64,
    pub poll_ceiling: u32,
    pub max_iterations: u32,
    pub on_timeout: TimeoutPolicy,
    pub missing_on_host: MissingPolicy,
    pub sandbox_bin_dir: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            image: None,
            tracer: "strace".to_string(),
            syscalls: ["open", "openat", "access", "stat"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            poll_interval_ms: 1000,
            poll_ceiling: 30,
            max_iterations: 16,
            on_timeout: TimeoutPolicy::AssumeResolved,
            missing_on_host: MissingPolicy::Fail,
            sandbox_bin_dir: "/usr/bin".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on how long one trace may run before it is force-terminated.
    /// Saturates at `Duration::MAX`.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval().saturating_mul(self.poll_ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl FromStr for TimeoutPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "assume-resolved" => Ok(TimeoutPolicy::AssumeResolved),
            "fail" => Ok(TimeoutPolicy::Fail),
            other => Err(UnknownVariant {
                kind: "timeout policy",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail" => Ok(MissingPolicy::Fail),
            "skip" => Ok(MissingPolicy::Skip),
            other => Err(UnknownVariant {
                kind: "missing-dependency policy",
                value: other.to_string(),
            }),
        }
    }
}
