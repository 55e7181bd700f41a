//! Background worker lifecycle configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, validate_timeout, Validatable};

/// Background worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Where the background context runs
    #[serde(default)]
    pub backend: BackendKind,

    /// Worker executable for the process backend (defaults to the current executable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments placed before the worker options when launching `program`
    #[serde(default = "default_program_args")]
    pub program_args: Vec<String>,

    /// How long to wait for the readiness signal after spawning
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_ready_timeout")]
    pub ready_timeout: Duration,

    /// How long to wait for the configuration acknowledgement
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_configure_timeout")]
    pub configure_timeout: Duration,

    /// Optional per-job timeout; a timed out job's late result is discarded
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub job_timeout: Option<Duration>,

    /// Maximum jobs in flight per worker; further submits queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    /// Buffer size of the in-memory pipe used by the thread backend
    #[serde(default = "default_channel_buffer_bytes")]
    pub channel_buffer_bytes: usize,
}

/// Background context backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Dedicated OS thread with its own runtime
    Thread,
    /// Child process speaking the protocol over stdio
    Process,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Thread
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thread" => Ok(BackendKind::Thread),
            "process" => Ok(BackendKind::Process),
            _ => Err(format!("Invalid backend: {}", s)),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program: None,
            program_args: default_program_args(),
            ready_timeout: default_ready_timeout(),
            configure_timeout: default_configure_timeout(),
            job_timeout: None,
            max_in_flight: None,
            channel_buffer_bytes: default_channel_buffer_bytes(),
        }
    }
}

impl Validatable for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_timeout(self.ready_timeout, "ready_timeout", self.domain_name())?;
        validate_timeout(self.configure_timeout, "configure_timeout", self.domain_name())?;

        if let Some(timeout) = self.job_timeout {
            validate_timeout(timeout, "job_timeout", self.domain_name())?;
        }

        if let Some(limit) = self.max_in_flight {
            validate_positive(limit, "max_in_flight", self.domain_name())?;
        }

        if let Some(ref program) = self.program {
            validate_required_string(program, "program", self.domain_name())?;
        }

        if self.channel_buffer_bytes < 1024 {
            return Err(self.validation_error(format!(
                "channel_buffer_bytes must be at least 1024, got {}",
                self.channel_buffer_bytes
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "worker"
    }
}

// Default value functions
fn default_program_args() -> Vec<String> {
    vec!["worker".to_string()]
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_configure_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_buffer_bytes() -> usize {
    256 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.backend, BackendKind::Thread);
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.program_args, vec!["worker".to_string()]);
        assert!(config.job_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_config_validation() {
        let mut config = WorkerConfig::default();
        config.max_in_flight = Some(0);
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.ready_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.channel_buffer_bytes = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_second_timeouts_are_valid() {
        let config = WorkerConfig {
            job_timeout: Some(Duration::from_millis(500)),
            ready_timeout: Duration::from_millis(250),
            configure_timeout: Duration::from_millis(750),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = WorkerConfig {
            job_timeout: Some(Duration::ZERO),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(BackendKind::from_str("Process").unwrap(), BackendKind::Process);
        assert_eq!(BackendKind::from_str("thread").unwrap(), BackendKind::Thread);
        assert!(BackendKind::from_str("wasm").is_err());
    }
}
