//! Configuration loading and environment variable handling

use crate::domains::utils::duration_from_secs;
use crate::domains::ChunkWorkerConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with the default `CHUNKWORKER` prefix
    pub fn new() -> Self {
        Self {
            prefix: "CHUNKWORKER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ChunkWorkerConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml(&self, content: &str) -> ConfigResult<ChunkWorkerConfig> {
        let mut config: ChunkWorkerConfig = if content.trim().is_empty() {
            ChunkWorkerConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ChunkWorkerConfig> {
        let mut config = ChunkWorkerConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ChunkWorkerConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ChunkWorkerConfig) -> ConfigResult<()> {
        self.apply_worker_overrides(&mut config.worker)?;
        self.apply_module_overrides(&mut config.module);
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_worker_overrides(
        &self,
        config: &mut crate::domains::worker::WorkerConfig,
    ) -> ConfigResult<()> {
        if let Ok(backend) = self.get_env_var("BACKEND") {
            config.backend = crate::domains::worker::BackendKind::from_str(&backend)
                .map_err(|e| self.env_error("BACKEND", e))?;
        }

        if let Ok(program) = self.get_env_var("WORKER_PROGRAM") {
            config.program = Some(program);
        }

        if let Ok(timeout) = self.get_env_var("READY_TIMEOUT") {
            config.ready_timeout = self.parse_seconds("READY_TIMEOUT", &timeout)?;
        }

        if let Ok(timeout) = self.get_env_var("CONFIGURE_TIMEOUT") {
            config.configure_timeout = self.parse_seconds("CONFIGURE_TIMEOUT", &timeout)?;
        }

        if let Ok(timeout) = self.get_env_var("JOB_TIMEOUT") {
            config.job_timeout = Some(self.parse_seconds("JOB_TIMEOUT", &timeout)?);
        }

        if let Ok(limit) = self.get_env_var("MAX_IN_FLIGHT") {
            config.max_in_flight = Some(
                limit
                    .parse()
                    .map_err(|e: std::num::ParseIntError| self.env_error("MAX_IN_FLIGHT", e.to_string()))?,
            );
        }

        Ok(())
    }

    fn apply_module_overrides(&self, config: &mut crate::domains::module::ModuleConfig) {
        if let Ok(code) = self.get_env_var("MODULE_CODE") {
            config.code = code;
        }

        if let Ok(binary) = self.get_env_var("MODULE_BINARY") {
            config.binary = if binary.is_empty() { None } else { Some(binary) };
        }
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|e| self.env_error("LOG_LEVEL", e))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|e| self.env_error("LOG_FORMAT", e))?;
        }

        if let Ok(level) = self.get_env_var("WORKER_LOG_LEVEL") {
            config.worker_level = Some(
                crate::domains::logging::LogLevel::from_str(&level)
                    .map_err(|e| self.env_error("WORKER_LOG_LEVEL", e))?,
            );
        }

        Ok(())
    }

    fn parse_seconds(&self, name: &str, value: &str) -> ConfigResult<Duration> {
        let secs: f64 = value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| self.env_error(name, e.to_string()))?;
        duration_from_secs(secs).map_err(|e| self.env_error(name, e))
    }

    fn env_error(&self, name: &str, reason: String) -> ConfigError {
        ConfigError::InvalidEnv {
            variable: format!("{}_{}", self.prefix, name),
            reason,
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
