//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Locator schemes a module loader understands
pub const SUPPORTED_LOCATOR_SCHEMES: &[&str] = &["file", "http", "https", "builtin"];

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate a timeout: any non-zero duration, including sub-second ones
pub fn validate_timeout(value: std::time::Duration, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0", field_name),
        });
    }
    Ok(())
}

/// Validate a module locator: a plain path, or a URL with a supported scheme
pub fn validate_locator(locator: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(locator, field_name, domain)?;

    if !locator.contains("://") && !locator.starts_with("builtin:") {
        return Ok(());
    }

    let parsed = url::Url::parse(locator).map_err(|e| ConfigError::DomainError {
        domain: domain.to_string(),
        message: format!("{} has invalid locator format: {}", field_name, e),
    })?;

    if !SUPPORTED_LOCATOR_SCHEMES.contains(&parsed.scheme()) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} uses unsupported scheme '{}', expected one of: {}",
                field_name,
                parsed.scheme(),
                SUPPORTED_LOCATOR_SCHEMES.join(", ")
            ),
        });
    }

    Ok(())
}
