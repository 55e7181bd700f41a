//! Executable module source configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{validate_locator, Validatable};

/// Where the background context loads its module from
///
/// With only `code` set the artifact is self-initializing: it carries any
/// binary resource inline. Setting `binary` selects the externally-linked
/// variant, where the resource is fetched separately and bound to the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Locator of the module artifact
    #[serde(default = "default_code_locator")]
    pub code: String,

    /// Locator of a separately fetched binary resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

impl ModuleConfig {
    pub fn is_externally_linked(&self) -> bool {
        self.binary.is_some()
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            code: default_code_locator(),
            binary: None,
        }
    }
}

impl Validatable for ModuleConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_locator(&self.code, "code", self.domain_name())?;

        if let Some(ref binary) = self.binary {
            validate_locator(binary, "binary", self.domain_name())?;
            if binary.starts_with("builtin:") {
                return Err(self.validation_error("binary cannot be a builtin locator"));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "module"
    }
}

fn default_code_locator() -> String {
    "builtin:terrain".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_config_defaults() {
        let config = ModuleConfig::default();
        assert_eq!(config.code, "builtin:terrain");
        assert!(!config.is_externally_linked());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_module_config_validation() {
        let config = ModuleConfig {
            code: "modules/terrain.json".to_string(),
            binary: Some("builtin:palette".to_string()),
        };
        assert!(config.validate().is_err());

        let config = ModuleConfig {
            code: "modules/terrain.json".to_string(),
            binary: Some("modules/palette.bin".to_string()),
        };
        assert!(config.is_externally_linked());
        assert!(config.validate().is_ok());
    }
}
