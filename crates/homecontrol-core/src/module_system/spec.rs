use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::module_system::error::ModuleError;
use crate::module_system::requirement::{Requirement, RequirementError};

/// Display metadata from the `meta` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Declaration of one item a module contributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub cfg: Value,
}

/// A module's declarative spec document.
///
/// ```yaml
/// meta:
///   name: IR Adapter
///   description: Receives infrared codes
/// pip-requirements:
///   - pyserial (>=3.4)
/// items:
///   - id: ir_receiver
///     type: ir_receiver
///     cfg: {port: /dev/ttyUSB0}
/// ```
///
/// Unknown top-level keys are kept in `extra` and readable through
/// [`setting`](ModuleSpec::setting).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    pub meta: ModuleMeta,
    #[serde(rename = "pip-requirements")]
    pub pip_requirements: Vec<String>,
    pub items: Vec<ItemSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleSpec {
    /// Parse a YAML document (JSON documents are accepted as well)
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Read the spec file of module `name`
    pub async fn load(name: &str, path: &Path) -> Result<Self, ModuleError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| ModuleError::io(path, e))?;
        Self::from_yaml(&text).map_err(|e| ModuleError::SpecInvalid {
            name: name.to_string(),
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn requirements(&self) -> Result<Vec<Requirement>, RequirementError> {
        self.pip_requirements
            .iter()
            .map(|raw| Requirement::parse(raw))
            .collect()
    }

    /// Read a top-level setting that is not part of the fixed schema
    pub fn setting<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.extra
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get a setting with default
    pub fn setting_or<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        self.setting(key).unwrap_or(default)
    }
}
