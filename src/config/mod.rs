//! Configuration loading and management
//!
//! Engine-wide settings come from YAML. Every key is optional; missing
//! keys take the defaults below.
//!
//! ```yaml
//! api_prefix: /api
//! max_depth:
//!   enabled: true
//!   default_depth: 2
//! return_id_on_depth_stop: true
//! flatten_singleton_to_iri: true
//! max_nesting: 16
//! pagination:
//!   items_per_page: 30
//!   max_items_per_page: 100
//!   client_items_per_page: true
//! validation_timeout_ms: 5000
//! ```

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global depth-limiting policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxDepthConfig {
    pub enabled: bool,
    /// How many times a table may occur along one nesting path
    pub default_depth: u32,
}

impl Default for MaxDepthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_depth: 2,
        }
    }
}

/// Collection paging defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub items_per_page: usize,
    pub max_items_per_page: usize,
    /// Whether clients may pick `itemsPerPage`
    pub client_items_per_page: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            items_per_page: 30,
            max_items_per_page: 100,
            client_items_per_page: true,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposeConfig {
    /// Prefix of every route and IRI
    pub api_prefix: String,

    pub max_depth: MaxDepthConfig,

    /// Emit the identifier of relations cut by the depth guard
    pub return_id_on_depth_stop: bool,

    /// Render identifier-only nested objects as their IRI string
    pub flatten_singleton_to_iri: bool,

    /// Hard nesting ceiling, applied even when depth limiting is disabled
    pub max_nesting: usize,

    pub pagination: PaginationConfig,

    /// Budget for the class-level validators of one write
    pub validation_timeout_ms: u64,
}

impl Default for ExposeConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            max_depth: MaxDepthConfig::default(),
            return_id_on_depth_stop: true,
            flatten_singleton_to_iri: true,
            max_nesting: 16,
            pagination: PaginationConfig::default(),
            validation_timeout_ms: 5000,
        }
    }
}

impl ExposeConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::IoError {
                message: e.to_string(),
            },
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            file: Some(path.display().to_string()),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            file: None,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay a YAML document on top of this configuration
    ///
    /// Mappings merge key by key, any other value replaces the current one.
    pub fn merge_yaml(&self, overlay: &str) -> Result<Self, ConfigError> {
        let parse = |e: serde_yaml::Error| ConfigError::ParseError {
            file: None,
            message: e.to_string(),
        };
        let mut base = serde_yaml::to_value(self).map_err(parse)?;
        let overlay: serde_yaml::Value = serde_yaml::from_str(overlay).map_err(parse)?;
        merge_values(&mut base, overlay);
        let merged: Self = serde_yaml::from_value(base).map_err(parse)?;
        merged.validate()?;
        Ok(merged)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth.default_depth == 0 {
            return Err(invalid("max_depth.default_depth", "0", "must be at least 1"));
        }
        if self.max_nesting == 0 {
            return Err(invalid("max_nesting", "0", "must be at least 1"));
        }
        let pagination = &self.pagination;
        if pagination.items_per_page == 0 || pagination.items_per_page > pagination.max_items_per_page {
            return Err(invalid(
                "pagination.items_per_page",
                &pagination.items_per_page.to_string(),
                "must be between 1 and pagination.max_items_per_page",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
