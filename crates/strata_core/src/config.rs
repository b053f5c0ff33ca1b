//! Schema configuration

use crate::allocator::Allocator;
use crate::component::{ComponentError, ElementShape, ElementType};
use crate::scheme::{ClassId, ComponentSpec, SchemeError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error(transparent)]
    Capacity(#[from] ComponentError),
}

/// One declared column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    pub dtype: ElementType,
    /// Elements per row; 1 means scalar.
    #[serde(default = "default_arity")]
    pub arity: usize,
}

fn default_arity() -> usize {
    1
}

impl ComponentConfig {
    pub fn spec(&self) -> ComponentSpec {
        let shape = if self.arity == 1 {
            ElementShape::Scalar(self.dtype)
        } else {
            ElementShape::Vector(self.dtype, self.arity)
        };
        ComponentSpec::new(self.name.clone(), shape)
    }
}

/// Allocator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    pub components: Vec<ComponentConfig>,
    /// Class presence flags, one entry per component, in section order.
    pub scheme: Vec<Vec<u8>>,
    #[serde(default)]
    pub initial_capacity: usize,
}

impl StrataConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn component_specs(&self) -> Vec<ComponentSpec> {
        self.components.iter().map(ComponentConfig::spec).collect()
    }

    pub fn classes(&self) -> Vec<ClassId> {
        self.scheme.iter().map(|flags| ClassId::from_flags(flags)).collect()
    }
}

impl Allocator {
    /// Build an allocator from settings, pre-sizing every column.
    pub fn from_config(config: &StrataConfig) -> Result<Self, ConfigError> {
        let mut allocator = Allocator::new(config.component_specs(), config.classes())?;
        if config.initial_capacity > 0 {
            allocator.reserve(config.initial_capacity)?;
        }
        Ok(allocator)
    }
}
