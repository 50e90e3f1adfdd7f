//! Capability registry - maps capability names to plugin endpoints
//!
//! Read-only for the lifetime of a session; shared behind an `Arc`.

use std::collections::HashMap;

use crate::core::config::CapabilityConfig;
use crate::core::{PluginError, ToolDefinition};

/// One capability served by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub name: String,
    pub endpoint: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: serde_json::Value,
    /// Declared result schema
    pub result_schema: Option<serde_json::Value>,
}

impl Capability {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            description: String::new(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            result_schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_result_schema(mut self, schema: serde_json::Value) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Tool definition advertised to the LLM
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl From<&CapabilityConfig> for Capability {
    fn from(config: &CapabilityConfig) -> Self {
        Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            description: config.description.clone(),
            parameters: config.parameters.clone(),
            result_schema: config.result_schema.clone(),
        }
    }
}

/// Registry of available capabilities
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the capability table
    pub fn from_config(configs: &[CapabilityConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Capability::from(config));
        }
        registry
    }

    /// Register a capability, replacing any with the same name
    pub fn register(&mut self, capability: Capability) {
        self.capabilities.insert(capability.name.clone(), capability);
    }

    /// Builder-style registration
    pub fn with(mut self, capability: Capability) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Resolve a capability the caller is permitted to use
    pub fn resolve(&self, name: &str, permitted: &[String]) -> Result<&Capability, PluginError> {
        if !permitted.iter().any(|p| p == name) {
            return Err(PluginError::CapabilityNotFound(name.to_string()));
        }
        self.get(name)
            .ok_or_else(|| PluginError::CapabilityNotFound(name.to_string()))
    }

    /// Tool definitions for the permitted capabilities, in permitted order
    pub fn tool_definitions(&self, permitted: &[String]) -> Vec<ToolDefinition> {
        permitted
            .iter()
            .filter_map(|name| self.get(name))
            .map(Capability::definition)
            .collect()
    }
}
