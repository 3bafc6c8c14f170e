use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

/// One declared piece of infrastructure, e.g. an `aws_s3_bucket` named `logs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub properties: Value,
}

/// Structured description of the infrastructure a session asked for.
///
/// A configuration is always replaced as a whole; nothing in this crate patches
/// individual resources in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), resources: Vec::new(), metadata: BTreeMap::new() }
    }

    pub fn with_resource(mut self, resource: ResourceDeclaration) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resource(&self, resource_type: &str, name: &str) -> Option<&ResourceDeclaration> {
        self.resources
            .iter()
            .find(|resource| resource.resource_type == resource_type && resource.name == name)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "configuration name must not be empty".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for resource in &self.resources {
            if resource.resource_type.trim().is_empty() || resource.name.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "resource in configuration `{}` is missing a type or name",
                    self.name
                )));
            }
            if !seen.insert((resource.resource_type.as_str(), resource.name.as_str())) {
                return Err(DomainError::InvariantViolation(format!(
                    "duplicate resource `{}.{}`",
                    resource.resource_type, resource.name
                )));
            }
        }

        Ok(())
    }

    /// Decodes a configuration from model output, tolerating a surrounding
    /// markdown code fence or prose before the first `{`.
    pub fn from_generated_text(text: &str) -> Result<Self, DomainError> {
        let start = text.find('{');
        let end = text.rfind('}');
        let body = match (start, end) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => {
                return Err(DomainError::InvariantViolation(
                    "generated configuration contains no JSON object".to_string(),
                ))
            }
        };

        let configuration: Self = serde_json::from_str(body).map_err(|error| {
            DomainError::InvariantViolation(format!("generated configuration is malformed: {error}"))
        })?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
