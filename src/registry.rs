//! Registry of downstream services known to the dispatcher

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::models::ServiceEndpoint;
use std::sync::Arc;

/// Ordered, name-addressable set of endpoints
///
/// Cloning is cheap; endpoints are shared and never mutated.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    endpoints: Arc<Vec<ServiceEndpoint>>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting duplicate names
    pub fn new(endpoints: Vec<ServiceEndpoint>) -> Result<Self> {
        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoints[..i].iter().any(|e| e.name() == endpoint.name()) {
                return Err(MeshError::ConfigError(format!(
                    "duplicate service name '{}'",
                    endpoint.name()
                )));
            }
        }

        Ok(ServiceRegistry {
            endpoints: Arc::new(endpoints),
        })
    }

    pub fn from_config(config: &MeshConfig) -> Result<Self> {
        Self::new(config.endpoints()?)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    /// Endpoints in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.endpoints.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
