use serde::{Deserialize, Serialize};

use super::ids::{ApplicationName, ApplicationServiceId, Namespace};

/// A service exposed by an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ApplicationServiceId,
    pub display_name: String,
    /// Produces events; provisioning creates an EventActivation for it
    #[serde(default)]
    pub event_provider: bool,
    /// Exposes an API package; provisioning issues per-instance credentials
    #[serde(default)]
    pub api_provider: bool,
}

/// Externally registered backend exposing one or more services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: ApplicationName,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Application {
    pub fn service(&self, id: &ApplicationServiceId) -> Option<&Service> {
        self.services.iter().find(|svc| &svc.id == id)
    }
}

/// Grant of an application to a namespace, materialized by the mapping controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationMapping {
    pub application: ApplicationName,
    pub namespace: Namespace,
}
