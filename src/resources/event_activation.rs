// EventActivation - provenance object for event-producing services

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::ResourceError;
use crate::model::{ApplicationName, InstanceId, Namespace};

const KIND: &str = "EventActivation";

/// Links an application's events into a namespace.
///
/// Named after the application service ID, one per namespace. `owner` is the
/// service instance whose provisioning created (or last adopted) the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActivation {
    pub name: String,
    pub namespace: Namespace,
    pub display_name: String,
    pub source_id: ApplicationName,
    pub owner: InstanceId,
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait EventActivationClient: Send + Sync {
    /// Fails with `ResourceError::AlreadyExists` when the name is taken in the namespace
    async fn create(&self, activation: &EventActivation) -> Result<EventActivation, ResourceError>;

    async fn get(&self, namespace: &Namespace, name: &str) -> Result<EventActivation, ResourceError>;

    async fn update(&self, activation: &EventActivation) -> Result<EventActivation, ResourceError>;

    async fn delete(&self, namespace: &Namespace, name: &str) -> Result<(), ResourceError>;
}

fn not_found(namespace: &Namespace, name: &str) -> ResourceError {
    ResourceError::NotFound {
        kind: KIND,
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventActivationClient {
    activations: RwLock<HashMap<(Namespace, String), EventActivation>>,
}

impl InMemoryEventActivationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self, namespace: &Namespace) -> Vec<EventActivation> {
        let mut found: Vec<EventActivation> = self
            .activations
            .read()
            .await
            .values()
            .filter(|ea| &ea.namespace == namespace)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

#[async_trait]
impl EventActivationClient for InMemoryEventActivationClient {
    async fn create(&self, activation: &EventActivation) -> Result<EventActivation, ResourceError> {
        let key = (activation.namespace.clone(), activation.name.clone());
        let mut activations = self.activations.write().await;
        if activations.contains_key(&key) {
            return Err(ResourceError::AlreadyExists {
                kind: KIND,
                name: activation.name.clone(),
                namespace: activation.namespace.to_string(),
            });
        }
        debug!(name = %activation.name, namespace = %activation.namespace, "Created EventActivation");
        activations.insert(key, activation.clone());
        Ok(activation.clone())
    }

    async fn get(&self, namespace: &Namespace, name: &str) -> Result<EventActivation, ResourceError> {
        self.activations
            .read()
            .await
            .get(&(namespace.clone(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn update(&self, activation: &EventActivation) -> Result<EventActivation, ResourceError> {
        let mut activations = self.activations.write().await;
        let stored = activations
            .get_mut(&(activation.namespace.clone(), activation.name.clone()))
            .ok_or_else(|| not_found(&activation.namespace, &activation.name))?;
        *stored = activation.clone();
        Ok(activation.clone())
    }

    async fn delete(&self, namespace: &Namespace, name: &str) -> Result<(), ResourceError> {
        self.activations
            .write()
            .await
            .remove(&(namespace.clone(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(namespace, name))
    }
}
