// API package credentials issued per service instance

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::ResourceError;
use crate::model::{InstanceId, ServiceId, ServicePlanId};

const KIND: &str = "ApiPackageCredentials";

/// Credential key/value pairs handed out by Bind
pub type Credentials = Map<String, Value>;

/// Credential issuer for API packages. The package is addressed by the
/// service ID of the application and the plan ID of the package.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApiPackageCredentials: Send + Sync {
    /// Idempotent: an existing credential for the instance is kept
    async fn ensure_credentials(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
        params: &Map<String, Value>,
    ) -> Result<(), ResourceError>;

    /// Succeeds when no credential exists
    async fn ensure_credentials_deleted(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
    ) -> Result<(), ResourceError>;

    async fn get_credentials(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
    ) -> Result<Credentials, ResourceError>;
}

type CredentialKey = (ServiceId, ServicePlanId, InstanceId);

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<CredentialKey, Credentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.credentials.read().await.is_empty()
    }
}

fn key(service_id: &ServiceId, plan_id: &ServicePlanId, instance_id: &InstanceId) -> CredentialKey {
    (service_id.clone(), plan_id.clone(), instance_id.clone())
}

#[async_trait]
impl ApiPackageCredentials for InMemoryCredentialStore {
    async fn ensure_credentials(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
        params: &Map<String, Value>,
    ) -> Result<(), ResourceError> {
        let mut credentials = self.credentials.write().await;
        let entry = credentials.entry(key(service_id, plan_id, instance_id));
        if let std::collections::hash_map::Entry::Vacant(slot) = entry {
            let mut issued = Credentials::new();
            issued.insert("client_id".to_string(), Value::String(instance_id.to_string()));
            issued.insert(
                "client_secret".to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
            issued.insert("package".to_string(), Value::String(plan_id.to_string()));
            if !params.is_empty() {
                issued.insert("parameters".to_string(), Value::Object(params.clone()));
            }
            slot.insert(issued);
            info!(instance_id = %instance_id, package = %plan_id, "Issued API package credentials");
        } else {
            debug!(instance_id = %instance_id, package = %plan_id, "API package credentials already present");
        }
        Ok(())
    }

    async fn ensure_credentials_deleted(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
    ) -> Result<(), ResourceError> {
        let removed = self
            .credentials
            .write()
            .await
            .remove(&key(service_id, plan_id, instance_id));
        if removed.is_some() {
            info!(instance_id = %instance_id, package = %plan_id, "Revoked API package credentials");
        }
        Ok(())
    }

    async fn get_credentials(
        &self,
        service_id: &ServiceId,
        plan_id: &ServicePlanId,
        instance_id: &InstanceId,
    ) -> Result<Credentials, ResourceError> {
        self.credentials
            .read()
            .await
            .get(&key(service_id, plan_id, instance_id))
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                kind: KIND,
                name: instance_id.to_string(),
                namespace: service_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = InMemoryCredentialStore::new();
        let (svc, plan, iid) = (ServiceId::from("app"), ServicePlanId::from("pkg"), InstanceId::from("i-1"));

        store.ensure_credentials(&svc, &plan, &iid, &Map::new()).await.unwrap();
        let first = store.get_credentials(&svc, &plan, &iid).await.unwrap();
        store.ensure_credentials(&svc, &plan, &iid, &Map::new()).await.unwrap();
        let second = store.get_credentials(&svc, &plan, &iid).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
        assert_eq!(first["client_id"], Value::String("i-1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_missing_credentials_succeeds() {
        let store = InMemoryCredentialStore::new();
        let (svc, plan, iid) = (ServiceId::from("app"), ServicePlanId::from("pkg"), InstanceId::from("i-1"));

        store.ensure_credentials_deleted(&svc, &plan, &iid).await.unwrap();
        store.ensure_credentials(&svc, &plan, &iid, &Map::new()).await.unwrap();
        store.ensure_credentials_deleted(&svc, &plan, &iid).await.unwrap();

        assert!(store.is_empty().await);
        let err = store.get_credentials(&svc, &plan, &iid).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
