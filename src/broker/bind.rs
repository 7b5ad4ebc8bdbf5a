// Bind

use std::sync::Arc;
use tracing::debug;

use super::errors::BrokerError;
use super::types::{BindRequest, BindResponse};
use crate::resources::{ApiPackageCredentials, Credentials};
use crate::storage::InstanceStorage;

#[derive(Clone)]
pub struct BindService {
    instances: Arc<dyn InstanceStorage>,
    credentials: Arc<dyn ApiPackageCredentials>,
    api_packages_support: bool,
}

impl BindService {
    pub fn new(
        instances: Arc<dyn InstanceStorage>,
        credentials: Arc<dyn ApiPackageCredentials>,
        api_packages_support: bool,
    ) -> Self {
        Self {
            instances,
            credentials,
            api_packages_support,
        }
    }

    /// Credentials of the bound instance. Without API packages, and for
    /// services that never had credentials issued, the map is empty.
    pub async fn bind(&self, req: &BindRequest) -> Result<BindResponse, BrokerError> {
        let instance = self.instances.get(&req.instance_id).await.map_err(|e| {
            if e.is_not_found() {
                BrokerError::InstanceNotFound {
                    instance_id: req.instance_id.clone(),
                }
            } else {
                BrokerError::storage("while getting instance from storage", e)
            }
        })?;

        if !self.api_packages_support {
            return Ok(BindResponse {
                credentials: Credentials::new(),
            });
        }

        let credentials = match self
            .credentials
            .get_credentials(&instance.service_id, &instance.service_plan_id, &instance.id)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) if e.is_not_found() => {
                debug!(instance_id = %instance.id, binding_id = %req.binding_id, "No API package credentials for instance");
                Credentials::new()
            }
            Err(e) => return Err(BrokerError::resource("while getting API package credentials", e)),
        };

        Ok(BindResponse { credentials })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instance, InstanceState};
    use crate::resources::InMemoryCredentialStore;
    use crate::storage::InMemoryInstanceStorage;
    use serde_json::Map;

    fn fix_request() -> BindRequest {
        BindRequest {
            instance_id: "i-1".into(),
            binding_id: "b-1".to_string(),
            service_id: "app".into(),
            plan_id: "pkg".into(),
        }
    }

    async fn seeded_instances() -> Arc<InMemoryInstanceStorage> {
        let instances = Arc::new(InMemoryInstanceStorage::new());
        instances
            .insert(&Instance {
                id: "i-1".into(),
                namespace: "ns-a".into(),
                service_id: "app".into(),
                service_plan_id: "pkg".into(),
                state: InstanceState::Succeeded,
                params_hash: String::new(),
            })
            .await
            .unwrap();
        instances
    }

    #[tokio::test]
    async fn test_bind_requires_instance() {
        let svc = BindService::new(
            Arc::new(InMemoryInstanceStorage::new()),
            Arc::new(InMemoryCredentialStore::new()),
            true,
        );
        assert!(svc.bind(&fix_request()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_bind_returns_issued_credentials() {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        credentials
            .ensure_credentials(&"app".into(), &"pkg".into(), &"i-1".into(), &Map::new())
            .await
            .unwrap();
        let svc = BindService::new(seeded_instances().await, credentials, true);

        let resp = svc.bind(&fix_request()).await.unwrap();
        assert!(resp.credentials.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn test_legacy_bind_is_empty() {
        let svc = BindService::new(
            seeded_instances().await,
            Arc::new(InMemoryCredentialStore::new()),
            false,
        );
        assert!(svc.bind(&fix_request()).await.unwrap().credentials.is_empty());
    }
}
