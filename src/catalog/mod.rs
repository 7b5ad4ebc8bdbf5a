// Application catalog lookup
//
// Resolves an application service ID to the application that exposes it. The
// broker needs the owning application for the mapping name the access gate
// waits for and for the event/API provider flags of the service.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{Application, ApplicationName, ApplicationServiceId};
use crate::storage::StorageError;

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApplicationFinder: Send + Sync {
    /// Application exposing the given service, `None` when no application does
    async fn find_one_by_service_id(
        &self,
        id: &ApplicationServiceId,
    ) -> Result<Option<Application>, StorageError>;
}

/// Applications registered in process, keyed by name
#[derive(Debug, Default)]
pub struct InMemoryApplicationRegistry {
    applications: RwLock<HashMap<ApplicationName, Application>>,
}

impl InMemoryApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applications(applications: impl IntoIterator<Item = Application>) -> Self {
        let map = applications
            .into_iter()
            .map(|app| (app.name.clone(), app))
            .collect();
        Self {
            applications: RwLock::new(map),
        }
    }

    /// Register or replace an application
    pub async fn register(&self, application: Application) {
        debug!(application = %application.name, services = application.services.len(), "Registering application");
        self.applications
            .write()
            .await
            .insert(application.name.clone(), application);
    }

    pub async fn unregister(&self, name: &ApplicationName) -> Option<Application> {
        self.applications.write().await.remove(name)
    }

    pub async fn list(&self) -> Vec<Application> {
        let mut apps: Vec<Application> = self.applications.read().await.values().cloned().collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }
}

#[async_trait]
impl ApplicationFinder for InMemoryApplicationRegistry {
    async fn find_one_by_service_id(
        &self,
        id: &ApplicationServiceId,
    ) -> Result<Option<Application>, StorageError> {
        let applications = self.applications.read().await;
        let mut owners: Vec<&Application> = applications
            .values()
            .filter(|app| app.service(id).is_some())
            .collect();
        owners.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(owners.first().map(|app| (*app).clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Service;

    fn fix_application(name: &str, service: &str) -> Application {
        Application {
            name: name.into(),
            description: String::new(),
            services: vec![Service {
                id: service.into(),
                display_name: format!("{service} display"),
                event_provider: true,
                api_provider: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_find_by_service_id() {
        let registry = InMemoryApplicationRegistry::new();
        registry.register(fix_application("ec-prod", "svc-1")).await;
        registry.register(fix_application("crm", "svc-2")).await;

        let found = registry
            .find_one_by_service_id(&"svc-2".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name.as_str(), "crm");

        let missing = registry.find_one_by_service_id(&"nope".into()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_unregister_hides_services() {
        let registry = InMemoryApplicationRegistry::with_applications([fix_application("ec-prod", "svc-1")]);
        registry.unregister(&"ec-prod".into()).await;

        assert!(registry
            .find_one_by_service_id(&"svc-1".into())
            .await
            .unwrap()
            .is_none());
        assert!(registry.list().await.is_empty());
    }
}
