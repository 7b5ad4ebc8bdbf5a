// Application mapping check
//
// Granting an application to a namespace and the controller materializing the
// mapping are eventually consistent, so the check waits a bounded time for the
// mapping to show up. It subscribes before listing so no grant falls between
// the two.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use super::{AccessError, CanProvisionOutput, ProvisionChecker};
use crate::broker::executor::deadline_after;
use crate::catalog::ApplicationFinder;
use crate::model::{ApplicationMapping, ApplicationName, ApplicationServiceId, InstanceId, Namespace};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingEvent {
    Added(ApplicationMapping),
    Removed(ApplicationMapping),
}

/// Namespace-scoped application mappings with a change feed
#[async_trait]
pub trait MappingSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<MappingEvent>;

    async fn list(&self, namespace: &Namespace) -> Result<Vec<ApplicationMapping>, AccessError>;
}

#[derive(Debug)]
pub struct InMemoryMappingRegistry {
    mappings: RwLock<HashSet<ApplicationMapping>>,
    events: broadcast::Sender<MappingEvent>,
}

impl Default for InMemoryMappingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMappingRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mappings: RwLock::new(HashSet::new()),
            events,
        }
    }

    /// Make `application` available in `namespace`
    pub async fn grant(&self, application: &ApplicationName, namespace: &Namespace) {
        let mapping = ApplicationMapping {
            application: application.clone(),
            namespace: namespace.clone(),
        };
        let inserted = self.mappings.write().await.insert(mapping.clone());
        if inserted {
            info!(application = %application, namespace = %namespace, "Application mapping granted");
            // No receivers is fine, nobody is waiting
            let _ = self.events.send(MappingEvent::Added(mapping));
        }
    }

    pub async fn revoke(&self, application: &ApplicationName, namespace: &Namespace) {
        let mapping = ApplicationMapping {
            application: application.clone(),
            namespace: namespace.clone(),
        };
        if self.mappings.write().await.remove(&mapping) {
            info!(application = %application, namespace = %namespace, "Application mapping revoked");
            let _ = self.events.send(MappingEvent::Removed(mapping));
        }
    }
}

#[async_trait]
impl MappingSource for InMemoryMappingRegistry {
    fn subscribe(&self) -> broadcast::Receiver<MappingEvent> {
        self.events.subscribe()
    }

    async fn list(&self, namespace: &Namespace) -> Result<Vec<ApplicationMapping>, AccessError> {
        let mut found: Vec<ApplicationMapping> = self
            .mappings
            .read()
            .await
            .iter()
            .filter(|m| &m.namespace == namespace)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.application.cmp(&b.application));
        Ok(found)
    }
}

pub struct MappingExistsProvisionChecker {
    applications: Arc<dyn ApplicationFinder>,
    mappings: Arc<dyn MappingSource>,
}

impl MappingExistsProvisionChecker {
    pub fn new(applications: Arc<dyn ApplicationFinder>, mappings: Arc<dyn MappingSource>) -> Self {
        Self {
            applications,
            mappings,
        }
    }

    async fn is_listed(&self, application: &ApplicationName, namespace: &Namespace) -> Result<bool, AccessError> {
        let listed = self.mappings.list(namespace).await?;
        Ok(listed.iter().any(|m| &m.application == application))
    }
}

#[async_trait]
impl ProvisionChecker for MappingExistsProvisionChecker {
    async fn can_provision(
        &self,
        instance_id: &InstanceId,
        application_service_id: &ApplicationServiceId,
        namespace: &Namespace,
        max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError> {
        let application = self
            .applications
            .find_one_by_service_id(application_service_id)
            .await
            .map_err(|source| AccessError::Storage {
                context: format!("while getting application with service id [{application_service_id}]"),
                source,
            })?
            .ok_or_else(|| AccessError::ApplicationNotFound {
                service_id: application_service_id.clone(),
            })?;

        let deadline = deadline_after(max_wait);
        let mut events = self.mappings.subscribe();

        if self.is_listed(&application.name, namespace).await? {
            return Ok(CanProvisionOutput::allowed());
        }

        debug!(
            instance_id = %instance_id,
            application = %application.name,
            namespace = %namespace,
            max_wait_ms = max_wait.as_millis() as u64,
            "Waiting for application mapping"
        );

        loop {
            match timeout_at(deadline, events.recv()).await {
                Err(_) => {
                    return Ok(CanProvisionOutput::denied(format!(
                        "ApplicationMapping for application [{}] does not exist in the [{}] namespace",
                        application.name, namespace
                    )));
                }
                Ok(Ok(MappingEvent::Added(mapping)))
                    if mapping.application == application.name && &mapping.namespace == namespace =>
                {
                    return Ok(CanProvisionOutput::allowed());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, namespace = %namespace, "Mapping watch lagged, listing again");
                    if self.is_listed(&application.name, namespace).await? {
                        return Ok(CanProvisionOutput::allowed());
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(AccessError::WatchClosed {
                        namespace: namespace.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryApplicationRegistry, MockApplicationFinder};
    use crate::model::{Application, Service};
    use crate::storage::StorageError;

    fn fix_registry() -> Arc<InMemoryApplicationRegistry> {
        Arc::new(InMemoryApplicationRegistry::with_applications([Application {
            name: "ec-prod".into(),
            description: String::new(),
            services: vec![Service {
                id: "svc-1".into(),
                display_name: "Orders".to_string(),
                event_provider: true,
                api_provider: false,
            }],
        }]))
    }

    #[tokio::test]
    async fn test_existing_mapping_is_allowed_immediately() {
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        mappings.grant(&"ec-prod".into(), &"ns-a".into()).await;
        let checker = MappingExistsProvisionChecker::new(fix_registry(), mappings);

        let out = checker
            .can_provision(&"i-1".into(), &"svc-1".into(), &"ns-a".into(), Duration::ZERO)
            .await
            .unwrap();
        assert!(out.allowed);
    }

    #[tokio::test]
    async fn test_unbounded_wait_is_accepted() {
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        mappings.grant(&"ec-prod".into(), &"ns-a".into()).await;
        let checker = MappingExistsProvisionChecker::new(fix_registry(), mappings);

        let out = checker
            .can_provision(&"i-1".into(), &"svc-1".into(), &"ns-a".into(), Duration::MAX)
            .await
            .unwrap();
        assert!(out.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapping_granted_while_waiting() {
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        let checker = MappingExistsProvisionChecker::new(fix_registry(), mappings.clone());

        let granter = tokio::spawn({
            let mappings = mappings.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                mappings.grant(&"ec-prod".into(), &"ns-b".into()).await;
                mappings.grant(&"ec-prod".into(), &"ns-a".into()).await;
            }
        });

        let out = checker
            .can_provision(&"i-1".into(), &"svc-1".into(), &"ns-a".into(), Duration::from_secs(10))
            .await
            .unwrap();
        granter.await.unwrap();
        assert!(out.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_denial() {
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        mappings.grant(&"ec-prod".into(), &"other".into()).await;
        let checker = MappingExistsProvisionChecker::new(fix_registry(), mappings);

        let out = checker
            .can_provision(&"i-1".into(), &"svc-1".into(), &"ns-a".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.allowed);
        assert!(out.reason.contains("ec-prod"));
        assert!(out.reason.contains("ns-a"));
    }

    #[tokio::test]
    async fn test_unknown_application_is_an_error() {
        let checker = MappingExistsProvisionChecker::new(
            fix_registry(),
            Arc::new(InMemoryMappingRegistry::new()),
        );
        let err = checker
            .can_provision(&"i-1".into(), &"unknown".into(), &"ns-a".into(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ApplicationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_catalog_failure_is_wrapped() {
        let mut finder = MockApplicationFinder::new();
        finder
            .expect_find_one_by_service_id()
            .returning(|_| Err(StorageError::Backend("catalog down".to_string())));
        let checker =
            MappingExistsProvisionChecker::new(Arc::new(finder), Arc::new(InMemoryMappingRegistry::new()));

        let err = checker
            .can_provision(&"i-1".into(), &"svc-1".into(), &"ns-a".into(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("catalog down"));
    }

    #[tokio::test]
    async fn test_revoke_removes_mapping_from_listing() {
        let mappings = InMemoryMappingRegistry::new();
        let mut events = mappings.subscribe();
        mappings.grant(&"ec-prod".into(), &"ns-a".into()).await;
        mappings.revoke(&"ec-prod".into(), &"ns-a".into()).await;

        assert!(mappings.list(&"ns-a".into()).await.unwrap().is_empty());
        assert!(matches!(events.recv().await.unwrap(), MappingEvent::Added(_)));
        assert!(matches!(events.recv().await.unwrap(), MappingEvent::Removed(_)));
    }
}
