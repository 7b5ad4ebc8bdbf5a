// Process wiring - builds a broker with the collaborators named in the configuration

use std::sync::Arc;
use tracing::info;

use crate::access::{InMemoryMappingRegistry, ProvisionCheckerChain};
use crate::broker::{Broker, BrokerDeps, TokioTaskSpawner, UuidOperationIdProvider};
use crate::catalog::InMemoryApplicationRegistry;
use crate::config::{BrokerConfig, StorageBackend};
use crate::resources::{InMemoryCredentialStore, InMemoryEventActivationClient, InMemoryEventingClient};
use crate::storage::{
    FileSystemStorage, InMemoryInstanceStorage, InMemoryOperationStorage, InstanceStorage,
    OperationStorage, StorageError,
};

pub struct BrokerApp {
    pub broker: Broker,
    pub spawner: TokioTaskSpawner,
    pub instances: Arc<dyn InstanceStorage>,
    pub operations: Arc<dyn OperationStorage>,
    pub applications: Arc<InMemoryApplicationRegistry>,
    pub mappings: Arc<InMemoryMappingRegistry>,
    pub event_activations: Arc<InMemoryEventActivationClient>,
    pub eventing: Arc<InMemoryEventingClient>,
    pub credentials: Arc<InMemoryCredentialStore>,
}

impl BrokerApp {
    pub async fn from_config(config: &BrokerConfig) -> Result<Self, StorageError> {
        let (instances, operations): (Arc<dyn InstanceStorage>, Arc<dyn OperationStorage>) =
            match config.storage.backend {
                StorageBackend::Memory => (
                    Arc::new(InMemoryInstanceStorage::new()),
                    Arc::new(InMemoryOperationStorage::new()),
                ),
                StorageBackend::File => {
                    let storage = Arc::new(FileSystemStorage::open(&config.storage.path).await?);
                    (storage.clone(), storage)
                }
            };

        let applications = Arc::new(InMemoryApplicationRegistry::with_applications(
            config.applications.iter().cloned(),
        ));
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        for mapping in &config.mappings {
            mappings.grant(&mapping.application, &mapping.namespace).await;
        }

        let settings = config.settings();
        let access = ProvisionCheckerChain::standard(
            applications.clone(),
            mappings.clone(),
            instances.clone(),
            settings.api_packages_support,
        );
        let event_activations = Arc::new(InMemoryEventActivationClient::new());
        // Every configured application has a channel; mapped namespaces exist
        let eventing = Arc::new(InMemoryEventingClient::seeded(
            config.applications.iter().map(|app| app.name.clone()),
            config.mappings.iter().map(|mapping| mapping.namespace.clone()),
        ));
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let spawner = TokioTaskSpawner::new();

        let broker = Broker::new(
            BrokerDeps {
                instances: instances.clone(),
                operations: operations.clone(),
                applications: applications.clone(),
                access: Arc::new(access),
                event_activations: event_activations.clone(),
                eventing: eventing.clone(),
                credentials: credentials.clone(),
                operation_ids: Arc::new(UuidOperationIdProvider),
                spawner: Arc::new(spawner.clone()),
            },
            settings,
        );

        info!(
            storage = ?config.storage.backend,
            applications = config.applications.len(),
            mappings = config.mappings.len(),
            api_packages_support = settings.api_packages_support,
            "Application broker assembled"
        );

        Ok(Self {
            broker,
            spawner,
            instances,
            operations,
            applications,
            mappings,
            event_activations,
            eventing,
            credentials,
        })
    }
}
