// Shared harness for broker integration tests: a broker over in-memory
// collaborators with the "ec-prod" application registered, its channel in
// place and namespaces ns-a and ns-b known to the eventing client.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use application_broker::access::{
    AccessError, CanProvisionOutput, InMemoryMappingRegistry, ProvisionChecker,
    ProvisionCheckerChain,
};
use application_broker::broker::{
    Broker, BrokerDeps, BrokerSettings, TokioTaskSpawner, UuidOperationIdProvider,
};
use application_broker::catalog::InMemoryApplicationRegistry;
use application_broker::model::{
    Application, ApplicationName, ApplicationServiceId, InstanceId, InstanceOperation, Namespace,
    Service,
};
use application_broker::resources::{
    InMemoryCredentialStore, InMemoryEventActivationClient, InMemoryEventingClient,
};
use application_broker::storage::{
    InMemoryInstanceStorage, InMemoryOperationStorage, OperationStorage,
};

pub const APP_NAME: &str = "ec-prod";
pub const SERVICE_ID: &str = "S1";
pub const PLAN_ID: &str = "default";

pub fn ec_prod_application() -> Application {
    Application {
        name: APP_NAME.into(),
        description: "EC production".to_string(),
        services: vec![Service {
            id: SERVICE_ID.into(),
            display_name: "EC events".to_string(),
            event_provider: true,
            api_provider: true,
        }],
    }
}

/// Always answers with the same denial
pub struct DenyingChecker {
    pub reason: String,
}

#[async_trait]
impl ProvisionChecker for DenyingChecker {
    async fn can_provision(
        &self,
        _instance_id: &InstanceId,
        _application_service_id: &ApplicationServiceId,
        _namespace: &Namespace,
        _max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError> {
        Ok(CanProvisionOutput::denied(self.reason.clone()))
    }
}

/// Cannot reach a decision
pub struct FailingChecker;

#[async_trait]
impl ProvisionChecker for FailingChecker {
    async fn can_provision(
        &self,
        _instance_id: &InstanceId,
        _application_service_id: &ApplicationServiceId,
        namespace: &Namespace,
        _max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError> {
        Err(AccessError::WatchClosed {
            namespace: namespace.clone(),
        })
    }
}

pub struct BrokerHarness {
    pub broker: Broker,
    pub spawner: TokioTaskSpawner,
    pub instances: Arc<InMemoryInstanceStorage>,
    pub operations: Arc<InMemoryOperationStorage>,
    pub applications: Arc<InMemoryApplicationRegistry>,
    pub mappings: Arc<InMemoryMappingRegistry>,
    pub event_activations: Arc<InMemoryEventActivationClient>,
    pub eventing: Arc<InMemoryEventingClient>,
    pub credentials: Arc<InMemoryCredentialStore>,
}

#[derive(Default)]
pub struct BrokerHarnessBuilder {
    access: Option<Arc<dyn ProvisionChecker>>,
    eventing: Option<InMemoryEventingClient>,
    settings: BrokerSettings,
}

impl BrokerHarnessBuilder {
    pub fn access(mut self, checker: impl ProvisionChecker + 'static) -> Self {
        self.access = Some(Arc::new(checker));
        self
    }

    /// Replace the seeded eventing client
    pub fn eventing(mut self, client: InMemoryEventingClient) -> Self {
        self.eventing = Some(client);
        self
    }

    pub fn api_packages(mut self, enabled: bool) -> Self {
        self.settings.api_packages_support = enabled;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.settings.max_wait = max_wait;
        self
    }

    pub fn build(self) -> BrokerHarness {
        let instances = Arc::new(InMemoryInstanceStorage::new());
        let operations = Arc::new(InMemoryOperationStorage::new());
        let applications = Arc::new(InMemoryApplicationRegistry::with_applications([
            ec_prod_application(),
        ]));
        let mappings = Arc::new(InMemoryMappingRegistry::new());
        let event_activations = Arc::new(InMemoryEventActivationClient::new());
        let eventing = Arc::new(self.eventing.unwrap_or_else(|| {
            InMemoryEventingClient::seeded(
                [ApplicationName::from(APP_NAME)],
                [Namespace::from("ns-a"), Namespace::from("ns-b")],
            )
        }));
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let spawner = TokioTaskSpawner::new();

        let access = match self.access {
            Some(access) => access,
            None => Arc::new(ProvisionCheckerChain::standard(
                applications.clone(),
                mappings.clone(),
                instances.clone(),
                self.settings.api_packages_support,
            )),
        };

        let broker = Broker::new(
            BrokerDeps {
                instances: instances.clone(),
                operations: operations.clone(),
                applications: applications.clone(),
                access,
                event_activations: event_activations.clone(),
                eventing: eventing.clone(),
                credentials: credentials.clone(),
                operation_ids: Arc::new(UuidOperationIdProvider),
                spawner: Arc::new(spawner.clone()),
            },
            self.settings,
        );

        BrokerHarness {
            broker,
            spawner,
            instances,
            operations,
            applications,
            mappings,
            event_activations,
            eventing,
            credentials,
        }
    }
}

impl BrokerHarness {
    pub fn builder() -> BrokerHarnessBuilder {
        BrokerHarnessBuilder::default()
    }

    pub async fn grant(&self, namespace: &str) {
        self.mappings
            .grant(&ApplicationName::from(APP_NAME), &Namespace::from(namespace))
            .await;
    }

    /// Wait for background work; panics when it does not settle
    pub async fn settle(&self) {
        assert!(
            self.spawner.wait_idle(Duration::from_secs(5)).await,
            "background work did not settle"
        );
    }

    pub async fn history(&self, instance_id: &str) -> Vec<InstanceOperation> {
        self.operations
            .get_all(&InstanceId::from(instance_id))
            .await
            .unwrap_or_default()
    }
}
