// Broker facade - the OSB verbs over the instance lifecycle engine
//
// Provision and Deprovision share one decision lock. It serializes the
// idempotency checks and record creation of every instance; background work
// runs outside of it.

pub mod bind;
pub mod deprovision;
pub mod errors;
pub mod executor;
pub mod id_selector;
pub mod last_operation;
pub mod operation_id;
pub mod provision;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::access::ProvisionChecker;
use crate::catalog::ApplicationFinder;
use crate::populator::InstancePopulator;
use crate::resources::{ApiPackageCredentials, EventActivationClient, EventingClient};
use crate::storage::{InstanceStorage, OperationStorage};

pub use bind::BindService;
pub use deprovision::DeprovisionService;
pub use errors::{BrokerError, HttpStatusCodeError};
pub use executor::{BackgroundTask, CompletionHook, TaskSpawner, TokioTaskSpawner};
pub use id_selector::ApplicationServiceIdSelector;
pub use last_operation::LastOperationService;
pub use operation_id::{OperationIdProvider, UuidOperationIdProvider};
pub use provision::ProvisionService;
pub use state::InstanceStateService;
pub use types::{
    BindRequest, BindResponse, DeprovisionRequest, DeprovisionResponse, LastOperationRequest,
    LastOperationResponse, ProvisionRequest, ProvisionResponse, RestoreProvisionRequest,
};

/// Collaborators of the broker
#[derive(Clone)]
pub struct BrokerDeps {
    pub instances: Arc<dyn InstanceStorage>,
    pub operations: Arc<dyn OperationStorage>,
    pub applications: Arc<dyn ApplicationFinder>,
    pub access: Arc<dyn ProvisionChecker>,
    pub event_activations: Arc<dyn EventActivationClient>,
    pub eventing: Arc<dyn EventingClient>,
    pub credentials: Arc<dyn ApiPackageCredentials>,
    pub operation_ids: Arc<dyn OperationIdProvider>,
    pub spawner: Arc<dyn TaskSpawner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Several instances per service class (plans are API packages).
    /// Also switches the application service ID to the plan ID and drops
    /// the uniqueness check from the access gate.
    pub api_packages_support: bool,
    /// Upper bound for the application mapping wait
    pub max_wait: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            api_packages_support: false,
            max_wait: Duration::from_secs(60),
        }
    }
}

pub struct Broker {
    provision: ProvisionService,
    deprovision: DeprovisionService,
    last_operation: LastOperationService,
    bind: BindService,
    populator: InstancePopulator,
    state: InstanceStateService,
}

impl Broker {
    pub fn new(deps: BrokerDeps, settings: BrokerSettings) -> Self {
        let decision_lock = Arc::new(Mutex::new(()));
        let provision = ProvisionService::new(&deps, settings, decision_lock.clone());
        let deprovision = DeprovisionService::new(&deps, settings, decision_lock);
        let populator = InstancePopulator::new(
            deps.instances.clone(),
            deps.operations.clone(),
            provision.clone(),
            deprovision.clone(),
        );

        Self {
            last_operation: LastOperationService::new(deps.operations.clone()),
            bind: BindService::new(
                deps.instances.clone(),
                deps.credentials.clone(),
                settings.api_packages_support,
            ),
            state: InstanceStateService::new(deps.operations.clone()),
            provision,
            deprovision,
            populator,
        }
    }

    pub async fn provision(&self, req: &ProvisionRequest) -> Result<ProvisionResponse, HttpStatusCodeError> {
        self.provision.provision(req).await
    }

    pub async fn deprovision(&self, req: &DeprovisionRequest) -> Result<DeprovisionResponse, BrokerError> {
        self.deprovision.deprovision(req).await
    }

    pub async fn last_operation(
        &self,
        req: &LastOperationRequest,
    ) -> Result<LastOperationResponse, BrokerError> {
        self.last_operation.last_operation(req).await
    }

    pub async fn bind(&self, req: &BindRequest) -> Result<BindResponse, BrokerError> {
        self.bind.bind(req).await
    }

    pub fn populator(&self) -> &InstancePopulator {
        &self.populator
    }

    pub fn state(&self) -> &InstanceStateService {
        &self.state
    }
}
