// Deprovision workflow
//
// Cleanup runs in a fixed order: per-instance credentials first, then the
// shared eventing objects (only when no other succeeded instance of the same
// service plan remains in the namespace), then the instance row itself. An
// instance whose create is still running cannot be deprovisioned.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};

use super::errors::BrokerError;
use super::executor::TaskSpawner;
use super::id_selector::ApplicationServiceIdSelector;
use super::operation_id::OperationIdProvider;
use super::state::InstanceStateService;
use super::types::{DeprovisionRequest, DeprovisionResponse};
use super::{BrokerDeps, BrokerSettings};
use crate::catalog::ApplicationFinder;
use crate::model::{
    ApplicationName, Instance, InstanceId, InstanceOperation, InstanceState, Namespace, OperationId,
    OperationState, OperationType, DEPROVISIONING_SUCCEEDED,
};
use crate::resources::eventing::{subscription_labels, INTEGRATION_NAMESPACE};
use crate::resources::{ApiPackageCredentials, EventActivationClient, EventingClient};
use crate::storage::{InstanceQuery, InstanceStorage, OperationStorage};
use crate::telemetry::{create_operation_span, generate_correlation_id};

#[derive(Clone)]
pub struct DeprovisionService {
    instances: Arc<dyn InstanceStorage>,
    operations: Arc<dyn OperationStorage>,
    state: InstanceStateService,
    operation_ids: Arc<dyn OperationIdProvider>,
    event_activations: Arc<dyn EventActivationClient>,
    eventing: Arc<dyn EventingClient>,
    applications: Arc<dyn ApplicationFinder>,
    credentials: Arc<dyn ApiPackageCredentials>,
    spawner: Arc<dyn TaskSpawner>,
    decision_lock: Arc<Mutex<()>>,
    selector: ApplicationServiceIdSelector,
}

impl DeprovisionService {
    pub fn new(deps: &BrokerDeps, settings: BrokerSettings, decision_lock: Arc<Mutex<()>>) -> Self {
        Self {
            instances: deps.instances.clone(),
            operations: deps.operations.clone(),
            state: InstanceStateService::new(deps.operations.clone()),
            operation_ids: deps.operation_ids.clone(),
            event_activations: deps.event_activations.clone(),
            eventing: deps.eventing.clone(),
            applications: deps.applications.clone(),
            credentials: deps.credentials.clone(),
            spawner: deps.spawner.clone(),
            decision_lock,
            selector: ApplicationServiceIdSelector::from_api_packages_support(settings.api_packages_support),
        }
    }

    pub async fn deprovision(&self, req: &DeprovisionRequest) -> Result<DeprovisionResponse, BrokerError> {
        if !req.accepts_incomplete {
            return Err(BrokerError::Validation(
                "asynchronous operation mode required".to_string(),
            ));
        }

        let correlation_id = generate_correlation_id();
        let span = create_operation_span("deprovision", &req.instance_id, None, Some(&correlation_id));
        self.decide(&req.instance_id).instrument(span).await
    }

    async fn decide(&self, instance_id: &InstanceId) -> Result<DeprovisionResponse, BrokerError> {
        let _decision = self.decision_lock.lock().await;

        if self.state.is_deprovisioned(instance_id).await? {
            info!(instance_id = %instance_id, "Instance already deprovisioned");
            return Ok(DeprovisionResponse {
                is_async: false,
                operation_key: None,
            });
        }

        if let Some(operation_id) = self.state.is_deprovisioning_in_progress(instance_id).await? {
            info!(instance_id = %instance_id, operation_id = %operation_id, "Deprovisioning already in progress");
            return Ok(DeprovisionResponse {
                is_async: true,
                operation_key: Some(operation_id),
            });
        }

        if let Some(operation_id) = self.state.is_provisioning_in_progress(instance_id).await? {
            warn!(instance_id = %instance_id, operation_id = %operation_id, "Refusing to deprovision while provisioning is in progress");
            return Err(BrokerError::ProvisioningInProgress {
                instance_id: instance_id.clone(),
                operation_id,
            });
        }

        let instance = match self.instances.get(instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                return Err(BrokerError::InstanceNotFound {
                    instance_id: instance_id.clone(),
                })
            }
            Err(e) => return Err(BrokerError::storage("while getting instance from storage", e)),
        };

        let operation_id = self.operation_ids.new_operation_id()?;
        let operation = InstanceOperation::in_progress(
            instance_id.clone(),
            operation_id.clone(),
            OperationType::Remove,
            None,
        );
        self.operations
            .insert(&operation)
            .await
            .map_err(|e| BrokerError::storage("while inserting instance operation to storage", e))?;
        self.instances
            .update_state(instance_id, InstanceState::PendingDeletion)
            .await
            .map_err(|e| BrokerError::storage("while updating instance state in storage", e))?;

        info!(instance_id = %instance_id, operation_id = %operation_id, namespace = %instance.namespace, "Deprovisioning accepted");
        self.spawn_job(instance, operation_id.clone());

        Ok(DeprovisionResponse {
            is_async: true,
            operation_key: Some(operation_id),
        })
    }

    /// Re-run the background phase of an interrupted deprovisioning
    pub fn resume(&self, instance: Instance, operation_id: OperationId) {
        info!(instance_id = %instance.id, operation_id = %operation_id, "Resuming deprovisioning");
        self.spawn_job(instance, operation_id);
    }

    fn spawn_job(&self, instance: Instance, operation_id: OperationId) {
        let span = create_operation_span(
            "deprovision.background",
            &instance.id,
            Some(&operation_id),
            None,
        );
        let svc = self.clone();
        self.spawner.spawn(
            "deprovision",
            Box::pin(async move { svc.execute(instance, operation_id).await }.instrument(span)),
        );
    }

    async fn execute(&self, instance: Instance, operation_id: OperationId) {
        match self.run(&instance).await {
            Ok(()) => {
                info!(instance_id = %instance.id, operation_id = %operation_id, "Deprovisioning succeeded");
                self.update_operation(
                    &instance.id,
                    &operation_id,
                    OperationState::Succeeded,
                    DEPROVISIONING_SUCCEEDED,
                )
                .await;
            }
            Err(description) => {
                warn!(instance_id = %instance.id, operation_id = %operation_id, reason = %description, "Deprovisioning failed");
                if let Err(e) = self
                    .instances
                    .update_state(&instance.id, InstanceState::Failed)
                    .await
                {
                    error!(instance_id = %instance.id, error = %e, "Cannot update state of the stored instance");
                }
                self.update_operation(&instance.id, &operation_id, OperationState::Failed, &description)
                    .await;
            }
        }
    }

    /// Background phase; `Err` carries the operation description
    async fn run(&self, instance: &Instance) -> Result<(), String> {
        match self
            .credentials
            .ensure_credentials_deleted(&instance.service_id, &instance.service_plan_id, &instance.id)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(format!(
                    "deprovisioning failed while removing API Package credentials: {e}"
                ))
            }
        }

        self.cleanup_shared_resources(instance).await?;

        match self.instances.remove(&instance.id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(format!(
                "deprovisioning failed while removing instance from storage: {e}"
            )),
        }
    }

    /// Delete the EventActivation and the Knative Subscription when this is
    /// the last succeeded instance of its service plan in the namespace
    async fn cleanup_shared_resources(&self, instance: &Instance) -> Result<(), String> {
        let query = InstanceQuery::same_kind(&instance.namespace, &instance.service_id, &instance.service_plan_id)
            .in_state(InstanceState::Succeeded)
            .excluding(&instance.id);
        let remaining = self.instances.find_all(&query).await.map_err(|e| {
            format!("deprovisioning failed while searching for instances of the same kind: {e}")
        })?;

        if !remaining.is_empty() {
            info!(
                instance_id = %instance.id,
                remaining = remaining.len(),
                "Other instances still use the shared eventing objects, keeping them"
            );
            return Ok(());
        }

        let application_service_id = self
            .selector
            .select(&instance.service_id, &instance.service_plan_id);
        let name = application_service_id.to_string();
        match self.event_activations.delete(&instance.namespace, &name).await {
            Ok(()) => info!(name = %name, namespace = %instance.namespace, "Deleted EventActivation"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(format!(
                    "deprovisioning failed while deleting EventActivation with name: \"{name}\" in namespace: \"{}\": {e}",
                    instance.namespace
                ))
            }
        }

        let application = match self
            .applications
            .find_one_by_service_id(&application_service_id)
            .await
        {
            Ok(Some(application)) => application,
            Ok(None) => {
                warn!(application_service_id = %application_service_id, "Application is gone, skipping Knative Subscription removal");
                return Ok(());
            }
            Err(e) => {
                return Err(format!(
                    "deprovisioning failed while getting application with id: {application_service_id}: {e}"
                ))
            }
        };

        self.delete_subscription(&application.name, &instance.namespace)
            .await
            .map_err(|e| {
                format!(
                    "deprovisioning failed while removing Knative Subscription for application: {} namespace: {} on error: {e}",
                    application.name, instance.namespace
                )
            })
    }

    async fn delete_subscription(
        &self,
        application: &ApplicationName,
        namespace: &Namespace,
    ) -> Result<(), BrokerError> {
        let integration = Namespace::from(INTEGRATION_NAMESPACE);
        let labels = subscription_labels(application, namespace);
        let subscription = match self.eventing.get_subscription_by_labels(&integration, &labels).await {
            Ok(subscription) => subscription,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(BrokerError::resource(
                    format!("getting Subscription by labels [{labels:?}]"),
                    e,
                ))
            }
        };

        match self.eventing.delete_subscription(&integration, &subscription.name).await {
            Ok(()) => {
                info!(name = %subscription.name, "Deleted Knative Subscription");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(BrokerError::resource(
                format!("deleting Subscription {}", subscription.name),
                e,
            )),
        }
    }

    async fn update_operation(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: &str,
    ) {
        if let Err(e) = self
            .operations
            .update_state_desc(instance_id, operation_id, state, Some(description.to_string()))
            .await
        {
            error!(instance_id = %instance_id, operation_id = %operation_id, error = %e, "Cannot update state of the instance operation");
        }
    }
}
