// Provision workflow
//
// The decision phase (idempotency checks and record creation) runs under the
// broker-wide lock and answers synchronously. Everything after that runs in a
// background task and is only observable through the operation log.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

use super::errors::{BrokerError, HttpStatusCodeError};
use super::executor::TaskSpawner;
use super::id_selector::ApplicationServiceIdSelector;
use super::operation_id::OperationIdProvider;
use super::state::InstanceStateService;
use super::types::{ProvisionRequest, ProvisionResponse, RestoreProvisionRequest};
use super::{BrokerDeps, BrokerSettings};
use crate::access::ProvisionChecker;
use crate::catalog::ApplicationFinder;
use crate::model::{
    Application, ApplicationName, ApplicationServiceId, Instance, InstanceId, InstanceOperation, InstanceState,
    Namespace, OperationId, OperationState, OperationType, Service, ServiceId, ServicePlanId,
    PROVISIONING_SUCCEEDED,
};
use crate::resources::eventing::{
    channel_labels, default_broker_uri, generated_subscription_name, subscription_labels,
    EVENTING_INJECTION_ENABLED, EVENTING_INJECTION_LABEL, INTEGRATION_NAMESPACE,
};
use crate::resources::{
    ApiPackageCredentials, EventActivation, EventActivationClient, EventingClient, ResourceError,
    Subscription,
};
use crate::storage::{InstanceStorage, OperationStorage};
use crate::telemetry::{create_operation_span, generate_correlation_id};

/// Everything the background phase needs, captured at decision time
#[derive(Debug, Clone)]
struct ProvisionJob {
    instance_id: InstanceId,
    operation_id: OperationId,
    namespace: Namespace,
    service_id: ServiceId,
    plan_id: ServicePlanId,
    application_service_id: ApplicationServiceId,
    application: Application,
    service: Service,
    parameters: Map<String, Value>,
}

#[derive(Clone)]
pub struct ProvisionService {
    instances: Arc<dyn InstanceStorage>,
    operations: Arc<dyn OperationStorage>,
    state: InstanceStateService,
    operation_ids: Arc<dyn OperationIdProvider>,
    applications: Arc<dyn ApplicationFinder>,
    access: Arc<dyn ProvisionChecker>,
    event_activations: Arc<dyn EventActivationClient>,
    eventing: Arc<dyn EventingClient>,
    credentials: Arc<dyn ApiPackageCredentials>,
    spawner: Arc<dyn TaskSpawner>,
    decision_lock: Arc<Mutex<()>>,
    selector: ApplicationServiceIdSelector,
    settings: BrokerSettings,
}

impl ProvisionService {
    pub fn new(deps: &BrokerDeps, settings: BrokerSettings, decision_lock: Arc<Mutex<()>>) -> Self {
        Self {
            instances: deps.instances.clone(),
            operations: deps.operations.clone(),
            state: InstanceStateService::new(deps.operations.clone()),
            operation_ids: deps.operation_ids.clone(),
            applications: deps.applications.clone(),
            access: deps.access.clone(),
            event_activations: deps.event_activations.clone(),
            eventing: deps.eventing.clone(),
            credentials: deps.credentials.clone(),
            spawner: deps.spawner.clone(),
            decision_lock,
            selector: ApplicationServiceIdSelector::from_api_packages_support(settings.api_packages_support),
            settings,
        }
    }

    pub async fn provision(&self, req: &ProvisionRequest) -> Result<ProvisionResponse, HttpStatusCodeError> {
        if !req.accepts_incomplete {
            return Err(HttpStatusCodeError::bad_request("asynchronous operation mode required"));
        }
        if !self.settings.api_packages_support && !req.parameters.is_empty() {
            return Err(HttpStatusCodeError::bad_request("provisioning parameters are not supported"));
        }
        let namespace = req.namespace().ok_or_else(|| {
            HttpStatusCodeError::bad_request("while getting namespace from context: namespace not set")
        })?;

        let correlation_id = generate_correlation_id();
        let span = create_operation_span("provision", &req.instance_id, None, Some(&correlation_id));
        self.decide(req, namespace).instrument(span).await
    }

    async fn decide(
        &self,
        req: &ProvisionRequest,
        namespace: Namespace,
    ) -> Result<ProvisionResponse, HttpStatusCodeError> {
        let instance_id = &req.instance_id;
        let params_hash = req.params_hash();

        let _decision = self.decision_lock.lock().await;

        let provisioned = self.state.is_provisioned(instance_id).await.map_err(|e| {
            HttpStatusCodeError::bad_request(format!(
                "while checking if instance is already provisioned: {e}"
            ))
        })?;
        if provisioned {
            self.compare_provisioning_parameters(req, &params_hash).await?;
            info!(instance_id = %instance_id, "Instance already provisioned");
            return Ok(ProvisionResponse {
                is_async: false,
                operation_key: None,
            });
        }

        let in_progress = self
            .state
            .is_provisioning_in_progress(instance_id)
            .await
            .map_err(|e| {
                HttpStatusCodeError::bad_request(format!(
                    "while checking if instance is being provisioned: {e}"
                ))
            })?;
        if let Some(operation_id) = in_progress {
            self.compare_provisioning_parameters(req, &params_hash).await?;
            info!(instance_id = %instance_id, operation_id = %operation_id, "Provisioning already in progress");
            return Ok(ProvisionResponse {
                is_async: true,
                operation_key: Some(operation_id),
            });
        }

        let operation_id = self
            .operation_ids
            .new_operation_id()
            .map_err(|e| HttpStatusCodeError::bad_request(e.to_string()))?;

        let application_service_id = self.selector.select(&req.service_id, &req.plan_id);
        let application = self
            .applications
            .find_one_by_service_id(&application_service_id)
            .await
            .map_err(|e| {
                HttpStatusCodeError::bad_request(format!(
                    "while getting application with id: {application_service_id} from storage: {e}"
                ))
            })?
            .ok_or_else(|| {
                HttpStatusCodeError::bad_request(format!(
                    "application with service id: {application_service_id} not found"
                ))
            })?;
        let service = application
            .service(&application_service_id)
            .cloned()
            .ok_or_else(|| {
                HttpStatusCodeError::bad_request(format!(
                    "while getting service [{application_service_id}] from Application [{}]: service not found",
                    application.name
                ))
            })?;

        let operation = InstanceOperation::in_progress(
            instance_id.clone(),
            operation_id.clone(),
            OperationType::Create,
            Some(params_hash.clone()),
        );
        self.operations.insert(&operation).await.map_err(|e| {
            HttpStatusCodeError::bad_request(format!(
                "while inserting instance operation to storage: {e}"
            ))
        })?;

        let instance = Instance {
            id: instance_id.clone(),
            namespace: namespace.clone(),
            service_id: req.service_id.clone(),
            service_plan_id: req.plan_id.clone(),
            state: InstanceState::Pending,
            params_hash,
        };
        if let Err(e) = self.instances.insert(&instance).await {
            // A create without its instance must not stay in progress
            let message = format!("while inserting instance to storage: {e}");
            if let Err(e) = self
                .operations
                .update_state_desc(instance_id, &operation_id, OperationState::Failed, Some(message.clone()))
                .await
            {
                error!(instance_id = %instance_id, operation_id = %operation_id, error = %e, "Cannot update state of the instance operation");
            }
            return Err(HttpStatusCodeError::bad_request(message));
        }

        info!(
            instance_id = %instance_id,
            operation_id = %operation_id,
            application = %application.name,
            namespace = %namespace,
            "Provisioning accepted"
        );

        self.spawn_job(ProvisionJob {
            instance_id: instance_id.clone(),
            operation_id: operation_id.clone(),
            namespace,
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone(),
            application_service_id,
            application,
            service,
            parameters: req.parameters.clone(),
        });

        Ok(ProvisionResponse {
            is_async: true,
            operation_key: Some(operation_id),
        })
    }

    /// Re-run the background phase of a provisioning that was interrupted.
    /// Marks the operation failed when the application can no longer be resolved.
    pub async fn resume(&self, req: RestoreProvisionRequest) -> Result<(), BrokerError> {
        let application_service_id = self.selector.select(&req.service_id, &req.plan_id);
        let resolved = match self.applications.find_one_by_service_id(&application_service_id).await {
            Ok(Some(app)) => match app.service(&application_service_id).cloned() {
                Some(service) => Ok((app, service)),
                None => Err(format!(
                    "service [{application_service_id}] not found in application [{}]",
                    app.name
                )),
            },
            Ok(None) => Err(format!("application with service id: {application_service_id} not found")),
            Err(e) => Err(format!("while getting application with id: {application_service_id}: {e}")),
        };

        match resolved {
            Ok((application, service)) => {
                info!(instance_id = %req.instance_id, operation_id = %req.operation_id, "Resuming provisioning");
                self.spawn_job(ProvisionJob {
                    instance_id: req.instance_id,
                    operation_id: req.operation_id,
                    namespace: req.namespace,
                    service_id: req.service_id,
                    plan_id: req.plan_id,
                    application_service_id,
                    application,
                    service,
                    parameters: Map::new(),
                });
                Ok(())
            }
            Err(reason) => {
                let description = format!("provisioning failed on error: {reason}");
                self.update_states(
                    &req.instance_id,
                    &req.operation_id,
                    InstanceState::Failed,
                    OperationState::Failed,
                    &description,
                )
                .await;
                Err(BrokerError::Validation(description))
            }
        }
    }

    fn spawn_job(&self, job: ProvisionJob) {
        let span = create_operation_span(
            "provision.background",
            &job.instance_id,
            Some(&job.operation_id),
            None,
        );
        let svc = self.clone();
        self.spawner
            .spawn("provision", Box::pin(async move { svc.execute(job).await }.instrument(span)));
    }

    async fn execute(&self, job: ProvisionJob) {
        match self.run(&job).await {
            Ok(()) => {
                info!(instance_id = %job.instance_id, operation_id = %job.operation_id, "Provisioning succeeded");
                self.update_states(
                    &job.instance_id,
                    &job.operation_id,
                    InstanceState::Succeeded,
                    OperationState::Succeeded,
                    PROVISIONING_SUCCEEDED,
                )
                .await;
            }
            Err(description) => {
                warn!(instance_id = %job.instance_id, operation_id = %job.operation_id, reason = %description, "Provisioning failed");
                self.update_states(
                    &job.instance_id,
                    &job.operation_id,
                    InstanceState::Failed,
                    OperationState::Failed,
                    &description,
                )
                .await;
            }
        }
    }

    /// Background phase; `Err` carries the operation description
    async fn run(&self, job: &ProvisionJob) -> Result<(), String> {
        let output = self
            .access
            .can_provision(
                &job.instance_id,
                &job.application_service_id,
                &job.namespace,
                self.settings.max_wait,
            )
            .await
            .map_err(|e| format!("provisioning failed on error: {e}"))?;
        info!(
            application = %job.application.name,
            application_service_id = %job.application_service_id,
            namespace = %job.namespace,
            allowed = output.allowed,
            reason = %output.reason,
            "Access checker returned"
        );

        if !output.allowed {
            return Err(format!(
                "Forbidden provisioning instance [{}] for application [name: {}, id: {}] in namespace: [{}]. Reason: [{}]",
                job.instance_id, job.application.name, job.application_service_id, job.namespace, output.reason
            ));
        }

        if self.settings.api_packages_support && job.service.api_provider {
            self.credentials
                .ensure_credentials(&job.service_id, &job.plan_id, &job.instance_id, &job.parameters)
                .await
                .map_err(|e| format!("provisioning failed while ensuring API Package credentials: {e}"))?;
        }

        if job.service.event_provider {
            self.ensure_event_activation(job)
                .await
                .map_err(|e| format!("provisioning failed while creating EventActivation on error: {e}"))?;

            self.persist_subscription(&job.application.name, &job.namespace)
                .await
                .map_err(|e| {
                    format!(
                        "provisioning failed while persisting Knative Subscription for application: {} namespace: {} on error: {e}",
                        job.application.name, job.namespace
                    )
                })?;

            self.enable_default_broker(&job.namespace).await.map_err(|e| {
                format!(
                    "provisioning failed while enabling default Knative Broker for namespace: {} on error: {e}",
                    job.namespace
                )
            })?;
        }

        Ok(())
    }

    /// Create the EventActivation, or adopt an existing one by pointing its
    /// owner at this instance (it may predate the instance after a restore)
    async fn ensure_event_activation(&self, job: &ProvisionJob) -> Result<(), BrokerError> {
        let name = job.application_service_id.to_string();
        let activation = EventActivation {
            name: name.clone(),
            namespace: job.namespace.clone(),
            display_name: job.service.display_name.clone(),
            source_id: job.application.name.clone(),
            owner: job.instance_id.clone(),
        };

        match self.event_activations.create(&activation).await {
            Ok(_) => {
                info!(name = %name, namespace = %job.namespace, "Created EventActivation");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                let mut existing = self
                    .event_activations
                    .get(&job.namespace, &name)
                    .await
                    .map_err(|e| {
                        BrokerError::resource(
                            format!(
                                "while ensuring update on EventActivation: while getting EventActivation with name: \"{name}\" from namespace: \"{}\"",
                                job.namespace
                            ),
                            e,
                        )
                    })?;
                existing.owner = job.instance_id.clone();
                self.event_activations.update(&existing).await.map_err(|e| {
                    BrokerError::resource(
                        format!(
                            "while ensuring update on EventActivation: while updating EventActivation with name: \"{name}\" in namespace: \"{}\"",
                            job.namespace
                        ),
                        e,
                    )
                })?;
                info!(name = %name, namespace = %job.namespace, "Updated EventActivation");
                Ok(())
            }
            Err(e) => Err(BrokerError::resource(
                format!(
                    "while creating EventActivation with name: \"{name}\" in namespace: \"{}\"",
                    job.namespace
                ),
                e,
            )),
        }
    }

    /// Point the application's channel at the namespace default broker.
    /// Creates the Subscription, or refreshes the one found by labels.
    async fn persist_subscription(
        &self,
        application: &ApplicationName,
        namespace: &Namespace,
    ) -> Result<(), BrokerError> {
        let integration = Namespace::from(INTEGRATION_NAMESPACE);
        let subscriber_uri = default_broker_uri(namespace);

        let channel = self
            .eventing
            .get_channel_by_labels(&integration, &channel_labels(application))
            .await
            .map_err(|e| {
                BrokerError::resource(
                    format!("getting the Knative channel for the application [{application}]"),
                    e,
                )
            })?;

        let labels = subscription_labels(application, namespace);
        match self.eventing.get_subscription_by_labels(&integration, &labels).await {
            Ok(mut existing) => {
                existing.channel = channel.name.clone();
                existing.subscriber_uri = subscriber_uri;
                existing.labels.extend(labels.clone());
                self.eventing.update_subscription(&existing).await.map_err(|e| {
                    BrokerError::resource(
                        format!(
                            "updating existing Knative Subscription with labels [{labels:?}] for channel: [{}]",
                            channel.name
                        ),
                        e,
                    )
                })?;
                info!(name = %existing.name, channel = %channel.name, "Updated Knative Subscription");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let subscription = Subscription {
                    name: generated_subscription_name(),
                    namespace: integration,
                    labels,
                    channel: channel.name,
                    subscriber_uri,
                };
                self.eventing.create_subscription(&subscription).await.map_err(|e| {
                    BrokerError::resource(format!("creating Subscription {}", subscription.name), e)
                })?;
                info!(name = %subscription.name, channel = %subscription.channel, "Created Knative Subscription");
                Ok(())
            }
            Err(e) => Err(BrokerError::resource(
                format!("getting Subscription by labels [{labels:?}]"),
                e,
            )),
        }
    }

    /// Label the namespace so Knative runs its default broker
    async fn enable_default_broker(&self, namespace: &Namespace) -> Result<(), ResourceError> {
        let mut resource = self.eventing.get_namespace(namespace).await?;
        if resource.default_broker_enabled() {
            debug!(namespace = %namespace, "Default Knative broker already enabled");
            return Ok(());
        }

        resource.labels.insert(
            EVENTING_INJECTION_LABEL.to_string(),
            EVENTING_INJECTION_ENABLED.to_string(),
        );
        self.eventing.update_namespace(&resource).await?;
        info!(namespace = %namespace, "Enabled default Knative broker");
        Ok(())
    }

    /// A stored instance without a matching parameter hash is a conflict;
    /// a missing instance is not
    async fn compare_provisioning_parameters(
        &self,
        req: &ProvisionRequest,
        new_hash: &str,
    ) -> Result<(), HttpStatusCodeError> {
        let conflict = |reason: String| {
            HttpStatusCodeError::conflict(format!(
                "while comparing provisioning parameters {}: {reason}",
                Value::Object(req.parameters.clone())
            ))
        };

        let instance = match self.instances.get(&req.instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(conflict(format!(
                    "while getting instance {} from storage: {e}",
                    req.instance_id
                )))
            }
        };

        if instance.params_hash != new_hash {
            return Err(conflict(format!(
                "provisioning parameters hash differs - new {new_hash}, old {}, for instance {}",
                instance.params_hash, req.instance_id
            )));
        }
        Ok(())
    }

    /// Terminal commit. Write failures are logged, not retried.
    async fn update_states(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        instance_state: InstanceState,
        operation_state: OperationState,
        description: &str,
    ) {
        if let Err(e) = self.instances.update_state(instance_id, instance_state).await {
            error!(instance_id = %instance_id, error = %e, "Cannot update state of the stored instance");
        }
        if let Err(e) = self
            .operations
            .update_state_desc(
                instance_id,
                operation_id,
                operation_state,
                Some(description.to_string()),
            )
            .await
        {
            error!(instance_id = %instance_id, operation_id = %operation_id, error = %e, "Cannot update state of the instance operation");
        }
    }
}
