// Requests and responses of the broker verbs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{
    Instance, InstanceId, Namespace, OperationId, OperationState, ServiceId, ServicePlanId,
};
use crate::resources::Credentials;

const NAMESPACE_CONTEXT_KEY: &str = "namespace";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub instance_id: InstanceId,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
    #[serde(default)]
    pub accepts_incomplete: bool,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Platform context; carries the target namespace
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ProvisionRequest {
    pub fn new(
        instance_id: impl Into<InstanceId>,
        service_id: impl Into<ServiceId>,
        plan_id: impl Into<ServicePlanId>,
        namespace: impl Into<Namespace>,
    ) -> Self {
        let mut context = Map::new();
        context.insert(
            NAMESPACE_CONTEXT_KEY.to_string(),
            Value::String(namespace.into().to_string()),
        );
        Self {
            instance_id: instance_id.into(),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            accepts_incomplete: true,
            parameters: Map::new(),
            context,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match self.context.get(NAMESPACE_CONTEXT_KEY) {
            Some(Value::String(ns)) if !ns.is_empty() => Some(Namespace::from(ns.as_str())),
            _ => None,
        }
    }

    /// Hex SHA-256 of the parameters serialized with sorted keys
    pub fn params_hash(&self) -> String {
        params_hash(&self.parameters)
    }
}

pub fn params_hash(parameters: &Map<String, Value>) -> String {
    use sha2::Digest as _;
    let canonical = Value::Object(parameters.clone()).to_string();
    let digest = sha2::Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(rename = "async")]
    pub is_async: bool,
    pub operation_key: Option<OperationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionRequest {
    pub instance_id: InstanceId,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
    #[serde(default)]
    pub accepts_incomplete: bool,
}

impl DeprovisionRequest {
    pub fn new(
        instance_id: impl Into<InstanceId>,
        service_id: impl Into<ServiceId>,
        plan_id: impl Into<ServicePlanId>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            accepts_incomplete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionResponse {
    #[serde(rename = "async")]
    pub is_async: bool,
    pub operation_key: Option<OperationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperationRequest {
    pub instance_id: InstanceId,
    pub operation_key: Option<OperationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperationResponse {
    pub state: OperationState,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub instance_id: InstanceId,
    pub binding_id: String,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    pub credentials: Credentials,
}

/// Enough of a stored instance to re-run an interrupted provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreProvisionRequest {
    pub instance_id: InstanceId,
    pub operation_id: OperationId,
    pub namespace: Namespace,
    pub service_id: ServiceId,
    pub plan_id: ServicePlanId,
}

impl RestoreProvisionRequest {
    pub fn from_instance(instance: &Instance, operation_id: OperationId) -> Self {
        Self {
            instance_id: instance.id.clone(),
            operation_id,
            namespace: instance.namespace.clone(),
            service_id: instance.service_id.clone(),
            plan_id: instance.service_plan_id.clone(),
        }
    }
}
