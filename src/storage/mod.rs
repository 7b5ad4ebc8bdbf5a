// Instance and operation storage
//
// Storage backends hold no business logic. The broker relies on two properties:
// operations of an instance come back in insertion order, and "not found" is
// reported as a distinguishable error so callers can treat it as a valid answer.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{
    Instance, InstanceId, InstanceOperation, InstanceState, Namespace, OperationId,
    OperationState, ServiceId, ServicePlanId,
};

pub use file::FileSystemStorage;
pub use memory::{InMemoryInstanceStorage, InMemoryOperationStorage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("instance {instance_id} not found")]
    InstanceNotFound { instance_id: InstanceId },

    #[error("no operations found for instance {instance_id}")]
    OperationsNotFound { instance_id: InstanceId },

    #[error("operation {operation_id} of instance {instance_id} not found")]
    OperationNotFound {
        instance_id: InstanceId,
        operation_id: OperationId,
    },

    #[error("instance {instance_id} already exists")]
    InstanceAlreadyExists { instance_id: InstanceId },

    #[error("operation {operation_id} of instance {instance_id} already exists")]
    OperationAlreadyExists {
        instance_id: InstanceId,
        operation_id: OperationId,
    },

    #[error("operation {operation_id} of instance {instance_id} is already {current}, cannot move to {requested}")]
    IllegalTransition {
        instance_id: InstanceId,
        operation_id: OperationId,
        current: OperationState,
        requested: OperationState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::InstanceNotFound { .. }
                | StorageError::OperationsNotFound { .. }
                | StorageError::OperationNotFound { .. }
        )
    }
}

/// Filter over stored instances. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceQuery {
    pub namespace: Option<Namespace>,
    pub service_id: Option<ServiceId>,
    pub service_plan_id: Option<ServicePlanId>,
    pub state: Option<InstanceState>,
    pub exclude_state: Option<InstanceState>,
    pub exclude_id: Option<InstanceId>,
}

impl InstanceQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Instances of the same service and plan living in `namespace`
    pub fn same_kind(namespace: &Namespace, service_id: &ServiceId, plan_id: &ServicePlanId) -> Self {
        Self {
            namespace: Some(namespace.clone()),
            service_id: Some(service_id.clone()),
            service_plan_id: Some(plan_id.clone()),
            ..Self::default()
        }
    }

    pub fn in_state(mut self, state: InstanceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn not_in_state(mut self, state: InstanceState) -> Self {
        self.exclude_state = Some(state);
        self
    }

    pub fn excluding(mut self, id: &InstanceId) -> Self {
        self.exclude_id = Some(id.clone());
        self
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        self.namespace.as_ref().map_or(true, |ns| &instance.namespace == ns)
            && self
                .service_id
                .as_ref()
                .map_or(true, |id| &instance.service_id == id)
            && self
                .service_plan_id
                .as_ref()
                .map_or(true, |id| &instance.service_plan_id == id)
            && self.state.map_or(true, |state| instance.state == state)
            && self.exclude_state.map_or(true, |state| instance.state != state)
            && self.exclude_id.as_ref().map_or(true, |id| &instance.id != id)
    }
}

/// Collection of service instances keyed by instance ID
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait InstanceStorage: Send + Sync {
    async fn insert(&self, instance: &Instance) -> Result<(), StorageError>;

    /// Returns `StorageError::InstanceNotFound` for unknown IDs
    async fn get(&self, id: &InstanceId) -> Result<Instance, StorageError>;

    async fn remove(&self, id: &InstanceId) -> Result<(), StorageError>;

    async fn find_one(&self, query: &InstanceQuery) -> Result<Option<Instance>, StorageError>;

    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<Instance>, StorageError>;

    async fn update_state(&self, id: &InstanceId, state: InstanceState) -> Result<(), StorageError>;
}

/// Append-only operation log, one ordered sequence per instance
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait OperationStorage: Send + Sync {
    async fn insert(&self, operation: &InstanceOperation) -> Result<(), StorageError>;

    async fn get(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
    ) -> Result<InstanceOperation, StorageError>;

    /// All operations of an instance in insertion order.
    /// Returns `StorageError::OperationsNotFound` when the instance has no history.
    async fn get_all(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>, StorageError>;

    async fn update_state(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
    ) -> Result<(), StorageError>;

    async fn update_state_desc(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: Option<String>,
    ) -> Result<(), StorageError>;
}

/// Applies a state update to a stored operation, refusing to leave a terminal state
pub(crate) fn apply_operation_update(
    operation: &mut InstanceOperation,
    state: OperationState,
    description: Option<Option<String>>,
) -> Result<(), StorageError> {
    if operation.state.is_terminal() {
        return Err(StorageError::IllegalTransition {
            instance_id: operation.instance_id.clone(),
            operation_id: operation.operation_id.clone(),
            current: operation.state,
            requested: state,
        });
    }
    operation.state = state;
    if let Some(description) = description {
        operation.state_description = description;
    }
    Ok(())
}
