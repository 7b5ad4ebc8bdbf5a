// Broker error types

use thiserror::Error;

use crate::model::{InstanceId, OperationId};
use crate::resources::ResourceError;
use crate::storage::StorageError;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_CONFLICT: u16 = 409;

/// Synchronous provisioning failure with the status code an OSB layer returns
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Status: {status_code}; ErrorMessage: {error_message}")]
pub struct HttpStatusCodeError {
    pub status_code: u16,
    pub error_message: String,
    pub description: Option<String>,
}

impl HttpStatusCodeError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_BAD_REQUEST,
            error_message: message.into(),
            description: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_CONFLICT,
            error_message: message.into(),
            description: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    Validation(String),

    #[error("instance [{instance_id}] not found")]
    InstanceNotFound { instance_id: InstanceId },

    #[error("operation for instance [{instance_id}] not found")]
    OperationNotFound {
        instance_id: InstanceId,
        operation_id: Option<OperationId>,
    },

    /// Deprovisioning is refused until the running create finishes
    #[error("provisioning of instance [{instance_id}] is still in progress (operation [{operation_id}])")]
    ProvisioningInProgress {
        instance_id: InstanceId,
        operation_id: OperationId,
    },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: ResourceError,
    },

    #[error("while generating ID for operation: {0}")]
    OperationId(String),
}

impl BrokerError {
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        BrokerError::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn resource(context: impl Into<String>, source: ResourceError) -> Self {
        BrokerError::Resource {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::InstanceNotFound { .. } | BrokerError::OperationNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_context_is_prefixed() {
        let err = BrokerError::storage(
            "while getting operations from storage",
            StorageError::Backend("connection reset".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "while getting operations from storage: storage backend error: connection reset"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(HttpStatusCodeError::bad_request("x").status_code, 400);
        assert_eq!(HttpStatusCodeError::conflict("x").status_code, 409);
        assert!(BrokerError::InstanceNotFound {
            instance_id: "i".into()
        }
        .is_not_found());
    }
}
