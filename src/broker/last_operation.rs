// Last operation query

use std::sync::Arc;

use super::errors::BrokerError;
use super::types::{LastOperationRequest, LastOperationResponse};
use crate::storage::{OperationStorage, StorageError};

#[derive(Clone)]
pub struct LastOperationService {
    operations: Arc<dyn OperationStorage>,
}

impl LastOperationService {
    pub fn new(operations: Arc<dyn OperationStorage>) -> Self {
        Self { operations }
    }

    /// State of the operation named by the key, or of the latest operation
    /// when no key is given
    pub async fn last_operation(&self, req: &LastOperationRequest) -> Result<LastOperationResponse, BrokerError> {
        let found = match &req.operation_key {
            Some(key) => self.operations.get(&req.instance_id, key).await,
            None => self
                .operations
                .get_all(&req.instance_id)
                .await
                .and_then(|ops| {
                    ops.last().cloned().ok_or_else(|| StorageError::OperationsNotFound {
                        instance_id: req.instance_id.clone(),
                    })
                }),
        };

        match found {
            Ok(op) => Ok(LastOperationResponse {
                state: op.state,
                description: op.state_description,
            }),
            Err(e) if e.is_not_found() => Err(BrokerError::OperationNotFound {
                instance_id: req.instance_id.clone(),
                operation_id: req.operation_key.clone(),
            }),
            Err(e) => Err(BrokerError::storage("while getting instance operation from storage", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceOperation, OperationState, OperationType};
    use crate::storage::InMemoryOperationStorage;

    #[tokio::test]
    async fn test_by_key_and_latest() {
        let storage = Arc::new(InMemoryOperationStorage::new());
        for (id, op_type) in [("op-1", OperationType::Create), ("op-2", OperationType::Remove)] {
            storage
                .insert(&InstanceOperation::in_progress("i-1".into(), id.into(), op_type, None))
                .await
                .unwrap();
        }
        storage
            .update_state_desc(&"i-1".into(), &"op-1".into(), OperationState::Failed, Some("nope".to_string()))
            .await
            .unwrap();
        let svc = LastOperationService::new(storage);

        let by_key = svc
            .last_operation(&LastOperationRequest {
                instance_id: "i-1".into(),
                operation_key: Some("op-1".into()),
            })
            .await
            .unwrap();
        assert_eq!(by_key.state, OperationState::Failed);
        assert_eq!(by_key.description.as_deref(), Some("nope"));

        let latest = svc
            .last_operation(&LastOperationRequest {
                instance_id: "i-1".into(),
                operation_key: None,
            })
            .await
            .unwrap();
        assert_eq!(latest.state, OperationState::InProgress);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_not_found() {
        let svc = LastOperationService::new(Arc::new(InMemoryOperationStorage::new()));
        let err = svc
            .last_operation(&LastOperationRequest {
                instance_id: "i-1".into(),
                operation_key: Some("op-1".into()),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
