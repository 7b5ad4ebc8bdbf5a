// Instance state derived from the operation log
//
// Answers are computed from the ordered operation history on every call. The
// scan order is load-bearing: a completed create only counts until a later
// completed remove, and the first in-progress operation of a kind wins even
// when later entries exist.

use std::sync::Arc;

use super::errors::BrokerError;
use crate::model::{InstanceId, InstanceOperation, OperationId, OperationState, OperationType};
use crate::storage::OperationStorage;

/// True once a `(kind, succeeded)` entry is seen, false again at the first
/// following `(reverse, succeeded)`
fn is_completed(ops: &[InstanceOperation], kind: OperationType, reverse: OperationType) -> bool {
    let mut completed = false;
    for op in ops {
        if op.is(kind, OperationState::Succeeded) {
            completed = true;
        }
        if completed && op.is(reverse, OperationState::Succeeded) {
            return false;
        }
    }
    completed
}

fn first_in_progress(ops: &[InstanceOperation], kind: OperationType) -> Option<OperationId> {
    ops.iter()
        .find(|op| op.is(kind, OperationState::InProgress))
        .map(|op| op.operation_id.clone())
}

pub fn provisioned(ops: &[InstanceOperation]) -> bool {
    is_completed(ops, OperationType::Create, OperationType::Remove)
}

pub fn provisioning_in_progress(ops: &[InstanceOperation]) -> Option<OperationId> {
    first_in_progress(ops, OperationType::Create)
}

pub fn deprovisioned(ops: &[InstanceOperation]) -> bool {
    is_completed(ops, OperationType::Remove, OperationType::Create)
}

pub fn deprovisioning_in_progress(ops: &[InstanceOperation]) -> Option<OperationId> {
    first_in_progress(ops, OperationType::Remove)
}

#[derive(Clone)]
pub struct InstanceStateService {
    operations: Arc<dyn OperationStorage>,
}

impl InstanceStateService {
    pub fn new(operations: Arc<dyn OperationStorage>) -> Self {
        Self { operations }
    }

    /// `None` when the instance has no recorded history
    async fn history(&self, instance_id: &InstanceId) -> Result<Option<Vec<InstanceOperation>>, BrokerError> {
        match self.operations.get_all(instance_id).await {
            Ok(ops) => Ok(Some(ops)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(BrokerError::storage("while getting operations from storage", e)),
        }
    }

    pub async fn is_provisioned(&self, instance_id: &InstanceId) -> Result<bool, BrokerError> {
        Ok(self
            .history(instance_id)
            .await?
            .is_some_and(|ops| provisioned(&ops)))
    }

    pub async fn is_provisioning_in_progress(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<OperationId>, BrokerError> {
        Ok(self
            .history(instance_id)
            .await?
            .and_then(|ops| provisioning_in_progress(&ops)))
    }

    pub async fn is_deprovisioned(&self, instance_id: &InstanceId) -> Result<bool, BrokerError> {
        Ok(self
            .history(instance_id)
            .await?
            .is_some_and(|ops| deprovisioned(&ops)))
    }

    pub async fn is_deprovisioning_in_progress(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<OperationId>, BrokerError> {
        Ok(self
            .history(instance_id)
            .await?
            .and_then(|ops| deprovisioning_in_progress(&ops)))
    }
}
