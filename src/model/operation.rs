use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{InstanceId, OperationId};

pub const PROVISIONING_SUCCEEDED: &str = "provisioning succeeded";
pub const DEPROVISIONING_SUCCEEDED: &str = "deprovision succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Remove,
}

/// OSB last-operation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => f.write_str("create"),
            OperationType::Remove => f.write_str("remove"),
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => f.write_str("in progress"),
            OperationState::Succeeded => f.write_str("succeeded"),
            OperationState::Failed => f.write_str("failed"),
        }
    }
}

/// One entry of an instance's append-only operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOperation {
    pub instance_id: InstanceId,
    pub operation_id: OperationId,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub state: OperationState,
    pub state_description: Option<String>,
    pub params_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InstanceOperation {
    /// New in-progress operation stamped with the current time
    pub fn in_progress(
        instance_id: InstanceId,
        operation_id: OperationId,
        op_type: OperationType,
        params_hash: Option<String>,
    ) -> Self {
        Self {
            instance_id,
            operation_id,
            op_type,
            state: OperationState::InProgress,
            state_description: None,
            params_hash,
            created_at: Utc::now(),
        }
    }

    pub fn is(&self, op_type: OperationType, state: OperationState) -> bool {
        self.op_type == op_type && self.state == state
    }
}
