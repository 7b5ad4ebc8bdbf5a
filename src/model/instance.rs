use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{InstanceId, Namespace, ServiceId, ServicePlanId};

/// Cached outcome of the latest workflow run for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    PendingDeletion,
    Succeeded,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::PendingDeletion => "pending-deletion",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Externally visible service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub namespace: Namespace,
    pub service_id: ServiceId,
    pub service_plan_id: ServicePlanId,
    pub state: InstanceState,
    pub params_hash: String,
}
