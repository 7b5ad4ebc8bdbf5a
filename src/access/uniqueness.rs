// One active instance per service plan and namespace

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{AccessError, CanProvisionOutput, ProvisionChecker};
use crate::model::{ApplicationServiceId, InstanceId, InstanceState, Namespace};
use crate::storage::{InstanceQuery, InstanceStorage};

/// Denies when another non-failed instance of the same service and plan
/// already lives in the namespace
pub struct UniquenessProvisionChecker {
    instances: Arc<dyn InstanceStorage>,
}

impl UniquenessProvisionChecker {
    pub fn new(instances: Arc<dyn InstanceStorage>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl ProvisionChecker for UniquenessProvisionChecker {
    async fn can_provision(
        &self,
        instance_id: &InstanceId,
        _application_service_id: &ApplicationServiceId,
        namespace: &Namespace,
        _max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError> {
        let instance = self
            .instances
            .get(instance_id)
            .await
            .map_err(|source| AccessError::Storage {
                context: format!("while getting instance [{instance_id}] from storage"),
                source,
            })?;

        let query = InstanceQuery::same_kind(namespace, &instance.service_id, &instance.service_plan_id)
            .not_in_state(InstanceState::Failed)
            .excluding(instance_id);
        let existing = self
            .instances
            .find_one(&query)
            .await
            .map_err(|source| AccessError::Storage {
                context: "while searching for instances of the same service plan".to_string(),
                source,
            })?;

        match existing {
            Some(other) => {
                debug!(instance_id = %instance_id, existing = %other.id, namespace = %namespace, "Instance of the same plan already exists");
                Ok(CanProvisionOutput::denied(format!(
                    "already activated in the [{}] namespace by instance [{}]",
                    namespace, other.id
                )))
            }
            None => Ok(CanProvisionOutput::allowed()),
        }
    }
}
