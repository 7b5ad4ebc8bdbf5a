// Repopulation after restart
//
// Background work dies with the process. On startup every stored instance is
// checked for a create or remove operation still marked in progress and the
// matching background phase is started again.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::state::{deprovisioning_in_progress, provisioning_in_progress};
use crate::broker::{BrokerError, DeprovisionService, ProvisionService, RestoreProvisionRequest};
use crate::model::InstanceId;
use crate::storage::{InstanceQuery, InstanceStorage, OperationStorage};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PopulationReport {
    pub instances: usize,
    pub resumed_provisions: Vec<InstanceId>,
    pub resumed_deprovisions: Vec<InstanceId>,
    pub failed: Vec<InstanceId>,
}

pub struct InstancePopulator {
    instances: Arc<dyn InstanceStorage>,
    operations: Arc<dyn OperationStorage>,
    provision: ProvisionService,
    deprovision: DeprovisionService,
}

impl InstancePopulator {
    pub fn new(
        instances: Arc<dyn InstanceStorage>,
        operations: Arc<dyn OperationStorage>,
        provision: ProvisionService,
        deprovision: DeprovisionService,
    ) -> Self {
        Self {
            instances,
            operations,
            provision,
            deprovision,
        }
    }

    /// Resume interrupted workflows. A pending removal takes precedence over
    /// a pending create of the same instance.
    pub async fn populate(&self) -> Result<PopulationReport, BrokerError> {
        let instances = self
            .instances
            .find_all(&InstanceQuery::all())
            .await
            .map_err(|e| BrokerError::storage("while listing instances from storage", e))?;

        let mut report = PopulationReport {
            instances: instances.len(),
            ..PopulationReport::default()
        };

        for instance in instances {
            let ops = match self.operations.get_all(&instance.id).await {
                Ok(ops) => ops,
                Err(e) if e.is_not_found() => {
                    warn!(instance_id = %instance.id, "Instance without operation history, skipping");
                    continue;
                }
                Err(e) => return Err(BrokerError::storage("while getting operations from storage", e)),
            };

            if let Some(operation_id) = deprovisioning_in_progress(&ops) {
                report.resumed_deprovisions.push(instance.id.clone());
                self.deprovision.resume(instance, operation_id);
            } else if let Some(operation_id) = provisioning_in_progress(&ops) {
                let instance_id = instance.id.clone();
                match self
                    .provision
                    .resume(RestoreProvisionRequest::from_instance(&instance, operation_id))
                    .await
                {
                    Ok(()) => report.resumed_provisions.push(instance_id),
                    Err(e) => {
                        warn!(instance_id = %instance_id, error = %e, "Cannot resume provisioning");
                        report.failed.push(instance_id);
                    }
                }
            }
        }

        info!(
            instances = report.instances,
            provisions = report.resumed_provisions.len(),
            deprovisions = report.resumed_deprovisions.len(),
            failed = report.failed.len(),
            "Instance population finished"
        );
        Ok(report)
    }
}
