// Ordered checker chain

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{
    AccessError, CanProvisionOutput, MappingExistsProvisionChecker, MappingSource, ProvisionChecker,
    UniquenessProvisionChecker,
};
use crate::catalog::ApplicationFinder;
use crate::model::{ApplicationServiceId, InstanceId, Namespace};
use crate::storage::InstanceStorage;

/// Runs checkers in order; the first error or denial ends the evaluation
#[derive(Default)]
pub struct ProvisionCheckerChain {
    checkers: Vec<Arc<dyn ProvisionChecker>>,
}

impl ProvisionCheckerChain {
    pub fn new(checkers: Vec<Arc<dyn ProvisionChecker>>) -> Self {
        Self { checkers }
    }

    /// Mapping check, followed by the uniqueness check unless API packages
    /// allow several instances of one service class per namespace
    pub fn standard(
        applications: Arc<dyn ApplicationFinder>,
        mappings: Arc<dyn MappingSource>,
        instances: Arc<dyn InstanceStorage>,
        api_packages_support: bool,
    ) -> Self {
        let mut chain = Self::default();
        chain.push(Arc::new(MappingExistsProvisionChecker::new(applications, mappings)));
        if !api_packages_support {
            chain.push(Arc::new(UniquenessProvisionChecker::new(instances)));
        }
        chain
    }

    pub fn push(&mut self, checker: Arc<dyn ProvisionChecker>) {
        self.checkers.push(checker);
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

#[async_trait]
impl ProvisionChecker for ProvisionCheckerChain {
    async fn can_provision(
        &self,
        instance_id: &InstanceId,
        application_service_id: &ApplicationServiceId,
        namespace: &Namespace,
        max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError> {
        for checker in &self.checkers {
            let out = checker
                .can_provision(instance_id, application_service_id, namespace, max_wait)
                .await?;
            if !out.allowed {
                return Ok(out);
            }
        }
        Ok(CanProvisionOutput::allowed())
    }
}
