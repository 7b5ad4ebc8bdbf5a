// Access gate for provisioning
//
// A provision only succeeds when every checker in the chain allows it. A denial
// is an ordinary answer carried in `CanProvisionOutput`; `AccessError` is kept
// for failures to reach a decision at all.

pub mod chain;
pub mod mapping;
pub mod uniqueness;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::{ApplicationServiceId, InstanceId, Namespace};
use crate::storage::StorageError;

pub use chain::ProvisionCheckerChain;
pub use mapping::{InMemoryMappingRegistry, MappingEvent, MappingExistsProvisionChecker, MappingSource};
pub use uniqueness::UniquenessProvisionChecker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanProvisionOutput {
    pub allowed: bool,
    pub reason: String,
}

impl CanProvisionOutput {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("application for service [{service_id}] not found")]
    ApplicationNotFound { service_id: ApplicationServiceId },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("watch on application mappings in namespace [{namespace}] closed")]
    WatchClosed { namespace: Namespace },

    #[error("while listing application mappings in namespace [{namespace}]: {message}")]
    Mappings { namespace: Namespace, message: String },
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ProvisionChecker: Send + Sync {
    /// Decide whether `instance_id` may be provisioned for the application
    /// service in `namespace`. Only the mapping check waits, for at most `max_wait`.
    async fn can_provision(
        &self,
        instance_id: &InstanceId,
        application_service_id: &ApplicationServiceId,
        namespace: &Namespace,
        max_wait: Duration,
    ) -> Result<CanProvisionOutput, AccessError>;
}
