// Operation ID generation

use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::errors::BrokerError;
use crate::model::OperationId;

#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait OperationIdProvider: Send + Sync {
    fn new_operation_id(&self) -> Result<OperationId, BrokerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidOperationIdProvider;

impl OperationIdProvider for UuidOperationIdProvider {
    fn new_operation_id(&self) -> Result<OperationId, BrokerError> {
        Ok(OperationId::new(Uuid::new_v4().to_string()))
    }
}
