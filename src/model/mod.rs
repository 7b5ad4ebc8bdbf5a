// Broker domain model - instances, their operation log and the application catalog
//
// The operation log is the source of truth for instance state; `Instance::state`
// is only a cache written when a workflow finishes.

pub mod application;
pub mod ids;
pub mod instance;
pub mod operation;

pub use application::{Application, ApplicationMapping, Service};
pub use ids::{
    ApplicationName, ApplicationServiceId, InstanceId, Namespace, OperationId, ServiceId,
    ServicePlanId,
};
pub use instance::{Instance, InstanceState};
pub use operation::{
    InstanceOperation, OperationState, OperationType, DEPROVISIONING_SUCCEEDED,
    PROVISIONING_SUCCEEDED,
};
