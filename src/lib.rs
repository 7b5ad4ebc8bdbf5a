// Application Broker Library - asynchronous OSB instance lifecycle engine
// This exposes the core components for testing and integration

pub mod access;
pub mod app;
pub mod broker;
pub mod catalog;
pub mod config;
pub mod model;
pub mod populator;
pub mod resources;
pub mod shutdown;
pub mod storage;
pub mod telemetry;

// Re-export key types for easy access
pub use access::{CanProvisionOutput, ProvisionChecker, ProvisionCheckerChain};
pub use app::BrokerApp;
pub use broker::{
    Broker, BrokerDeps, BrokerError, BrokerSettings, HttpStatusCodeError, TaskSpawner,
    TokioTaskSpawner,
};
pub use config::BrokerConfig;
pub use populator::{InstancePopulator, PopulationReport};
pub use shutdown::ShutdownCoordinator;
pub use storage::{InstanceStorage, OperationStorage, StorageError};
pub use telemetry::{create_operation_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
