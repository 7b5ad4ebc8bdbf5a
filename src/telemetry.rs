use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::{LogFormat, ObservabilityConfig};
use crate::model::{InstanceId, OperationId};

/// Initialize structured logging.
/// RUST_LOG wins over the configured level when set.
pub fn init_telemetry(observability: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match observability.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    tracing::info!(
        log_level = %observability.log_level,
        "Application broker telemetry initialized"
    );
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span carrying the instance and operation of a workflow step
pub fn create_operation_span(
    operation: &str,
    instance_id: &InstanceId,
    operation_id: Option<&OperationId>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "instance_lifecycle",
        operation = operation,
        instance.id = instance_id.as_str(),
        operation.id = operation_id.map(|id| id.as_str()),
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    // For structured logging, no explicit shutdown needed
    tracing::info!("Application broker telemetry shutdown complete");
}
