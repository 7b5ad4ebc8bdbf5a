use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

use application_broker::broker::{DeprovisionRequest, LastOperationRequest, ProvisionRequest};
use application_broker::model::InstanceId;
use application_broker::{
    init_telemetry, shutdown_telemetry, BrokerApp, BrokerConfig, ShutdownCoordinator,
};

#[derive(Parser)]
#[command(name = "application-broker")]
#[command(about = "Open Service Broker for externally exposed application services")]
#[command(long_about = "Provisions and deprovisions access to application services in namespaces. \
                       Instance state is derived from an append-only operation log; background \
                       work is drained before the command exits.")]
struct Cli {
    /// Configuration file (defaults to application-broker.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision an instance of an application service
    Provision {
        #[arg(long)]
        instance_id: String,
        #[arg(long)]
        service_id: String,
        #[arg(long)]
        plan_id: String,
        #[arg(long)]
        namespace: String,
        /// Provisioning parameters as a JSON object (API packages only)
        #[arg(long)]
        params: Option<String>,
    },
    /// Deprovision an instance
    Deprovision {
        #[arg(long)]
        instance_id: String,
        #[arg(long)]
        service_id: String,
        #[arg(long)]
        plan_id: String,
    },
    /// Show the state of an operation, or of the latest one
    LastOperation {
        #[arg(long)]
        instance_id: String,
        #[arg(long)]
        operation_key: Option<String>,
    },
    /// Show the stored instance and the state derived from its operation log
    Status {
        #[arg(long)]
        instance_id: String,
    },
    /// Resume provisions and deprovisions interrupted by a restart
    Populate,
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct InstanceStatus {
    instance: Option<application_broker::model::Instance>,
    provisioned: bool,
    provisioning_in_progress: Option<String>,
    deprovisioned: bool,
    deprovisioning_in_progress: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_params(raw: Option<String>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(&raw).context("--params is not valid JSON")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("--params must be a JSON object"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    BrokerConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => BrokerConfig::load_from(Some(path))?,
        None => BrokerConfig::load()?,
    };

    if let Commands::Config { save } = &cli.command {
        if let Some(path) = save {
            config.save_to_file(path)?;
            println!("Configuration written to {}", path.display());
        } else {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        return Ok(());
    }

    init_telemetry(&config.observability)?;
    let app = BrokerApp::from_config(&config).await?;
    let started = run(&app, cli.command).await;

    let coordinator = ShutdownCoordinator::new(app.spawner.clone(), config.shutdown_timeout());
    let drained = tokio::select! {
        drained = coordinator.shutdown() => drained,
        signal = ShutdownCoordinator::wait_for_signal() => {
            signal?;
            false
        }
    };

    // Report where the background work ended up
    if let Ok(Some(instance_id)) = &started {
        let last = app
            .broker
            .last_operation(&LastOperationRequest {
                instance_id: instance_id.clone(),
                operation_key: None,
            })
            .await?;
        print_json(&last)?;
    }

    shutdown_telemetry();
    started?;
    if !drained {
        anyhow::bail!("background work did not finish, it is resumed by `populate` on the next start");
    }
    Ok(())
}

/// Runs one command. Returns the instance whose background work should be reported.
async fn run(app: &BrokerApp, command: Commands) -> Result<Option<InstanceId>> {
    match command {
        Commands::Provision {
            instance_id,
            service_id,
            plan_id,
            namespace,
            params,
        } => {
            let req = ProvisionRequest::new(instance_id, service_id, plan_id, namespace)
                .with_parameters(parse_params(params)?);
            let resp = app.broker.provision(&req).await?;
            print_json(&resp)?;
            Ok(resp.is_async.then(|| req.instance_id.clone()))
        }
        Commands::Deprovision {
            instance_id,
            service_id,
            plan_id,
        } => {
            let req = DeprovisionRequest::new(instance_id, service_id, plan_id);
            let resp = app.broker.deprovision(&req).await?;
            print_json(&resp)?;
            Ok(resp.is_async.then(|| req.instance_id.clone()))
        }
        Commands::LastOperation {
            instance_id,
            operation_key,
        } => {
            let resp = app
                .broker
                .last_operation(&LastOperationRequest {
                    instance_id: instance_id.into(),
                    operation_key: operation_key.map(Into::into),
                })
                .await?;
            print_json(&resp)?;
            Ok(None)
        }
        Commands::Status { instance_id } => {
            let id = InstanceId::from(instance_id);
            let instance = match app.instances.get(&id).await {
                Ok(instance) => Some(instance),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            let state = app.broker.state();
            print_json(&InstanceStatus {
                instance,
                provisioned: state.is_provisioned(&id).await?,
                provisioning_in_progress: state
                    .is_provisioning_in_progress(&id)
                    .await?
                    .map(|op| op.to_string()),
                deprovisioned: state.is_deprovisioned(&id).await?,
                deprovisioning_in_progress: state
                    .is_deprovisioning_in_progress(&id)
                    .await?
                    .map(|op| op.to_string()),
            })?;
            Ok(None)
        }
        Commands::Populate => {
            let report = app.broker.populator().populate().await?;
            print_json(&report)?;
            Ok(None)
        }
        Commands::Config { .. } => Ok(None),
    }
}
