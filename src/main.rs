use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::api::Api;
use service_operator::controller::{
    self, KubeEventSink, KubeStore, ServiceReconciler, WorkloadIntrospector,
};
use service_operator::crd::ServiceInstance;
use service_operator::leader::LeaderElector;
use service_operator::telemetry::{self, TelemetryConfig};
use service_operator::{Error, OperatorConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// Show cluster information
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator configuration file (TOML)
    #[arg(long, env = "OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch; all namespaces when omitted
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Instances reconciled in parallel
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    /// Port of the REST API and metrics endpoint
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Deadline for a single reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 120)]
    reconcile_timeout_secs: u64,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect; all namespaces when omitted
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("service-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: Api<ServiceInstance> = match &args.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let instances = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;
    println!("Managed services: {}", instances.items.len());

    let features = controller::store::discover_features(&client).await;
    println!("Monitoring (ServiceMonitor): {}", features.monitoring);
    println!("Dashboards (GrafanaDashboard): {}", features.dashboards);
    println!("Messaging (KafkaTopic): {}", features.messaging);
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    telemetry::init_telemetry(&TelemetryConfig {
        json_logs: args.json_logs,
        ..Default::default()
    })?;

    info!("Starting service-operator v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(OperatorConfig::load(args.config.as_deref())?);

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Leader election configuration
    let leader_namespace = std::env::var("POD_NAMESPACE")
        .ok()
        .or_else(|| args.namespace.clone())
        .unwrap_or_else(|| "default".to_string());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    let is_leader = Arc::new(AtomicBool::new(false));
    let elector = LeaderElector::new(client.clone(), &leader_namespace, &holder_identity);
    tokio::spawn(elector.run(Arc::clone(&is_leader)));

    let store = KubeStore::discover(client.clone()).await;
    let reconciler = ServiceReconciler::new(
        Arc::new(store),
        Arc::new(KubeEventSink::new(client.clone())),
        WorkloadIntrospector::new(config.http_timeout())?,
        Arc::clone(&config),
    );

    // Create shared controller state
    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
        reconciler,
        is_leader: Arc::clone(&is_leader),
        namespace: args.namespace.clone(),
        reconcile_timeout: Duration::from_secs(args.reconcile_timeout_secs),
    });

    // Start the REST API server
    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = service_operator::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let result = controller::run_controller(state, args.concurrency).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}
