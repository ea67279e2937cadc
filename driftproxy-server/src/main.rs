//! Binary entry point: wires discovery, resolution, proxying, and the admin
//! control plane onto a single axum router on one tokio runtime.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use axum::Router;
use clap::Parser;
use driftproxy_admin::AdminState;
use driftproxy_core::DriftProxyConfig;
use driftproxy_discovery::{CommandProcessProbe, ContainerSnapshot, DockerContainerProbe, ProcessSnapshot};
use driftproxy_observability::Metrics;
use driftproxy_proxy::{ReverseProxyForwarder, RoutingDispatcher, UpstreamAddressBuilder};
use driftproxy_resolver::{PortRebinder, ResolverGateway, SingleflightResolver};
use driftproxy_store::MappingStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "driftproxy", version, about = "Local *.localhost reverse proxy with LLM-judged routing")]
struct Cli {
    /// Path to a driftproxy.yaml configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Log level, e.g. "info", "debug", "driftproxy=debug".
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the HTTP/WebSocket listener address.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Override the LLM judge credential (also settable via DRIFTPROXY_API_KEY).
    #[arg(long, env = "DRIFTPROXY_API_KEY")]
    api_key: Option<String>,

    /// Override the chat model passed to the judge.
    #[arg(long)]
    model: Option<String>,

    /// Override the persisted mapping file path.
    #[arg(long)]
    cache_file: Option<String>,

    /// Own compose/stack project name, filtered out of container inventory.
    #[arg(long)]
    own_project: Option<String>,

    /// Reserved hostname that serves the debug dashboard.
    #[arg(long)]
    debug_host: Option<String>,

    /// Accepted hostname suffix for the TLS-admission check.
    #[arg(long)]
    admission_suffix: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "driftproxy starting");

    let mut config = DriftProxyConfig::load(cli.config.as_deref())?;
    if let Some(addr) = &cli.listen_addr {
        config.listen_addr = addr.parse()?;
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key.clone();
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(cache_file) = cli.cache_file {
        config.cache_file = cache_file.into();
    }
    if cli.own_project.is_some() {
        config.own_project = cli.own_project.clone();
    }
    if let Some(debug_host) = cli.debug_host {
        config.debug_host = debug_host;
    }
    if let Some(admission_suffix) = cli.admission_suffix {
        config.admission_suffix = admission_suffix;
    }

    if !config.can_resolve() {
        tracing::warn!("no LLM API key configured — unseen hostnames will fail to resolve");
    }

    let config = Arc::new(config);

    let store = Arc::new(MappingStore::new(config.cache_file.clone()));
    if let Err(e) = store.load() {
        tracing::warn!(error = %e, "failed to load persisted mappings, starting empty");
    }

    let probe_timeout = Duration::from_secs(config.probe_timeout_secs);
    let snapshot_ttl = Duration::from_secs(config.process_snapshot_ttl_secs);

    let processes = Arc::new(ProcessSnapshot::new(
        Box::new(CommandProcessProbe::new(probe_timeout)),
        snapshot_ttl,
    ));
    let containers = Arc::new(ContainerSnapshot::new(
        Box::new(DockerContainerProbe::new(probe_timeout)),
        config.own_project.clone(),
        snapshot_ttl,
    ));

    let gateway = Arc::new(ResolverGateway::new(
        config.api_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
        Duration::from_secs(config.llm_timeout_secs),
    ));
    let resolver = Arc::new(SingleflightResolver::new(gateway, Arc::clone(&store)));
    let rebinder = Arc::new(PortRebinder::new(Arc::clone(&processes)));
    let address_builder = Arc::new(UpstreamAddressBuilder::new(rebinder, Arc::clone(&containers)));
    let forwarder = Arc::new(ReverseProxyForwarder::new());
    let metrics = Arc::new(Metrics::new()?);

    let admin_state = Arc::new(AdminState {
        config: Arc::clone(&config),
        store: Arc::clone(&store),
        processes: Arc::clone(&processes),
        containers: Arc::clone(&containers),
        metrics: Arc::clone(&metrics),
    });

    let dispatcher = Arc::new(RoutingDispatcher {
        config: Arc::clone(&config),
        store,
        processes,
        containers,
        resolver,
        address_builder,
        forwarder,
        control_plane: admin_state,
        metrics,
    });

    let app = Router::new()
        .fallback(proxy_fallback)
        .with_state(dispatcher);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "driftproxy is ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("driftproxy stopped");
    Ok(())
}

async fn proxy_fallback(
    State(dispatcher): State<Arc<RoutingDispatcher>>,
    req: Request<Body>,
) -> Response<Body> {
    dispatcher.handle(req).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
