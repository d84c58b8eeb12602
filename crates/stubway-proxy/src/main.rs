use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stubway_proxy::config::{Config, ConfigHandle, RoutingSnapshot};
use stubway_proxy::proxy::{create_http_client, ProxyServer, RequestContext};
use stubway_proxy::stub::StubStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stubway", about = "Development-time stubbing HTTP proxy")]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for captured responses (overrides the config file)
    #[arg(short, long)]
    stub_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "stubway_proxy=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::from_file(&args.config)?;
    info!(path = %args.config.display(), hosts = config.hosts.len(), "configuration loaded");

    let handle = Arc::new(ConfigHandle::new(RoutingSnapshot::from_config(&config)));
    // The watcher stops when dropped; keep it alive for the process lifetime.
    let _watcher = stubway_proxy::config::spawn_config_watcher(&args.config, Arc::clone(&handle))?;

    let stub_root = args
        .stub_root
        .or_else(|| config.stub_root.clone())
        .unwrap_or_else(|| PathBuf::from("./stubs"));
    info!(root = %stub_root.display(), "stub store ready");

    let ctx = RequestContext {
        client: create_http_client(&config.connection_pool),
        store: Arc::new(StubStore::new(stub_root)),
        config: handle,
    };

    let port = args.port.unwrap_or(config.listen.port);
    let server = ProxyServer::bind(([0, 0, 0, 0], port).into(), ctx).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
