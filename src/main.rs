use anyhow::Context;
use clap::Parser;
use koda_call_signal::{RelayConfig, RelayState, RoutingMode, relay};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "koda-call-relay")]
#[command(about = "Signaling relay for two-party browser calls")]
struct Cli {
    /// Address to listen on (overrides SIGNAL_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// broadcast | targeted (overrides SIGNAL_ROUTING)
    #[arg(long)]
    routing: Option<RoutingMode>,

    /// Seconds between keep-alive pings (overrides SIGNAL_PING_INTERVAL_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    ping_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(routing) = cli.routing {
        config.routing = routing;
    }
    if let Some(secs) = cli.ping_interval {
        config.ping_interval = std::time::Duration::from_secs(secs);
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(
        "Signal relay listening on {} ({:?} routing)",
        config.bind_addr, config.routing
    );

    relay::serve(listener, RelayState::new(&config))
        .await
        .context("relay server stopped")
}
