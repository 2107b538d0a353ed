//! Launchpad log relay server.

use clap::Parser;
use launchpad_relay::{AppState, RelayHub, routes, run_bridge};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad-relay")]
#[command(about = "Fan build logs out to WebSocket viewers", version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:9002")]
    bind: SocketAddr,

    /// Log broker
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let client = redis::Client::open(args.redis_url.as_str())?;
    let hub = Arc::new(RelayHub::default());
    tokio::spawn(run_bridge(client, hub.clone()));

    let app = routes::router(AppState::new(hub))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting relay on {}", args.bind);
    let listener = TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down relay");
        })
        .await?;

    Ok(())
}
