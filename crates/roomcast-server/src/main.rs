//! roomcast reference server
//!
//! Endpoints:
//! - `/echo`: sends every frame back
//! - `/auth?token=...&user=...`: echo behind a token check
//! - `/room`: JSON commands to join, leave and publish to rooms
//! - `/chat/{room}`: joins `room` and broadcasts every frame to it
//!
//! Run with: `cargo run -p roomcast-server -- --transport memory`
//! Test with a WebSocket client (e.g., websocat):
//!   websocat ws://localhost:8080/chat/lobby

mod cli;
mod controllers;
mod middleware;

use clap::Parser;
use cli::Cli;
use roomcast_ws::prelude::*;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    roomcast_ws::load_dotenv();
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,roomcast=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let cli = Cli::parse();
    let config = cli.apply(WsConfig::from_env()?);

    let reporter = ErrorReporter::default();
    let hub = adapter::connect(&config, &reporter).await?;

    let service = WsServer::new(config)
        .with_adapter(hub)
        .error_reporter(reporter)
        .controllers(controllers::registry())
        .use_middleware(middleware::log_connection)
        .route_named("/echo", Vec::new(), "home.echo")?
        .route_with(
            "/auth",
            vec![middleware::require_token(cli.auth_token.as_str())],
            controllers::echo,
        )
        .route_named("/room", Vec::new(), "home.room")?
        .route_named(
            "/chat/{room}",
            vec![middleware::require_token(cli.auth_token.as_str())],
            "home.chat",
        )?
        .build();

    let listener = TcpListener::bind(&cli.addr).await?;
    tracing::info!(addr = %listener.local_addr()?, routes = ?service.routes(), "roomcast server listening");

    service
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}
