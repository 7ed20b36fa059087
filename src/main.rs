//! Match server binary.
//!
//! Players connect over `/ws?ticket=...`; the ticket is verified at the
//! handshake and decides which match the socket joins. Each match runs as
//! its own task: a waiting room until the creator starts, a level fetched
//! from the level store, a countdown, then a fixed 33 ms physics loop that
//! streams snapshots until someone reaches the score goal.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ball_match_server::app::AppState;
use ball_match_server::config::Config;
use ball_match_server::game::MatchRegistry;
use ball_match_server::http::build_router;
use ball_match_server::util::time::{init_server_time, TICK_DURATION_MS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_server_time();

    info!(
        game_id = %config.game_id,
        level_store = %config.level_store_url,
        origins = %config.client_origin,
        tick_ms = TICK_DURATION_MS,
        min_players = config.min_players,
        countdown_secs = config.countdown_secs,
        "Match server configured"
    );

    let state = AppState::new(config.clone());
    let registry = state.match_registry.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(config.server_addr).await?;
    info!(addr = %config.server_addr, "Accepting match sockets on /ws");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_open_matches(&registry);
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Matches still open when the listener stops are dropped with the process
fn log_open_matches(registry: &Arc<MatchRegistry>) {
    info!(
        matches = registry.active_matches(),
        players = registry.total_players(),
        "Match server stopped"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, closing match sockets"),
        _ = terminate => info!("SIGTERM received, closing match sockets"),
    }
}
