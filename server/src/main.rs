use std::sync::Arc;

use rocket::{
    Build, Rocket,
    fairing::{Fairing, Info, Kind},
};
use sweeper_server::{
    build_rocket, cleanup::start_cleanup_task, config::ServerConfig, dispatcher::Dispatcher,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct CleanupFairing;

#[rocket::async_trait]
impl Fairing for CleanupFairing {
    fn info(&self) -> Info {
        Info {
            name: "Cleanup Task",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        if let Some(dispatcher) = rocket.state::<Arc<Dispatcher>>() {
            info!("Starting cleanup task for session management");
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                start_cleanup_task(dispatcher).await;
            });
        } else {
            warn!("Failed to get dispatcher state for cleanup task");
        }
        Ok(rocket)
    }
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Starting cooperative minesweeper server");

    let config = ServerConfig::from_env();
    info!(
        "Default board {}x{} with {} mines, outbox capacity {}",
        config.default_params.width,
        config.default_params.height,
        config.default_params.mines,
        config.outbox_capacity
    );

    let rocket = build_rocket(config)?.attach(CleanupFairing);
    info!("Endpoints: POST /create, GET /ws");

    let _ = rocket.launch().await?;
    Ok(())
}
