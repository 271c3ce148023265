//! netbind hook daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::io::BufReader;
use tokio::signal;

use netbind::server::{serve, Hooks};
use netbind::{Config, Coordinator, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries hook responses.
    env_logger::init();

    let cfg = Config::load()?;
    info!("Starting netbind with config: {:?}", cfg);

    // Shared state
    let registry = Arc::new(Registry::new());
    let coordinator = Arc::new(Coordinator::from_config(&cfg, Arc::clone(&registry))?);
    info!("Helpers will see hostname {}", coordinator.hostname());
    let hooks = Arc::new(Hooks::new(coordinator));

    let server = serve(hooks, BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Hook server failed: {}", e);
                return Err(e);
            }
            info!("Hook input closed, shutting down...");
        }
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
    }

    info!(
        "Shutdown complete with {} attachment(s) still registered.",
        registry.len()
    );
    Ok(())
}
