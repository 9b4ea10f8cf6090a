//! Cloudlet provisioning daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

use cloudlet::{Config, LogProvisioner, Provisioner, ScriptProvisioner, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting cloudlet daemon with config: {:?}", cfg);

    // External provisioner
    let provisioner: Arc<dyn Provisioner> = match &cfg.server.provision_script {
        Some(script) => {
            info!("Provisioning via {}", script.display());
            Arc::new(
                ScriptProvisioner::new(script.clone())
                    .with_timeout(cfg.server.provision_timeout()),
            )
        }
        None => {
            info!("No provision_script configured, commands will only be logged");
            Arc::new(LogProvisioner)
        }
    };

    // Provisioning server
    let server = Server::bind(&cfg.server, provisioner).await?;
    let shutdown = server.shutdown_token();
    let server_handle = tokio::spawn(server.run());

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    shutdown.cancel();
    if let Err(e) = server_handle.await {
        error!("Server task failed: {}", e);
    }

    info!("Shutdown complete.");
    Ok(())
}
