use anyhow::Context;
use clap::{Parser, Subcommand};
use hostbox_cli::config::Config;
use hostbox_sandbox::{CommandReloadHook, HostingSettings, Orchestrator, ProxyConfigManager};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hostbox")]
#[command(about = "Hostbox - per-project sandboxes behind a reverse proxy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the idle reaper
    Serve {
        #[arg(long, help = "Listen address (overrides HOSTBOX_API_HOST)")]
        host: Option<IpAddr>,
        #[arg(long, help = "Listen port (overrides HOSTBOX_API_PORT)")]
        port: Option<u16>,
        #[arg(long, help = "Do not start the idle reaper")]
        no_reaper: bool,
    },
    /// Run the configured proxy reload command once
    ReloadProxy,
    /// List hostnames that currently have a route file
    Routes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let settings = HostingSettings::from_env().context("invalid hosting settings")?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_reaper,
        } => {
            let mut config = Config::from_env().context("invalid API settings")?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config, settings, !no_reaper).await
        }
        Commands::ReloadProxy => {
            let proxy = proxy_manager(&settings)?;
            proxy.reload().await.context("proxy reload failed")?;
            println!("Proxy reloaded");
            Ok(())
        }
        Commands::Routes => {
            let proxy = proxy_manager(&settings)?;
            let routes = proxy.routes().await?;
            if routes.is_empty() {
                println!("No routes in {}", settings.proxy.routes_dir.display());
            }
            for hostname in routes {
                println!("{}", hostname);
            }
            Ok(())
        }
    }
}

fn proxy_manager(settings: &HostingSettings) -> anyhow::Result<ProxyConfigManager> {
    let hook = CommandReloadHook::new(settings.reload.command.clone(), settings.reload.timeout)?;
    Ok(ProxyConfigManager::new(settings.proxy.clone(), Box::new(hook)))
}

async fn serve(config: Config, settings: HostingSettings, reaper: bool) -> anyhow::Result<()> {
    let reaper_enabled = reaper && settings.reaper_enabled;
    let orchestrator = Arc::new(Orchestrator::local(settings).context("failed to initialise runtime")?);

    if !orchestrator.runtime_available().await {
        warn!("Container runtime is not reachable; provisioning will fail until it is");
    }

    let restored = orchestrator
        .restore()
        .await
        .context("failed to restore registry snapshot")?;
    if restored > 0 {
        info!(restored, "Restored sandboxes from snapshot");
    }

    let reaper_handle = if reaper_enabled {
        Some(orchestrator.spawn_reaper())
    } else {
        info!("Idle reaper disabled");
        None
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };
    let result = hostbox_cli::run_server(&config, orchestrator.clone(), shutdown).await;

    if let Some(handle) = reaper_handle {
        handle.shutdown().await;
    }
    if let Err(e) = orchestrator.flush().await {
        warn!(error = %e, "Failed to write registry snapshot on shutdown");
    }

    result
}
