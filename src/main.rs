use anyhow::Result;
use envoy_fleet::config::Config;
use envoy_fleet::discovery::DiscoveryTable;
use envoy_fleet::driver::FleetDriver;
use envoy_fleet::gateway::envoy::EnvoyConnector;
use envoy_fleet::host::FileDeviceHost;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    envoy_fleet::logging::init_logging(&config.logging)?;

    info!(
        "Envoy Fleet {} starting up, polling every {} ms",
        env!("APP_VERSION"),
        config.poll_interval_ms
    );

    let discovery = Arc::new(DiscoveryTable::from_gateways(&config.gateways));

    #[cfg(feature = "mdns")]
    let mdns = if config.discovery.mdns {
        match envoy_fleet::discovery::mdns::MdnsBrowser::start(
            &config.discovery.service_type,
            Arc::clone(&discovery),
        ) {
            Ok(browser) => Some(browser),
            Err(e) => {
                error!("mDNS discovery unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let connector = Arc::new(EnvoyConnector::new(&config.envoy)?);
    let host = Arc::new(FileDeviceHost::open(&config.persistence.path)?);

    let mut driver = FleetDriver::new(
        config.clone(),
        connector.clone(),
        discovery.clone(),
        host,
    )?;
    let handle = driver.handle();

    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let pairing = envoy_fleet::pairing::PairingSession::new(connector, discovery);
        let state = envoy_fleet::web::AppState::new(handle.clone(), pairing);
        let (host, port) = (config.web.host.clone(), config.web.port);
        Some(tokio::spawn(async move {
            if let Err(e) = envoy_fleet::web::serve(state, &host, port).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = signal_handle.shutdown();
        }
    });

    let result = driver.run().await;

    #[cfg(feature = "web")]
    if let Some(task) = web_task {
        task.abort();
    }
    #[cfg(feature = "mdns")]
    if let Some(browser) = mdns {
        browser.shutdown();
    }

    match result {
        Ok(()) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
