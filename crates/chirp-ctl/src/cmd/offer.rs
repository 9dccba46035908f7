//! `chirp-ctl offer` — announce services until interrupted.

use anyhow::{bail, Context, Result};

use chirp::Manager;
use chirp_core::config::ChirpConfig;

use super::parse_service_port;

pub async fn run(config: &ChirpConfig, args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: chirp-ctl offer SERVICE:PORT [SERVICE:PORT...]");
    }
    let services = args
        .iter()
        .map(|spec| parse_service_port(spec))
        .collect::<Result<Vec<_>>>()?;

    let mut manager = Manager::from_config(config).context("failed to create manager")?;
    manager.start();

    for service in services {
        manager.register_service(service);
        println!("offering {} on port {}", service.identifier, service.port);
    }
    println!(
        "announcing as '{}' in group '{}', ctrl-c to withdraw",
        config.identity.name, config.identity.group
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;

    // Orderly teardown: join the receive loop, then broadcast LEAVING
    // for every service.
    manager.shutdown().await;
    println!("withdrawn");
    Ok(())
}
