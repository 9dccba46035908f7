//! `chirp-ctl request` — solicit offers for a service kind.
//!
//! Broadcasts one REQUEST, then prints OFFERs as peers replay them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use chirp::{DiscoveredService, Manager, UserData};
use chirp_core::config::ChirpConfig;

use super::parse_service;

/// How long to collect replies before summarizing.
const COLLECT_WINDOW: Duration = Duration::from_secs(3);

fn print_offer(service: DiscoveredService, departing: bool, _user: UserData) {
    if !departing {
        println!(
            "  {}  {}  {}:{}",
            service.name_hash, service.identifier, service.address, service.port
        );
    }
}

pub async fn run(config: &ChirpConfig, args: &[String]) -> Result<()> {
    let Some(name) = args.first() else {
        bail!("usage: chirp-ctl request SERVICE");
    };
    let identifier = parse_service(name)?;

    let mut manager = Manager::from_config(config).context("failed to create manager")?;
    manager.register_discover_callback(print_offer, Arc::new(()) as UserData);
    manager.start();

    println!(
        "requesting {} offers in group '{}':",
        identifier, config.identity.group
    );
    manager.send_request(identifier);

    tokio::time::sleep(COLLECT_WINDOW).await;

    let discovered = manager.discovered_services();
    println!(
        "{} offer(s) within {:?}",
        discovered.iter().filter(|s| s.identifier == identifier).count(),
        COLLECT_WINDOW
    );
    Ok(())
}
