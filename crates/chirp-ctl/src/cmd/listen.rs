//! `chirp-ctl listen` — decode and print every discovery datagram.
//!
//! A passive wire monitor: binds the discovery port and prints each
//! message from any group, with no filtering. Useful for checking what
//! is actually on the broadcast domain.

use anyhow::{Context, Result};

use chirp::transport::BroadcastRecv;
use chirp_core::config::ChirpConfig;
use chirp_core::wire::Message;

pub async fn run(config: &ChirpConfig) -> Result<()> {
    let mut receiver = BroadcastRecv::bind(config.bind_addr())
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    println!("listening on {}", receiver.local_addr()?);

    loop {
        let datagram = receiver.recv().await.context("receive failed")?;

        match Message::parse(&datagram.payload) {
            Ok(message) => {
                println!("-----------------------------------------");
                println!("From:    {}", datagram.source);
                println!("Type:    {}", message.msg_type);
                println!("Group:   {}", message.group_hash);
                println!("Name:    {}", message.name_hash);
                println!("Service: {}", message.service_id);
                println!("Port:    {}", message.port);
            }
            Err(e) => {
                tracing::debug!(error = %e, source = %datagram.source, "skipping undecodable datagram");
            }
        }
    }
}
