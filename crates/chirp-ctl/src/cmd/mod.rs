//! CLI command modules.

use anyhow::{bail, Context, Result};

use chirp::RegisteredService;
use chirp_core::wire::ServiceIdentifier;

pub mod listen;
pub mod offer;
pub mod request;

/// Parse a service kind by name, case-insensitive.
pub fn parse_service(name: &str) -> Result<ServiceIdentifier> {
    match name.to_ascii_lowercase().as_str() {
        "control" => Ok(ServiceIdentifier::Control),
        "heartbeat" => Ok(ServiceIdentifier::Heartbeat),
        "monitoring" => Ok(ServiceIdentifier::Monitoring),
        "data" => Ok(ServiceIdentifier::Data),
        other => bail!("unknown service '{other}' (expected control, heartbeat, monitoring, or data)"),
    }
}

/// Parse a `SERVICE:PORT` spec, e.g. `control:7000`.
pub fn parse_service_port(spec: &str) -> Result<RegisteredService> {
    let (name, port) = spec
        .split_once(':')
        .with_context(|| format!("expected SERVICE:PORT, got '{spec}'"))?;
    let port = port
        .parse()
        .with_context(|| format!("invalid port in '{spec}'"))?;
    Ok(RegisteredService {
        identifier: parse_service(name)?,
        port,
    })
}
