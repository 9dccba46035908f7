//! chirp-ctl — command-line front-end for CHIRP service discovery.

use anyhow::{Context, Result};

use chirp_core::config::ChirpConfig;

mod cmd;

const USAGE: &str = "\
usage: chirp-ctl COMMAND [ARGS]

commands:
  listen                      print every discovery datagram on the wire
  offer SERVICE:PORT [...]    announce services until interrupted
  request SERVICE             solicit offers for a service kind

Identity and addressing come from the config file (chirp-ctl respects
$CHIRP_CONFIG) and CHIRP_* environment overrides.
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ChirpConfig::load().context("failed to load configuration")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("listen") => cmd::listen::run(&config).await,
        Some("offer") => cmd::offer::run(&config, &args[1..]).await,
        Some("request") => cmd::request::run(&config, &args[1..]).await,
        _ => {
            eprint!("{USAGE}");
            std::process::exit(2);
        }
    }
}
