//! Mower MQTT Bridge - relays mower traffic between the vendor cloud broker
//! and a local MQTT broker.
//!
//! Usage: mower-mqtt-bridge <log_level> <username> <password> <brand> <host> <port>
//!        [local_username] [local_password]

mod app;
mod discovery;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use bridge_config::{init_logging, Brand, BridgeConfig, Credentials, LocalBrokerConfig, Tuning};
use clap::Parser;
use error::BridgeResult;
use tracing::{error, info};

/// Mower MQTT Bridge command-line interface.
#[derive(Parser, Debug)]
#[command(name = "mower-mqtt-bridge")]
#[command(about = "Relays mower traffic between the vendor cloud and a local MQTT broker")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error, critical, none)
    log_level: String,

    /// Cloud account username
    username: String,

    /// Cloud account password
    password: String,

    /// Brand code (WX, KR, LX, SM)
    brand: String,

    /// Local broker host
    host: String,

    /// Local broker port
    port: u16,

    /// Local broker username
    local_username: Option<String>,

    /// Local broker password
    local_password: Option<String>,

    /// JSON file overriding timings, topics and limits
    #[arg(long, env = "MOWER_BRIDGE_TUNING")]
    tuning: Option<PathBuf>,

    /// Also append JSONL logs to this file
    #[arg(long, env = "MOWER_BRIDGE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Use TLS towards the local broker
    #[arg(long)]
    local_tls: bool,
}

impl Cli {
    fn into_config(self) -> BridgeResult<BridgeConfig> {
        let brand: Brand = self.brand.parse()?;
        let tuning = Tuning::load(self.tuning.as_deref())?;
        let local = LocalBrokerConfig::new(
            self.host,
            self.port,
            self.local_username,
            self.local_password,
        )
        .with_tls(self.local_tls);

        Ok(BridgeConfig {
            log_level: self.log_level,
            brand: brand.config(),
            account: Credentials::new(self.username, self.password),
            local,
            tuning,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match cli.into_config() {
        Ok(config) => {
            info!(brand = config.brand.code, "Configuration loaded");
            app::run_bridge(config).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(severity = "critical", error = %e, "Mower MQTT Bridge stopped on a fatal error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mower-mqtt-bridge").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn positional_arguments() {
        let cli = parse(&["debug", "me@example.com", "pw", "kr", "10.0.0.2", "1883"]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.brand.code, "KR");
        assert_eq!(config.account.username, "me@example.com");
        assert_eq!(config.local.host, "10.0.0.2");
        assert_eq!(config.local.port, 1883);
        assert!(config.local.credentials.is_none());
        assert!(!config.local.tls);
    }

    #[test]
    fn local_login_and_tls() {
        let cli = parse(&[
            "info", "me", "pw", "WX", "broker", "8883", "mqtt", "secret", "--local-tls",
        ]);
        let config = cli.into_config().unwrap();

        let login = config.local.credentials.unwrap();
        assert_eq!(login.username, "mqtt");
        assert_eq!(login.password, "secret");
        assert!(config.local.tls);
    }

    #[test]
    fn null_local_login_is_ignored() {
        let cli = parse(&["info", "me", "pw", "WX", "broker", "1883", "null", "null"]);
        assert!(cli.into_config().unwrap().local.credentials.is_none());
    }

    #[test]
    fn unknown_brand_is_rejected() {
        let cli = parse(&["info", "me", "pw", "XX", "broker", "1883"]);
        assert!(matches!(
            cli.into_config(),
            Err(error::BridgeError::Config(
                bridge_config::ConfigError::UnknownBrand(_)
            ))
        ));
    }

    #[test]
    fn port_must_be_numeric() {
        let result = Cli::try_parse_from([
            "mower-mqtt-bridge", "info", "me", "pw", "WX", "broker", "not-a-port",
        ]);
        assert!(result.is_err());
    }
}
