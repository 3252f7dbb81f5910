//! Configuration types and logging bootstrap for the mower MQTT bridge.

mod brand;
mod config;
mod error;
mod logging;

pub use brand::{Brand, BrandConfig};
pub use config::{BridgeConfig, Credentials, LocalBrokerConfig, Tuning, TUNING_FILE_ENV};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, parse_level, SERVICE_NAME};
