//! Switchyard common
//!
//! Configuration model and logging setup shared by the switchyard gateway
//! crates.

#![deny(missing_docs)]

pub mod config;
pub mod telemetry;

pub use config::{
    AccountCacheConfig, AccountUuidConfig, Config, ConfigError, HttpConfig, LogConfig, Policy,
    PolicySelectorConfig, Route, RouteType, ServiceEndpoint, TokenManagerConfig, ROOT_ENDPOINT,
};
pub use telemetry::{init_logging, TelemetryError};
