//! Engine configuration.
//!
//! Runtime parameters for every stage (scanner, health, selection, routing,
//! execution, engine loop), grouped into named profiles.

mod bot;

pub use bot::{
    parse_address_list, BotConfig, ConfigError, EngineConfig, ExecutionConfig, HealthConfig,
    RoutingConfig, ScannerConfig, SelectionConfig,
};
