use alpha_liquidator_api::RouteError;
use alpha_liquidator_chain::GatewayError;

use crate::config::ConfigError;
use crate::health::HealthError;

/// Errors surfaced by the engine's public operations.
///
/// Per-account failures never reach this type; they are counted and the
/// account is skipped for the cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("engine is already {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
