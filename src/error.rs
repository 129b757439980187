//! Top-level error type

use depot_config::ConfigError;
use depot_messaging::MessagingError;
use depot_tenancy::{TenancyError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("{0}")]
    Unavailable(String),

    #[error("output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<ValidationError> for DepotError {
    fn from(err: ValidationError) -> Self {
        DepotError::Tenancy(err.into())
    }
}

pub type Result<T> = std::result::Result<T, DepotError>;
