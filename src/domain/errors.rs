//! Error types, split by layer.
//!
//! `DomainError` covers business-rule failures that map to OCPP responses;
//! `InfraError` covers storage / transport / serialization failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Evse {0} does not exist")]
    EvseOutOfRange(i32),

    #[error("Connector {connector_id} does not exist on evse {evse_id}")]
    ConnectorOutOfRange { evse_id: i32, connector_id: i32 },

    #[error("No active transaction on evse {0}")]
    NoActiveTransaction(i32),

    #[error("Variable not found: {component}:{variable}")]
    VariableNotFound { component: String, variable: String },

    #[error("Type mismatch for {component}:{variable}: {detail}")]
    TypeMismatch {
        component: String,
        variable: String,
        detail: String,
    },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Not connected to CSMS")]
    Offline,
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Websocket error: {0}")]
    Websocket(String),
}

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Infra(#[from] InfraError),
}

pub type DomainResult<T> = Result<T, DomainError>;
pub type InfraResult<T> = Result<T, InfraError>;
pub type StationResult<T> = Result<T, StationError>;
