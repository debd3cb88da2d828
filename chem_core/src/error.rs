use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChemError {
    #[error("invalid {kind} id: {id}")]
    InvalidId { kind: &'static str, id: String },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("empty tank: {0}")]
    EmptyTank(String),
    #[error("equipment not found: {0}")]
    EquipmentNotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transport fault: {0}")]
    TransportFault(String),
    #[error("timeout waiting for device")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("controller {0} is closed")]
    Closed(u8),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing controller config")]
    MissingConfig,
    #[error("missing transport")]
    MissingTransport,
    #[error("missing chlorinator control")]
    MissingChlorinators,
    #[error("missing pool status")]
    MissingPoolStatus,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
