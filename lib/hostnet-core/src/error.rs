use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid node selector: {0}")]
    InvalidSelector(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unable to resolve node name: {0}")]
    NodeName(#[from] std::io::Error),

    #[error("Invalid last-applied configuration: {0}")]
    LastApplied(#[source] serde_json::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
