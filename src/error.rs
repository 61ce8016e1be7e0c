use thiserror::Error;

/// A backend document that cannot be turned into a domain record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("Document {doc_id} is missing required field `{field}`")]
    MissingField { doc_id: String, field: &'static str },
    #[error("Document {doc_id} has invalid field `{field}`: {reason}")]
    InvalidField {
        doc_id: String,
        field: &'static str,
        reason: String,
    },
}

/// Failures reported by a document store or one of its listeners.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Store closed")]
    Closed,
}

/// What a subscription publishes on its error channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubscriptionError {
    #[error("Transport failure: {0}")]
    Transport(#[from] StoreError),
    #[error("Mapping failure: {0}")]
    Mapping(#[from] MappingError),
    #[error("Actor communication error: {0}")]
    ActorCommunicationError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
