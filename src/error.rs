//! Error types for the subscription runtime.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Single-assignment slot is already bound")]
    AlreadyAssigned,

    #[error("Composite is read-only")]
    ReadOnlyComposite,

    #[error("Subject is sealed: {0}")]
    Sealed(String),

    #[error("Bridge is disposed: {0}")]
    BridgeDisposed(String),

    #[error("Bridge already has a downstream subscription: {0}")]
    AlreadySubscribed(String),

    #[error("Start failed: {0}")]
    StartFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Service call failed: {0}")]
    Service(String),

    #[error("Multiple failures: {}", format_aggregate(.0))]
    Aggregate(Vec<EngineError>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),
}

fn format_aggregate(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Collapse a list of accumulated failures into a single error.
    ///
    /// One failure surfaces as itself; two or more are surfaced together.
    pub fn aggregate(mut errors: Vec<EngineError>) -> Option<EngineError> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(EngineError::Aggregate(errors)),
        }
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EngineError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_collapse() {
        assert!(EngineError::aggregate(vec![]).is_none());

        let one = EngineError::aggregate(vec![EngineError::Service("a".into())]).unwrap();
        assert!(matches!(one, EngineError::Service(_)));

        let two = EngineError::aggregate(vec![
            EngineError::Service("a".into()),
            EngineError::Service("b".into()),
        ])
        .unwrap();
        match two {
            EngineError::Aggregate(inner) => assert_eq!(inner.len(), 2),
            other => panic!("expected aggregate, got {:?}", other),
        }
    }
}
