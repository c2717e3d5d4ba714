use thiserror::Error;

use super::ConnectionPhase;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid connection transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionPhase,
        to: ConnectionPhase,
    },
    #[error("conversation display name must not be empty")]
    EmptyDisplayName,
}
