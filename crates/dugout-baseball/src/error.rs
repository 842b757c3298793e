// Domain error type shared by every store in this crate.

use dugout_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DugoutError {
    /// Bad input, rejected before any state was touched.
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{kind} with ID {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The change could not be written. In-memory state has been rolled back.
    #[error("failed to save changes: {0}")]
    Persistence(#[from] StoreError),
}

impl DugoutError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DugoutError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DugoutError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DugoutError>;
