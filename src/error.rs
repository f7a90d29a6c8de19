//! Error types for the notification manager.

use crate::types::{GroupId, NotificationId};
use thiserror::Error;

/// Main error type for manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Notification refers to unknown group: {0}")]
    InvalidGroupReference(GroupId),

    #[error("No free identifiers left")]
    IdsExhausted,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Data directory is locked by another process")]
    Locked,

    #[error("Manager service has stopped")]
    ServiceStopped,
}

impl From<serde_json::Error> for ManagerError {
    fn from(e: serde_json::Error) -> Self {
        ManagerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ManagerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ManagerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ManagerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ManagerError::Deserialization(e.to_string())
    }
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
