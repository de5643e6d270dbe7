//! Error types, one enum per subsystem.

use std::time::Duration;

/// Environment configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Could not open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport errors. Every variant is treated as a failed send attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("{transport} send failed: {reason}")]
    SendFailed { transport: String, reason: String },

    #[error("{transport} rejected the message: {reason}")]
    Rejected { transport: String, reason: String },

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by launch / scheduler entry points.
#[derive(Debug, thiserror::Error)]
pub enum OutreachError {
    #[error("Welcome template (order 0) not found")]
    WelcomeTemplateMissing,

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Reply ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("No contact matches sender {0}")]
    UnknownSender(String),

    #[error("Outreach error: {0}")]
    Outreach(#[from] OutreachError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
