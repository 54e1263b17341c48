//! Error types for mail-rules.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl Error {
    /// Process exit code for a run aborted by this error.
    ///
    /// A clean run exits 0 and a run with action failures exits 2; see
    /// `RunSummary::exit_code`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 4,
            Self::Database(_) | Self::Engine(_) => 3,
        }
    }
}

/// Configuration-related errors, including malformed rule definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Rule '{rule}' is invalid: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Duplicate rule name: {0}")]
    DuplicateRule(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Typed failure reported by the mail-action collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailActionError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Email {email_id} not found")]
    NotFound { email_id: String },

    #[error("Rate limited by mail provider")]
    RateLimited,

    #[error("{0}")]
    Other(String),
}

/// Errors that abort a processing pass.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: String,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
