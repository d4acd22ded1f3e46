//! Error types for provisioning
//!
//! Driver errors are classified into the three failure families an operator
//! cares about: authentication, conflicts with existing state, connectivity.

use mongodb::error::{ErrorKind, WriteFailure};

/// Server error codes that mean "not allowed"
const AUTH_CODES: &[i32] = &[
    13, // Unauthorized
    18, // AuthenticationFailed
];

/// Server error codes that mean "already exists in another shape"
const CONFLICT_CODES: &[i32] = &[
    11000, // DuplicateKey
    48,    // NamespaceExists
    51003, // user already exists
    85,    // IndexOptionsConflict
    86,    // IndexKeySpecsConflict
];

/// Main error type for provisioning operations
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret error: {0}")]
    Secret(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Attach the description of the step that produced this error
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error, with step context removed
    pub fn root(&self) -> &ProvisionError {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the failing step, if known
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step.as_str()),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.root(), Self::Auth(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict(_))
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self.root(), Self::Connectivity(_))
    }

    /// Classify a server error code
    pub fn from_server_code(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        if AUTH_CODES.contains(&code) {
            Self::Auth(message)
        } else if CONFLICT_CODES.contains(&code) {
            Self::Conflict(message)
        } else {
            Self::Database(format!("code {}: {}", code, message))
        }
    }
}

impl From<mongodb::error::Error> for ProvisionError {
    fn from(err: mongodb::error::Error) -> Self {
        let message = err.to_string();
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => Self::Auth(message),
            ErrorKind::Command(cmd) => Self::from_server_code(cmd.code, message),
            ErrorKind::Write(WriteFailure::WriteError(write)) => {
                Self::from_server_code(write.code, message)
            }
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Connectivity(message),
            ErrorKind::InvalidArgument { .. } => Self::Config(message),
            _ => Self::Database(message),
        }
    }
}

impl From<bson::ser::Error> for ProvisionError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for ProvisionError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON deserialization error: {}", err))
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
