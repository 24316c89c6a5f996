use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for retrospector
#[derive(Error, Debug)]
pub enum RetroError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Malformed trigger envelope or persisted batch
    #[error("Parse error: {0}")]
    Parse(String),

    /// Repository put/query failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Blob open/read/flush failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Alert sink unreachable or rejected the request
    #[error("Notification error: {0}")]
    Notification(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An error annotated with diagnostic key/value pairs
    #[error("{source} ({})", render_values(.values))]
    Context {
        source: Box<RetroError>,
        values: Vec<(String, String)>,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used for retry decisions and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Storage,
    Transport,
    Notification,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Storage => "storage",
            ErrorKind::Transport => "transport",
            ErrorKind::Notification => "notification",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl RetroError {
    /// Attach a diagnostic key/value pair.
    ///
    /// Annotations accumulate in insertion order on a single `Context`
    /// layer, so repeated calls while an error bubbles up never nest.
    pub fn with(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        match self {
            RetroError::Context { source, mut values } => {
                values.push((key.into(), value.to_string()));
                RetroError::Context { source, values }
            }
            other => RetroError::Context {
                source: Box::new(other),
                values: vec![(key.into(), value.to_string())],
            },
        }
    }

    /// Diagnostic annotations attached so far (empty if none)
    pub fn values(&self) -> &[(String, String)] {
        match self {
            RetroError::Context { values, .. } => values,
            _ => &[],
        }
    }

    /// Look up a single annotation by key
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The error beneath any annotation layer
    pub fn root(&self) -> &RetroError {
        match self {
            RetroError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            RetroError::Parse(_) | RetroError::Json { .. } => ErrorKind::Parse,
            RetroError::Storage(_) | RetroError::Database(_) => ErrorKind::Storage,
            RetroError::Transport(_) | RetroError::Io { .. } => ErrorKind::Transport,
            RetroError::Notification(_) | RetroError::Http(_) => ErrorKind::Notification,
            RetroError::Config(_)
            | RetroError::ConfigValidation { .. }
            | RetroError::ConfigNotFound { .. }
            | RetroError::InvalidConfigValue { .. }
            | RetroError::Toml(_)
            | RetroError::TomlSerialization(_) => ErrorKind::Config,
            RetroError::Other(_) | RetroError::Context { .. } => ErrorKind::Internal,
        }
    }

    /// Whether redelivering the same trigger may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Storage | ErrorKind::Transport | ErrorKind::Notification
        )
    }
}

fn render_values(values: &[(String, String)]) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Annotate the error side of a `Result` without unwrapping it
pub trait ResultExt<T> {
    fn with(self, key: &str, value: impl fmt::Display) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with(self, key: &str, value: impl fmt::Display) -> Result<T> {
        self.map_err(|e| e.with(key, value))
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for retrospector operations
pub type Result<T> = std::result::Result<T, RetroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_accumulates_on_one_layer() {
        let err = RetroError::Storage("put failed".to_string())
            .with("count", 3)
            .with("bucket", "blue");

        assert_eq!(err.values().len(), 2);
        assert_eq!(err.value("count"), Some("3"));
        assert_eq!(err.value("bucket"), Some("blue"));
        assert!(matches!(err.root(), RetroError::Storage(_)));
    }

    #[test]
    fn test_display_includes_context() {
        let err = RetroError::Transport("blob missing".to_string()).with("path", "my/key");
        assert_eq!(err.to_string(), "Transport error: blob missing (path=my/key)");
    }

    #[test]
    fn test_kind_and_retry() {
        assert!(RetroError::Storage("x".into()).is_retryable());
        assert!(RetroError::Notification("x".into()).is_retryable());
        assert!(!RetroError::Parse("x".into()).is_retryable());
        assert_eq!(
            RetroError::Parse("x".into()).with("k", "v").kind(),
            ErrorKind::Parse
        );
    }

    #[test]
    fn test_result_ext() {
        let res: Result<()> = Err(RetroError::Transport("read".into()));
        let err = res.with("region", "us-east-5").unwrap_err();
        assert_eq!(err.value("region"), Some("us-east-5"));
    }
}
