use std::time::Duration;
use thiserror::Error;

/// Structured error context for configuration and key-derivation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Setting or argument that caused the error (e.g., "REDIS_PORT", "args[1]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "settings", "key_derivation")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the caching layer.
///
/// Backend failures (`BackendUnavailable`, `Timeout`) are absorbed by
/// [`CacheManager`](crate::cache::CacheManager) and never reach callers of the
/// memoized operations. `KeyDerivation` and `Configuration` are integration
/// errors and are always returned.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cache backend '{backend}' unavailable: {message}")]
    BackendUnavailable { backend: &'static str, message: String },

    #[error("Cache backend '{backend}' timed out after {after:?} during {operation}")]
    Timeout {
        backend: &'static str,
        operation: &'static str,
        after: Duration,
    },

    #[error("Key derivation error: {message}{}", format_context(.context))]
    KeyDerivation {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache backend '{backend}' does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn backend_unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Create a new key-derivation error with structured context
    pub fn key_derivation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::KeyDerivation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// True for failures of the storage layer itself (unreachable or timed out).
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. } | Error::Timeout { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::KeyDerivation { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
