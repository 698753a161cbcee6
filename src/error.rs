use thiserror::Error;

/// Error types for the collection/rewrite pipeline
#[derive(Error, Debug)]
pub enum FeedForgeError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration file: {path}")]
    InvalidConfig { path: String },

    // Database errors
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Migration failed: {version}")]
    Migration { version: i32 },

    // Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP request failed: {url} - {status}")]
    HttpRequest { url: String, status: u16 },

    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    // Collection errors
    #[error("Collect error: {message}")]
    Collect { message: String },

    #[error("Invalid account url: {url}")]
    InvalidAccountUrl { url: String },

    #[error("Feed returned no data for account: {account}")]
    EmptyFeed { account: String },

    // Task errors
    #[error("Task error: {message}")]
    Task { message: String },

    #[error("A batch task is already running")]
    TaskAlreadyRunning,

    #[error("No running task to stop")]
    NoRunningTask,

    #[error("No accounts under type: {type_name}")]
    NoAccounts { type_name: String },

    #[error("Duplicate type in batch: {type_name}")]
    DuplicateSpec { type_name: String },

    // Rewrite errors
    #[error("Rewrite error: {message}")]
    Rewrite { message: String },

    #[error("Rewrite settings incomplete: {field}")]
    RewriteNotConfigured { field: String },

    #[error("Article has no rewritable text: {article_id}")]
    NoRewritableText { article_id: i64 },

    // Document errors
    #[error("Document error: {message}")]
    Document { message: String },

    #[error("Article content not found on page: {url}")]
    ContentNotFound { url: String },

    #[error("File write failed: {path}")]
    FileWrite { path: String },

    // Article errors
    #[error("Article not found: {article_id}")]
    ArticleNotFound { article_id: i64 },

    #[error("Article has no url: {article_id}")]
    ArticleMissingUrl { article_id: i64 },

    // Export errors
    #[error("Export error: {message}")]
    Export { message: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {state}")]
    InvalidState { state: String },
}

impl FeedForgeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create a collection error
    pub fn collect(message: impl Into<String>) -> Self {
        Self::Collect { message: message.into() }
    }

    /// Create a task error
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task { message: message.into() }
    }

    /// Create a rewrite error
    pub fn rewrite(message: impl Into<String>) -> Self {
        Self::Rewrite { message: message.into() }
    }

    /// Create a document error
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document { message: message.into() }
    }

    /// Create an export error
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if error is recoverable by retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::HttpRequest { .. }
            | Self::Timeout { .. }
            | Self::EmptyFeed { .. }
            | Self::Rewrite { .. } => true,

            Self::Configuration { .. }
            | Self::InvalidConfig { .. }
            | Self::Migration { .. }
            | Self::InvalidAccountUrl { .. }
            | Self::DuplicateSpec { .. }
            | Self::RewriteNotConfigured { .. } => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfig { .. } => "configuration",
            Self::Database { .. } | Self::Migration { .. } => "database",
            Self::Network { .. } | Self::HttpRequest { .. } | Self::Timeout { .. } => "network",
            Self::Collect { .. } | Self::InvalidAccountUrl { .. } | Self::EmptyFeed { .. } => {
                "collect"
            }
            Self::Task { .. }
            | Self::TaskAlreadyRunning
            | Self::NoRunningTask
            | Self::NoAccounts { .. }
            | Self::DuplicateSpec { .. } => "task",
            Self::Rewrite { .. }
            | Self::RewriteNotConfigured { .. }
            | Self::NoRewritableText { .. } => "rewrite",
            Self::Document { .. } | Self::ContentNotFound { .. } | Self::FileWrite { .. } => {
                "document"
            }
            Self::ArticleNotFound { .. } | Self::ArticleMissingUrl { .. } => "article",
            Self::Export { .. } | Self::UnsupportedFormat { .. } => "export",
            Self::Internal { .. } | Self::Cancelled | Self::InvalidState { .. } => "internal",
        }
    }

    /// Suggested retry delay for recoverable errors
    pub fn retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            Self::Network { .. } => Some(std::time::Duration::from_secs(5)),
            Self::HttpRequest { .. } => Some(std::time::Duration::from_secs(10)),
            Self::Timeout { .. } => Some(std::time::Duration::from_secs(15)),
            Self::Rewrite { .. } => Some(std::time::Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Result type alias for the crate
pub type ForgeResult<T> = std::result::Result<T, FeedForgeError>;

impl From<rusqlite::Error> for FeedForgeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database { message: err.to_string() }
    }
}

impl From<reqwest::Error> for FeedForgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if let Some(status) = err.status() {
            Self::HttpRequest {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            }
        } else {
            Self::Network { message: err.to_string() }
        }
    }
}

impl From<std::io::Error> for FeedForgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

impl From<serde_json::Error> for FeedForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

impl From<anyhow::Error> for FeedForgeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = FeedForgeError::config("bad setting");
        assert_eq!(error.category(), "configuration");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_recoverable_errors() {
        let network_error = FeedForgeError::network("connection reset");
        assert!(network_error.is_recoverable());
        assert!(network_error.retry_delay().is_some());

        let dup = FeedForgeError::DuplicateSpec { type_name: "tech".to_string() };
        assert!(!dup.is_recoverable());
        assert_eq!(dup.category(), "task");
    }

    #[test]
    fn test_task_guard_errors() {
        assert_eq!(FeedForgeError::TaskAlreadyRunning.category(), "task");
        assert_eq!(
            FeedForgeError::TaskAlreadyRunning.to_string(),
            "A batch task is already running"
        );
    }
}
