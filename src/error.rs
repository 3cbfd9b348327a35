//! Error types for rookery

use thiserror::Error;

/// Result type for rookery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rookery
#[derive(Debug, Error)]
pub enum Error {
    /// Launch attempted on a name that already maps to a live instance
    #[error("Instance '{0}' is already running")]
    AlreadyRunning(String),

    /// Operation on a name with no live instance
    #[error("Instance '{0}' is not running")]
    NotRunning(String),

    /// The browser process could not be started or connected to
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// Page or profile setup failed after the process had started
    #[error("Instance setup failed ({context}): {source}")]
    Setup {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// A fingerprint patch failed during injection setup
    #[error("Fingerprint injection failed: {0}")]
    Injection(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Wrap an error that occurred after the browser process had started
    pub fn setup(context: impl Into<String>, source: Error) -> Self {
        Self::Setup {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True if this error means the launch never produced a usable process
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Error::Launch(_) | Error::ChromeNotFound)
    }
}
