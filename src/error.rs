//! Error taxonomy for acquisition, metrics, upload, and storage.

use thiserror::Error;

/// Failures reported by a [`crate::source::SampleSource`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The user declined the device chooser; not an error worth surfacing.
    #[error("device selection cancelled")]
    Cancelled,

    #[error("driver error: {0}")]
    Driver(String),

    #[error("sample channels already subscribed")]
    AlreadySubscribed,

    #[error("device not connected")]
    NotConnected,
}

impl From<btleplug::Error> for SourceError {
    fn from(e: btleplug::Error) -> Self {
        SourceError::Driver(e.to_string())
    }
}

/// Failures while bringing a device session up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Pairing prompt declined. Callers abort the flow silently.
    #[error("connection cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    Connection(String),

    /// A session for this device name is already registered.
    #[error("device {0} is already connected")]
    DuplicateDevice(String),
}

impl From<SourceError> for ConnectError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Cancelled => ConnectError::Cancelled,
            other => ConnectError::Connection(other.to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric computed over zero samples")]
    EmptyInput,
}

/// A session upload that did not end in HTTP 200. The session's data is gone.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Server-side persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A client-controlled string is unfit for use as a path component.
    #[error("unsafe path component {0:?}")]
    UnsafePathComponent(String),

    #[error("no stored session named {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
