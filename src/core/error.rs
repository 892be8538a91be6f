//! Error types for the Veldra device layer

use thiserror::Error;

/// Main error type for the device layer
#[derive(Debug, Error)]
pub enum Error {
    #[error("device already initialized")]
    AlreadyInitialized,

    #[error("device not initialized")]
    NotInitialized,

    #[error("device has been disposed")]
    DeviceDisposed,

    #[error("graphics object already released: {0}")]
    AlreadyReleased(String),

    #[error("format support query with empty usage flags")]
    EmptyFormatQuery,

    #[error("command list error: {0}")]
    CommandList(String),

    #[error("staging buffer error: {0}")]
    Staging(String),

    #[error("backend error: {0}")]
    Backend(String),
}
