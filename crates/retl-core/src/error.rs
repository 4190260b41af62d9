use thiserror::Error;

/// Error types for RETL pipeline operations.
///
/// Configuration errors are raised at construction and prevent the pipeline
/// from ever starting; the per-record variants are raised by transformers
/// and terminate the run through the shared close flag.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Invalid construction parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// A declared input key path resolved to nothing.
    #[error("item does not contain the key path `{0}`")]
    MissingKey(String),

    /// A value failed a declared runtime type check.
    #[error("value at `{path}` expected type {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A queue between stages closed while a producer still held records.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Generic error wrapper.
    ///
    /// Wraps any other error type using anyhow::Error while maintaining
    /// error context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
