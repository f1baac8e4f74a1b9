//! Error types for tokentrim

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    /// Input rejected at admission: not text, or over the size ceiling.
    #[error("content error: {0}")]
    Content(String),

    #[error("compression failed in {stage} stage: {reason}")]
    Compression { stage: &'static str, reason: String },

    #[error("malformed bundle: {0}")]
    BundleFormat(String),

    #[error("integrity mismatch for {filename}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("huffman coding error: {0}")]
    Huffman(String),

    #[error("hash substitution error: {0}")]
    Hash(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompressError {
    /// Name of the error class as reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content(_) => "ContentError",
            Self::BundleFormat(_) | Self::Serialization(_) => "BundleFormatError",
            Self::IntegrityMismatch { .. } => "IntegrityMismatch",
            Self::Compression { .. }
            | Self::Huffman(_)
            | Self::Hash(_)
            | Self::Config(_)
            | Self::Io(_) => "CompressionError",
        }
    }

    pub(crate) fn stage(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Compression {
            stage,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CompressError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
