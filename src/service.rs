//! Request/response contracts and async entry points for a transport layer.
//!
//! The engine is CPU-bound, so each call is moved onto tokio's blocking pool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::bundle::{ArchiveFormat, DecodeResponse};
use crate::error::CompressError;
use crate::{CompressionResult, Engine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInput {
    pub id: String,
    pub filename: String,
    pub content: String,
}

impl FileInput {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&CompressError> for ErrorReport {
    fn from(err: &CompressError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome for one input: a result or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompressionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl FileReport {
    pub(crate) fn new(input: &FileInput, outcome: Result<CompressionResult, CompressError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(err) => {
                warn!(id = %input.id, filename = %input.filename, kind = err.kind(), error = %err, "file not compressed");
                (None, Some(ErrorReport::from(&err)))
            }
        };
        Self {
            id: input.id.clone(),
            filename: input.filename.clone(),
            result,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressRequest {
    pub files: Vec<FileInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressResponse {
    pub results: Vec<FileReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeRequest {
    /// Archive JSON, or text containing a sentinel envelope.
    pub bundle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Archive,
    Envelope,
}

impl From<ExportFormat> for ArchiveFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Archive => ArchiveFormat::Json,
            ExportFormat::Envelope => ArchiveFormat::Envelope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub files: Vec<FileInput>,
    pub format: ExportFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResponse {
    /// Archive JSON or envelope text holding every admitted file.
    pub content: String,
    /// Inputs left out of the archive, each with its error.
    pub rejected: Vec<FileReport>,
}

fn join_error(err: tokio::task::JoinError) -> CompressError {
    CompressError::stage("worker", err)
}

pub async fn compress(
    engine: Arc<Engine>,
    request: CompressRequest,
) -> Result<CompressResponse, CompressError> {
    tokio::task::spawn_blocking(move || CompressResponse {
        results: engine.compress_batch(&request.files),
    })
    .await
    .map_err(join_error)
}

pub async fn decode(
    engine: Arc<Engine>,
    request: DecodeRequest,
) -> Result<DecodeResponse, CompressError> {
    tokio::task::spawn_blocking(move || engine.decode(&request.bundle))
        .await
        .map_err(join_error)?
}

/// Archive the request's files and render them as an archive or envelope.
/// Files that cannot be archived are reported alongside the output.
pub async fn export(
    engine: Arc<Engine>,
    request: ExportRequest,
) -> Result<ExportResponse, CompressError> {
    tokio::task::spawn_blocking(move || -> Result<ExportResponse, CompressError> {
        let export = engine.encode_bundle(&request.files);
        Ok(ExportResponse {
            content: engine.export(&export.bundle, request.format.into())?,
            rejected: export.rejected,
        })
    })
    .await
    .map_err(join_error)?
}
