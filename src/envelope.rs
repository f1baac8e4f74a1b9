//! Sentinel envelope: a lossless bundle carried inside plain text.
//!
//! The archive JSON is DEFLATE-compressed, base64-encoded and wrapped at a
//! fixed width between two marker lines. Anything outside the markers is
//! ignored on the way back in.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::bundle::LosslessBundle;
use crate::error::CompressError;

pub const BEGIN_MARKER: &str = "<<<TOKENTRIM-LOSSLESS:BEGIN>>>";
pub const END_MARKER: &str = "<<<TOKENTRIM-LOSSLESS:END>>>";

fn deflate(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| CompressError::stage("envelope", e))?;
    encoder
        .finish()
        .map_err(|e| CompressError::stage("envelope", e))
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| CompressError::BundleFormat(format!("envelope body does not inflate: {e}")))?;
    Ok(output)
}

/// Wrap `bundle` in marker lines, body lines at most `line_width` chars.
pub fn wrap(bundle: &LosslessBundle, line_width: usize) -> Result<String, CompressError> {
    let json = serde_json::to_vec(bundle)?;
    let body = BASE64.encode(deflate(&json)?);
    let width = line_width.max(1);

    let mut out = String::with_capacity(body.len() + body.len() / width + 64);
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    // Base64 is ASCII, so every byte offset is a char boundary.
    for start in (0..body.len()).step_by(width) {
        out.push_str(&body[start..(start + width).min(body.len())]);
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    Ok(out)
}

pub fn contains_envelope(text: &str) -> bool {
    text.contains(BEGIN_MARKER)
}

/// Extract and parse the first envelope found in `text`.
pub fn unwrap(text: &str) -> Result<LosslessBundle, CompressError> {
    let start = text
        .find(BEGIN_MARKER)
        .ok_or_else(|| CompressError::BundleFormat("envelope begin marker not found".into()))?
        + BEGIN_MARKER.len();
    let len = text[start..]
        .find(END_MARKER)
        .ok_or_else(|| CompressError::BundleFormat("envelope end marker not found".into()))?;

    let body: String = text[start..start + len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if body.is_empty() {
        return Err(CompressError::BundleFormat("envelope is empty".into()));
    }
    let compressed = BASE64
        .decode(body.as_bytes())
        .map_err(|e| CompressError::BundleFormat(format!("envelope body is not base64: {e}")))?;
    let json = inflate(&compressed)?;
    let json = String::from_utf8(json)
        .map_err(|e| CompressError::BundleFormat(format!("envelope body is not UTF-8: {e}")))?;
    LosslessBundle::from_json(&json)
}
