//! Lossless bundle codec.
//!
//! Each file is hash-substituted, Huffman-coded and stored with a BLAKE3
//! checksum of its original bytes. Decoding reverses both stages and
//! re-checks the digest; a mismatch is reported on the file, not raised.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::CompressionConfig;
use crate::envelope;
use crate::error::CompressError;
use crate::hasher::{self, HashTable};
use crate::huffman::{self, HuffmanTable};
use crate::language::SourceFile;

pub const BUNDLE_VERSION: u32 = 1;

/// One archived file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub filename: String,
    pub language: String,
    pub original_size: usize,
    pub checksum: String,
    pub huffman_table: HuffmanTable,
    pub hash_table: HashTable,
    /// Base64 of the Huffman-coded, hash-substituted text.
    pub payload: String,
    pub payload_bits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosslessBundle {
    pub version: u32,
    pub files: Vec<BundleEntry>,
    pub total_files: usize,
}

/// On-disk layout for [`LosslessBundle::write_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Standalone `.json` archive.
    Json,
    /// Sentinel-wrapped `.txt` envelope.
    Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredFile {
    pub filename: String,
    pub recovered_size: usize,
    pub language: String,
    #[serde(rename = "match")]
    pub matches: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveredFile {
    /// Turn a failed integrity check into an error.
    pub fn verify(&self) -> Result<(), CompressError> {
        if self.matches {
            return Ok(());
        }
        Err(CompressError::IntegrityMismatch {
            filename: self.filename.clone(),
            expected: "archived checksum".into(),
            actual: self
                .error
                .clone()
                .unwrap_or_else(|| "different bytes".into()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResponse {
    pub files: Vec<RecoveredFile>,
    pub total_files: usize,
}

impl DecodeResponse {
    pub fn all_match(&self) -> bool {
        self.files.iter().all(|f| f.matches)
    }
}

/// BLAKE3 hex digest.
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Archive one file, refusing it if it would not come back byte-exact.
pub(crate) fn encode_entry(
    file: &SourceFile,
    config: &CompressionConfig,
) -> Result<BundleEntry, CompressError> {
    let content = file.content();
    let substitution = hasher::hash_patterns(content, config);
    let table = HuffmanTable::build(substitution.text.as_bytes());
    let encoded = huffman::encode(substitution.text.as_bytes(), &table)?;

    let entry = BundleEntry {
        filename: file.filename().to_string(),
        language: file.language().name().to_string(),
        original_size: content.len(),
        checksum: checksum(content.as_bytes()),
        huffman_table: table,
        hash_table: substitution.table,
        payload: BASE64.encode(&encoded.payload),
        payload_bits: encoded.bits,
    };

    let recovered = decode_entry(&entry);
    if !recovered.matches {
        return Err(CompressError::stage(
            "bundle",
            format!(
                "{} does not round-trip: {}",
                entry.filename,
                recovered.error.unwrap_or_default()
            ),
        ));
    }
    debug!(
        filename = %entry.filename,
        original_size = entry.original_size,
        payload_bytes = encoded.payload.len(),
        hash_entries = entry.hash_table.len(),
        "archived file"
    );
    Ok(entry)
}

fn recover_text(entry: &BundleEntry) -> Result<String, String> {
    let payload = BASE64
        .decode(entry.payload.as_bytes())
        .map_err(|e| format!("payload is not base64: {e}"))?;
    let bytes = huffman::decode(&payload, entry.payload_bits, &entry.huffman_table)
        .map_err(|e| e.to_string())?;
    let substituted =
        String::from_utf8(bytes).map_err(|e| format!("decoded payload is not UTF-8: {e}"))?;
    hasher::expand(&substituted, &entry.hash_table).map_err(|e| e.to_string())
}

fn decode_entry(entry: &BundleEntry) -> RecoveredFile {
    let (content, error) = match recover_text(entry) {
        Ok(text) => {
            let digest = checksum(text.as_bytes());
            let error = if text.len() != entry.original_size {
                Some(format!(
                    "size mismatch: archived {} bytes, recovered {}",
                    entry.original_size,
                    text.len()
                ))
            } else if digest != entry.checksum {
                Some(format!(
                    "checksum mismatch: archived {}, recovered {digest}",
                    entry.checksum
                ))
            } else {
                None
            };
            (text, error)
        }
        Err(reason) => (String::new(), Some(reason)),
    };
    if let Some(reason) = &error {
        warn!(filename = %entry.filename, reason = %reason, "integrity check failed");
    }
    RecoveredFile {
        filename: entry.filename.clone(),
        recovered_size: content.len(),
        language: entry.language.clone(),
        matches: error.is_none(),
        content,
        error,
    }
}

impl LosslessBundle {
    /// Archive `files` in order.
    pub fn encode(files: &[SourceFile], config: &CompressionConfig) -> Result<Self, CompressError> {
        let entries: Vec<BundleEntry> = if config.parallel {
            files
                .par_iter()
                .map(|f| encode_entry(f, config))
                .collect::<Result<_, _>>()?
        } else {
            files
                .iter()
                .map(|f| encode_entry(f, config))
                .collect::<Result<_, _>>()?
        };
        info!(files = entries.len(), "encoded lossless bundle");
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(files: Vec<BundleEntry>) -> Self {
        Self {
            version: BUNDLE_VERSION,
            total_files: files.len(),
            files,
        }
    }

    pub fn to_json(&self) -> Result<String, CompressError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and structurally validate an archive document.
    pub fn from_json(text: &str) -> Result<Self, CompressError> {
        let bundle: Self = serde_json::from_str(text)
            .map_err(|e| CompressError::BundleFormat(format!("unreadable archive: {e}")))?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), CompressError> {
        if self.version != BUNDLE_VERSION {
            return Err(CompressError::BundleFormat(format!(
                "unsupported version {} (expected {BUNDLE_VERSION})",
                self.version
            )));
        }
        if self.total_files != self.files.len() {
            return Err(CompressError::BundleFormat(format!(
                "total_files is {} but {} entries are present",
                self.total_files,
                self.files.len()
            )));
        }
        for entry in &self.files {
            entry
                .huffman_table
                .validate()
                .and_then(|_| entry.hash_table.validate())
                .map_err(|e| CompressError::BundleFormat(format!("{}: {e}", entry.filename)))?;
        }
        Ok(())
    }

    /// Recover every file. Per-file failures surface as `matches == false`.
    pub fn decode(&self) -> DecodeResponse {
        let files: Vec<RecoveredFile> = self.files.iter().map(decode_entry).collect();
        let failed = files.iter().filter(|f| !f.matches).count();
        info!(files = files.len(), failed, "decoded lossless bundle");
        DecodeResponse {
            total_files: files.len(),
            files,
        }
    }

    pub fn write_to(
        &self,
        path: impl AsRef<Path>,
        format: ArchiveFormat,
        config: &CompressionConfig,
    ) -> Result<(), CompressError> {
        let text = match format {
            ArchiveFormat::Json => self.to_json()?,
            ArchiveFormat::Envelope => envelope::wrap(self, config.envelope_line_width)?,
        };
        fs::write(path, text)?;
        Ok(())
    }

    /// Load an archive or envelope, whichever the file holds.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, CompressError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse either an envelope (anywhere inside `text`) or a bare archive.
    pub fn parse(text: &str) -> Result<Self, CompressError> {
        if envelope::contains_envelope(text) {
            envelope::unwrap(text)
        } else {
            Self::from_json(text)
        }
    }
}

/// Decode a bundle given in either envelope form.
pub fn decode(text: &str) -> Result<DecodeResponse, CompressError> {
    Ok(LosslessBundle::parse(text)?.decode())
}

/// Encode and decode `text` in isolation, reporting the first differing byte.
pub fn verify_roundtrip(text: &str, config: &CompressionConfig) -> Result<(), CompressError> {
    let substitution = hasher::hash_patterns(text, config);
    let table = HuffmanTable::build(substitution.text.as_bytes());
    let encoded = huffman::encode(substitution.text.as_bytes(), &table)?;
    let decoded = huffman::decode(&encoded.payload, encoded.bits, &table)?;
    let substituted = String::from_utf8(decoded).map_err(|e| CompressError::stage("huffman", e))?;
    let recovered = hasher::expand(&substituted, &substitution.table)?;
    if recovered == text {
        return Ok(());
    }
    let offset = text
        .bytes()
        .zip(recovered.bytes())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| text.len().min(recovered.len()));
    Err(CompressError::IntegrityMismatch {
        filename: "<inline>".into(),
        expected: format!("{} bytes", text.len()),
        actual: format!("{} bytes, first difference at byte {offset}", recovered.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, text: &str) -> SourceFile {
        SourceFile::from_text(name, text, &CompressionConfig::default()).unwrap()
    }

    fn sample_bundle() -> LosslessBundle {
        let files = vec![
            source("a.rs", "fn main() {\n    println!(\"hi\");\n}\n"),
            source("b.py", &"def handler(event):\n    return event\n".repeat(5)),
        ];
        LosslessBundle::encode(&files, &CompressionConfig::default()).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let bundle = sample_bundle();
        assert_eq!(bundle.total_files, 2);
        let response = bundle.decode();
        assert!(response.all_match());
        assert_eq!(response.files[0].content, "fn main() {\n    println!(\"hi\");\n}\n");
        assert_eq!(response.files[1].language, "python");
    }

    #[test]
    fn test_json_roundtrip_through_text() {
        let bundle = sample_bundle();
        let json = bundle.to_json().unwrap();
        assert!(json.contains("\"payload_bits\""));
        assert!(json.contains("\"total_files\": 2"));
        assert_eq!(LosslessBundle::from_json(&json).unwrap(), bundle);
    }

    #[test]
    fn test_flipped_payload_byte_is_mismatch() {
        let mut bundle = sample_bundle();
        let entry = &mut bundle.files[1];
        let mut raw = BASE64.decode(&entry.payload).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        entry.payload = BASE64.encode(&raw);
        let response = bundle.decode();
        assert!(response.files[0].matches);
        assert!(!response.files[1].matches);
        assert!(response.files[1].error.is_some());
        assert_eq!(response.files[1].verify().unwrap_err().kind(), "IntegrityMismatch");
    }

    #[test]
    fn test_tampered_checksum_is_mismatch() {
        let mut bundle = sample_bundle();
        bundle.files[0].checksum = checksum(b"something else");
        let response = bundle.decode();
        assert!(!response.files[0].matches);
        assert!(response.files[0].error.as_deref().unwrap().contains("checksum"));
    }

    #[test]
    fn test_structural_errors() {
        let err = LosslessBundle::from_json("{not json").unwrap_err();
        assert_eq!(err.kind(), "BundleFormatError");
        let err = LosslessBundle::from_json(r#"{"version":1,"files":[]}"#).unwrap_err();
        assert_eq!(err.kind(), "BundleFormatError");

        let mut bundle = sample_bundle();
        bundle.version = 9;
        assert!(bundle.validate().is_err());
        let mut bundle = sample_bundle();
        bundle.total_files = 3;
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_empty_file() {
        let bundle = LosslessBundle::encode(&[source("empty.txt", "")], &CompressionConfig::default())
            .unwrap();
        assert_eq!(bundle.files[0].payload_bits, 0);
        let response = bundle.decode();
        assert!(response.files[0].matches);
        assert_eq!(response.files[0].recovered_size, 0);
    }

    #[test]
    fn test_recovered_file_serializes_match_key() {
        let response = sample_bundle().decode();
        let json = serde_json::to_value(&response.files[0]).unwrap();
        assert_eq!(json["match"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_verify_roundtrip() {
        let cfg = CompressionConfig::default();
        verify_roundtrip("§ sigils §A and unicode: héllo wörld\n", &cfg).unwrap();
        verify_roundtrip("", &cfg).unwrap();
    }
}
