//! tokentrim: context compression for source code headed into an LLM window.
//!
//! Each file runs through a fixed pipeline:
//! - language detection and token estimation
//! - structural chunking
//! - per-chunk minification
//! - pattern hashing with a reversible reference table
//! - Huffman analysis of the substituted stream
//! - three summary levels, of which the cheapest is reported as best
//!
//! The lossless bundle codec archives original files so they can be
//! recovered byte-for-byte, either as a JSON archive or inside a sentinel
//! envelope embedded in plain text.

pub mod bundle;
pub mod chunker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hasher;
pub mod huffman;
pub mod language;
pub mod minifier;
pub mod service;
pub mod summary;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub use crate::bundle::{ArchiveFormat, DecodeResponse, LosslessBundle, RecoveredFile};
pub use crate::config::CompressionConfig;
pub use crate::error::CompressError;
pub use crate::language::{Language, SourceFile};
use crate::language::estimate_tokens;
pub use crate::service::{FileInput, FileReport};
pub use crate::summary::{Level, SummaryLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinificationStats {
    pub code: String,
    pub tokens: usize,
    pub reduction_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuffmanStats {
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashTableStats {
    pub entries_count: usize,
}

/// Per-file output of the compression pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub filename: String,
    pub original_tokens: usize,
    pub best_tokens: usize,
    pub best_level: Level,
    pub summary_levels: BTreeMap<Level, SummaryLevel>,
    pub minification: MinificationStats,
    pub huffman: HuffmanStats,
    pub hash_table: HashTableStats,
    pub language: Language,
    pub total_chunks: usize,
    pub overall_reduction_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_preamble: Option<String>,
}

/// Files archived for export, plus a report for each input that was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleExport {
    pub bundle: LosslessBundle,
    pub rejected: Vec<FileReport>,
}

/// The compression engine. Holds configuration only; every call is independent.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: CompressionConfig,
}

impl Engine {
    pub fn new(config: CompressionConfig) -> Result<Self, CompressError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Admit raw bytes and compress them.
    pub fn compress_file(
        &self,
        filename: &str,
        content: &[u8],
    ) -> Result<CompressionResult, CompressError> {
        let file = SourceFile::from_bytes(filename, content.to_vec(), &self.config)?;
        self.compress_source(&file)
    }

    /// Run the full pipeline on an admitted file.
    pub fn compress_source(&self, file: &SourceFile) -> Result<CompressionResult, CompressError> {
        let content = file.content();
        let language = file.language();
        let original_tokens = file.token_estimate();

        let chunks = chunker::chunk(content, language, self.config.fallback_block_lines);
        debug!(filename = file.filename(), %language, chunks = chunks.len(), "chunked");

        let mut minified = String::with_capacity(content.len());
        let mut comments_removed = 0;
        for chunk in &chunks {
            let m = minifier::minify(chunk.text(content), language, self.config.aggressive_minify);
            comments_removed += m.comments_removed;
            minified.push_str(&m.code);
        }
        let minified_tokens = estimate_tokens(&minified);
        debug!(
            filename = file.filename(),
            comments_removed,
            tokens = minified_tokens,
            "minified"
        );

        let substitution = hasher::hash_patterns(&minified, &self.config);
        let restored = hasher::expand(&substitution.text, &substitution.table)
            .map_err(|e| CompressError::stage("hash", e))?;
        if restored != minified {
            return Err(CompressError::stage(
                "hash",
                "substituted text does not expand back to the minified text",
            ));
        }
        debug!(
            filename = file.filename(),
            entries = substitution.table.len(),
            "hashed patterns"
        );

        let huffman_table = huffman::HuffmanTable::build(substitution.text.as_bytes());
        if !huffman_table.is_prefix_free() {
            return Err(CompressError::stage("huffman", "code table is not prefix-free"));
        }
        let compression_ratio =
            huffman::compression_ratio(substitution.text.as_bytes(), &huffman_table);

        let summary = summary::summarise(
            content,
            &chunks,
            language,
            substitution.text.clone(),
            original_tokens,
        );
        let decode_preamble = self.config.include_preamble.then(|| {
            summary::decode_preamble(file.filename(), language, &substitution.table, &summary)
        });

        debug!(
            filename = file.filename(),
            best_level = %summary.best_level,
            original_tokens,
            best_tokens = summary.best_tokens,
            "summarised"
        );

        Ok(CompressionResult {
            filename: file.filename().to_string(),
            original_tokens,
            best_tokens: summary.best_tokens,
            best_level: summary.best_level,
            summary_levels: summary.levels,
            minification: MinificationStats {
                reduction_pct: minifier::reduction_pct(original_tokens, minified_tokens),
                code: minified,
                tokens: minified_tokens,
            },
            huffman: HuffmanStats { compression_ratio },
            hash_table: HashTableStats {
                entries_count: substitution.table.len(),
            },
            language,
            total_chunks: chunks.len(),
            overall_reduction_pct: summary.overall_reduction_pct,
            decode_preamble,
        })
    }

    /// Compress every input independently. Reports come back in input order;
    /// a failing file is marked with its error and does not affect the rest.
    pub fn compress_batch(&self, inputs: &[FileInput]) -> Vec<FileReport> {
        let run = |input: &FileInput| {
            FileReport::new(
                input,
                self.compress_file(&input.filename, input.content.as_bytes()),
            )
        };
        let reports: Vec<FileReport> = if self.config.parallel && inputs.len() > 1 {
            inputs.par_iter().map(run).collect()
        } else {
            inputs.iter().map(run).collect()
        };
        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        info!(files = reports.len(), failed, "compressed batch");
        reports
    }

    /// Archive `inputs` for lossless export. Files that fail admission or
    /// encoding are left out of the bundle and reported in input order.
    pub fn encode_bundle(&self, inputs: &[FileInput]) -> BundleExport {
        let run = |input: &FileInput| {
            SourceFile::from_text(&input.filename, &input.content, &self.config)
                .and_then(|file| bundle::encode_entry(&file, &self.config))
        };
        let outcomes: Vec<_> = if self.config.parallel && inputs.len() > 1 {
            inputs.par_iter().map(run).collect()
        } else {
            inputs.iter().map(run).collect()
        };

        let mut entries = Vec::with_capacity(inputs.len());
        let mut rejected = Vec::new();
        for (input, outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                Ok(entry) => entries.push(entry),
                Err(err) => rejected.push(FileReport::new(input, Err(err))),
            }
        }
        info!(
            files = entries.len(),
            rejected = rejected.len(),
            "encoded export bundle"
        );
        BundleExport {
            bundle: LosslessBundle::from_entries(entries),
            rejected,
        }
    }

    /// Render a bundle in the requested form.
    pub fn export(
        &self,
        bundle: &LosslessBundle,
        format: ArchiveFormat,
    ) -> Result<String, CompressError> {
        match format {
            ArchiveFormat::Json => bundle.to_json(),
            ArchiveFormat::Envelope => envelope::wrap(bundle, self.config.envelope_line_width),
        }
    }

    /// Decode an archive or envelope.
    pub fn decode(&self, text: &str) -> Result<DecodeResponse, CompressError> {
        bundle::decode(text)
    }
}
