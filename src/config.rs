//! Configuration for tokentrim

use serde::{Deserialize, Serialize};

use crate::error::CompressError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Size ceiling in bytes; larger files are rejected before the pipeline.
    pub max_input_size: usize,
    pub min_identifier_len: usize,
    pub min_line_len: usize,
    pub max_hash_entries: usize,
    /// Net characters a pattern must save, after its legend entry, to be hashed.
    pub min_net_savings: usize,
    pub fallback_block_lines: usize,
    pub aggressive_minify: bool,
    pub include_preamble: bool,
    pub parallel: bool,
    pub envelope_line_width: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_input_size: 2 * 1024 * 1024, // 2 MB
            min_identifier_len: 4,
            min_line_len: 20,
            max_hash_entries: 702,
            min_net_savings: 1,
            fallback_block_lines: 40,
            aggressive_minify: false,
            include_preamble: true,
            parallel: true,
            envelope_line_width: 76,
        }
    }
}

impl CompressionConfig {
    /// Parse a (possibly partial) JSON config; missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, CompressError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompressError> {
        if self.fallback_block_lines == 0 {
            return Err(CompressError::Config(
                "fallback_block_lines must be at least 1".into(),
            ));
        }
        if self.envelope_line_width < 4 {
            return Err(CompressError::Config(
                "envelope_line_width must be at least 4".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CompressionConfig::from_json(r#"{"max_input_size": 10}"#).unwrap();
        assert_eq!(config.max_input_size, 10);
        assert_eq!(config.min_line_len, 20);
        assert!(config.include_preamble);
    }

    #[test]
    fn test_rejects_zero_block_lines() {
        assert!(CompressionConfig::from_json(r#"{"fallback_block_lines": 0}"#).is_err());
    }
}
