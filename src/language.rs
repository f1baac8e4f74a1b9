//! Language detection and token estimation.
//!
//! Token counts are an approximation of LLM tokenization (roughly four
//! characters per token), not the output of any specific tokenizer.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::CompressionConfig;
use crate::error::CompressError;

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Kotlin,
    Swift,
    Php,
    Ruby,
    Shell,
    Yaml,
    Toml,
    Html,
    Css,
    Markdown,
    Json,
    Unknown,
}

/// How a language writes comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `//` and `/* */`
    CFamily,
    /// `#` to end of line
    Hash,
    /// `#` comments plus triple-quoted strings that must be kept intact
    Python,
    /// `<!-- -->`
    Markup,
    /// `/* */` only
    Css,
    None,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Kotlin => "kotlin",
            Self::Swift => "swift",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Shell => "shell",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Html => "html",
            Self::Css => "css",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Unknown => "unknown",
        }
    }

    /// Inverse of [`Language::name`]; unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "rust" => Self::Rust,
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" => Self::C,
            "cpp" => Self::Cpp,
            "csharp" => Self::CSharp,
            "kotlin" => Self::Kotlin,
            "swift" => Self::Swift,
            "php" => Self::Php,
            "ruby" => Self::Ruby,
            "shell" => Self::Shell,
            "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            "html" => Self::Html,
            "css" => Self::Css,
            "markdown" => Self::Markdown,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" => Self::TypeScript,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "kt" | "kts" => Self::Kotlin,
            "swift" => Self::Swift,
            "php" => Self::Php,
            "rb" => Self::Ruby,
            "sh" | "bash" | "zsh" => Self::Shell,
            "yaml" | "yml" => Self::Yaml,
            "toml" => Self::Toml,
            "html" | "htm" | "xml" | "svg" | "vue" => Self::Html,
            "css" | "scss" | "less" => Self::Css,
            "md" | "markdown" => Self::Markdown,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Detect from the filename extension, falling back to a content sniff.
    pub fn detect(filename: &str, content: &str) -> Self {
        let by_ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown);
        if by_ext != Self::Unknown {
            return by_ext;
        }
        Self::sniff(content)
    }

    fn sniff(content: &str) -> Self {
        if content.contains("fn ") && content.contains("->") {
            Self::Rust
        } else if content.contains("def ") && content.contains(':') {
            Self::Python
        } else if content.contains("function ") || content.contains("const ") {
            Self::JavaScript
        } else if content.contains("func ") {
            Self::Go
        } else {
            Self::Unknown
        }
    }

    pub fn comment_style(&self) -> CommentStyle {
        match self {
            Self::Rust
            | Self::JavaScript
            | Self::TypeScript
            | Self::Go
            | Self::Java
            | Self::C
            | Self::Cpp
            | Self::CSharp
            | Self::Kotlin
            | Self::Swift
            | Self::Php => CommentStyle::CFamily,
            Self::Python => CommentStyle::Python,
            Self::Ruby | Self::Shell | Self::Yaml | Self::Toml => CommentStyle::Hash,
            Self::Html => CommentStyle::Markup,
            Self::Css => CommentStyle::Css,
            Self::Markdown | Self::Json | Self::Unknown => CommentStyle::None,
        }
    }

    /// Languages whose indentation carries no meaning.
    pub fn uses_braces(&self) -> bool {
        matches!(self.comment_style(), CommentStyle::CFamily | CommentStyle::Css)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Estimate the LLM token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// An admitted input file. Content is guaranteed to be text within the size ceiling.
#[derive(Debug, Clone)]
pub struct SourceFile {
    filename: String,
    content: String,
    language: Language,
}

impl SourceFile {
    /// Admit raw bytes: reject oversized or non-text content.
    pub fn from_bytes(
        filename: &str,
        bytes: Vec<u8>,
        config: &CompressionConfig,
    ) -> Result<Self, CompressError> {
        if bytes.len() > config.max_input_size {
            return Err(CompressError::Content(format!(
                "{filename} is {} bytes, above the {} byte limit",
                bytes.len(),
                config.max_input_size
            )));
        }
        let content = String::from_utf8(bytes).map_err(|e| {
            CompressError::Content(format!(
                "{filename} is not valid UTF-8 text (byte {})",
                e.utf8_error().valid_up_to()
            ))
        })?;
        Self::admit(filename, content)
    }

    pub fn from_text(
        filename: &str,
        content: &str,
        config: &CompressionConfig,
    ) -> Result<Self, CompressError> {
        if content.len() > config.max_input_size {
            return Err(CompressError::Content(format!(
                "{filename} is {} bytes, above the {} byte limit",
                content.len(),
                config.max_input_size
            )));
        }
        Self::admit(filename, content.to_string())
    }

    fn admit(filename: &str, content: String) -> Result<Self, CompressError> {
        if let Some(pos) = content.bytes().position(|b| b == 0) {
            return Err(CompressError::Content(format!(
                "{filename} looks binary (NUL byte at offset {pos})"
            )));
        }
        let language = Language::detect(filename, &content);
        Ok(Self {
            filename: filename.to_string(),
            content,
            language,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn token_estimate(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(Language::detect("main.rs", ""), Language::Rust);
        assert_eq!(Language::detect("app.TSX", ""), Language::TypeScript);
        assert_eq!(Language::detect("build.gradle.kts", ""), Language::Kotlin);
    }

    #[test]
    fn test_detect_by_content() {
        assert_eq!(Language::detect("script", "def run():\n    pass\n"), Language::Python);
        assert_eq!(Language::detect("notes", "just words"), Language::Unknown);
    }

    #[test]
    fn test_name_roundtrip() {
        for lang in [Language::Rust, Language::CSharp, Language::Unknown] {
            assert_eq!(Language::from_name(lang.name()), lang);
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("§§§§§"), 2);
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let config = CompressionConfig::default();
        let err = SourceFile::from_bytes("x.bin", vec![0xff, 0xfe, 0x00], &config).unwrap_err();
        assert_eq!(err.kind(), "ContentError");
    }

    #[test]
    fn test_rejects_nul_and_oversize() {
        let config = CompressionConfig {
            max_input_size: 8,
            ..CompressionConfig::default()
        };
        assert!(SourceFile::from_text("a.txt", "a\0b", &config).is_err());
        assert!(SourceFile::from_text("a.txt", "123456789", &config).is_err());
        assert!(SourceFile::from_text("a.txt", "12345678", &config).is_ok());
    }
}
