//! Multi-level summaries: architecture, skeleton and compressed views of a file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunker::{Chunk, ChunkKind};
use crate::hasher::{HashTable, SIGIL};
use crate::language::{estimate_tokens, Language};
use crate::minifier::reduction_pct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Architecture,
    Skeleton,
    Compressed,
}

impl Level {
    /// Tie-break order for the best level: highest fidelity first.
    pub const PREFERENCE: [Level; 3] = [Level::Compressed, Level::Skeleton, Level::Architecture];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Skeleton => "skeleton",
            Self::Compressed => "compressed",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Architecture => "top-level declaration signatures only, no bodies",
            Self::Skeleton => "signatures with their leading comments, bodies shown as `...`",
            Self::Compressed => {
                "full code with comments and blank runs removed and repeated text replaced by references"
            }
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryLevel {
    pub content: String,
    pub token_count: usize,
    pub reduction_pct: f64,
}

impl SummaryLevel {
    fn new(content: String, original_tokens: usize) -> Self {
        let token_count = estimate_tokens(&content);
        Self {
            reduction_pct: reduction_pct(original_tokens, token_count),
            content,
            token_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub levels: BTreeMap<Level, SummaryLevel>,
    pub best_level: Level,
    pub best_tokens: usize,
    pub overall_reduction_pct: f64,
}

fn signature_only(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_suffix('{').unwrap_or(line).trim_end();
    line.strip_suffix(':').unwrap_or(line)
}

fn elide(line: &str, language: Language) -> String {
    let line = line.trim_end();
    if language.uses_braces() {
        if let Some(head) = line.strip_suffix('{') {
            return format!("{head}{{ ... }}");
        }
    } else if line.ends_with(':') {
        return format!("{line} ...");
    }
    line.to_string()
}

/// Top-level declaration signatures, one per line.
pub fn architecture(content: &str, chunks: &[Chunk], language: Language) -> String {
    let mut out = String::new();
    for outline in chunks.iter().filter_map(|c| c.outline(content, language)) {
        out.push_str(signature_only(outline.signature));
        out.push('\n');
    }
    out
}

/// Signatures with leading comments; bodies elided, class members listed.
pub fn skeleton(content: &str, chunks: &[Chunk], language: Language) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let Some(outline) = chunk.outline(content, language) else {
            continue;
        };
        for line in &outline.leading {
            out.push_str(line);
            out.push('\n');
        }
        if chunk.kind == ChunkKind::Class && !outline.members.is_empty() {
            out.push_str(outline.signature);
            out.push('\n');
            for member in &outline.members {
                out.push_str(&elide(member, language));
                out.push('\n');
            }
            if language.uses_braces() && outline.signature.ends_with('{') {
                out.push_str("}\n");
            }
        } else {
            out.push_str(&elide(outline.signature, language));
            out.push('\n');
        }
    }
    out
}

/// Lowest token count wins; ties go to the higher-fidelity level. A level
/// that came out empty for a non-empty file carries nothing and is skipped.
fn select_best(levels: &BTreeMap<Level, SummaryLevel>, original_tokens: usize) -> (Level, usize) {
    let mut best: Option<(Level, usize)> = None;
    for level in Level::PREFERENCE {
        let Some(summary) = levels.get(&level) else {
            continue;
        };
        if original_tokens > 0 && summary.content.trim().is_empty() {
            continue;
        }
        match best {
            Some((_, tokens)) if summary.token_count >= tokens => {}
            _ => best = Some((level, summary.token_count)),
        }
    }
    best.unwrap_or((Level::Compressed, 0))
}

/// Assemble all three levels for one file. `compressed` is the minified,
/// hash-substituted text.
pub fn summarise(
    content: &str,
    chunks: &[Chunk],
    language: Language,
    compressed: String,
    original_tokens: usize,
) -> Summary {
    let levels = BTreeMap::from([
        (
            Level::Architecture,
            SummaryLevel::new(architecture(content, chunks, language), original_tokens),
        ),
        (
            Level::Skeleton,
            SummaryLevel::new(skeleton(content, chunks, language), original_tokens),
        ),
        (
            Level::Compressed,
            SummaryLevel::new(compressed, original_tokens),
        ),
    ]);
    let (best_level, best_tokens) = select_best(&levels, original_tokens);
    Summary {
        overall_reduction_pct: reduction_pct(original_tokens, best_tokens),
        levels,
        best_level,
        best_tokens,
    }
}

fn display_pattern(pattern: &str) -> String {
    if pattern.chars().any(char::is_whitespace) {
        format!("{pattern:?}")
    } else {
        pattern.to_string()
    }
}

/// Plain-text notes that let a reader undo the compression by hand.
pub fn decode_preamble(
    filename: &str,
    language: Language,
    table: &HashTable,
    summary: &Summary,
) -> String {
    let mut out = format!("[tokentrim] {filename} ({language})\n");
    out.push_str(&format!(
        "Best level: {} ({} tokens, {}% smaller).\n",
        summary.best_level, summary.best_tokens, summary.overall_reduction_pct
    ));
    for (level, detail) in &summary.levels {
        out.push_str(&format!(
            "- {level}: {} ({} tokens)\n",
            level.description(),
            detail.token_count
        ));
    }
    if !table.is_empty() {
        out.push_str(&format!(
            "References: `{SIGIL}` plus lowercase letters and one capital stands for the text below; `{SIGIL}{SIGIL}` is a literal `{SIGIL}`. Quoted entries are whole lines.\n"
        ));
        for (reference, pattern) in table.iter() {
            out.push_str(&format!("{reference} = {}\n", display_pattern(pattern)));
        }
    }
    out
}
