//! Pattern hashing: replaces recurring identifiers and lines with short
//! reversible references.
//!
//! A reference is the sigil `§` followed by a prefix-free key: zero or more
//! lowercase letters closed by one uppercase letter (`§A`, `§Z`, `§aA`, ...).
//! A literal `§` in the input is written as `§§`, so every substituted text
//! parses back unambiguously.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use crate::config::CompressionConfig;
use crate::error::CompressError;

pub const SIGIL: char = '§';

/// Characters a legend line spends beyond the reference and the pattern (` = ` or similar).
const LEGEND_OVERHEAD: usize = 3;

/// Ranked candidates examined per table slot.
const CANDIDATES_PER_ENTRY: usize = 2;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").expect("static word pattern"));

/// Keywords left readable even when they repeat.
const KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "default", "elif",
    "else", "enum", "export", "extends", "false", "final", "from", "func", "function", "impl",
    "implements", "import", "interface", "lambda", "match", "None", "null", "package", "pass",
    "private", "protected", "public", "raise", "return", "self", "Self", "static", "struct",
    "super", "switch", "this", "throw", "trait", "True", "true", "False", "type", "typeof", "void",
    "where", "while", "with", "yield",
];

/// Reference → original text. Keys are unique within one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashTable {
    entries: BTreeMap<String, String>,
}

impl HashTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.entries.get(reference).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check that every key is a well-formed reference.
    pub fn validate(&self) -> Result<(), CompressError> {
        for key in self.entries.keys() {
            if !is_reference(key) {
                return Err(CompressError::Hash(format!("invalid reference key {key:?}")));
            }
        }
        Ok(())
    }
}

fn is_reference(key: &str) -> bool {
    let Some(rest) = key.strip_prefix(SIGIL) else {
        return false;
    };
    let bytes = rest.as_bytes();
    match bytes.split_last() {
        Some((last, prefix)) => {
            last.is_ascii_uppercase() && prefix.iter().all(|b| b.is_ascii_lowercase())
        }
        None => false,
    }
}

/// The reference for table slot `index`, bijective over `[a-z]*[A-Z]`.
pub fn reference_key(index: usize) -> String {
    let mut n = index;
    let last = (b'A' + (n % 26) as u8) as char;
    n /= 26;
    let mut prefix = Vec::new();
    while n > 0 {
        n -= 1;
        prefix.push((b'a' + (n % 26) as u8) as char);
        n /= 26;
    }
    let mut key = String::with_capacity(prefix.len() + 3);
    key.push(SIGIL);
    key.extend(prefix.iter().rev());
    key.push(last);
    key
}

/// Hands out references for one hashing pass. Never shared between requests.
#[derive(Debug, Default)]
struct KeyAllocator {
    next: usize,
}

impl KeyAllocator {
    fn peek_len(&self) -> usize {
        reference_key(self.next).chars().count()
    }

    fn allocate(&mut self) -> String {
        let key = reference_key(self.next);
        self.next += 1;
        key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Identifier,
    Line,
}

#[derive(Debug, Clone)]
struct Candidate {
    pattern: String,
    kind: PatternKind,
    chars: usize,
    savings: i64,
}

/// One chosen occurrence: `text[start..end]` becomes the reference in slot `key`.
#[derive(Debug, Clone, Copy)]
struct Replacement {
    start: usize,
    end: usize,
    key: usize,
}

/// Output of [`hash_patterns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    pub table: HashTable,
}

fn net_savings(chars: usize, ref_len: usize, count: usize) -> i64 {
    let per_use = chars as i64 - ref_len as i64;
    count as i64 * per_use - (chars + ref_len + LEGEND_OVERHEAD) as i64
}

fn collect_candidates(text: &str, config: &CompressionConfig) -> Vec<Candidate> {
    let mut identifiers: HashMap<&str, usize> = HashMap::new();
    for m in WORD_RE.find_iter(text) {
        let word = m.as_str();
        if word.len() >= config.min_identifier_len
            && !word.as_bytes()[0].is_ascii_digit()
            && !KEYWORDS.contains(&word)
        {
            *identifiers.entry(word).or_insert(0) += 1;
        }
    }
    let mut lines: HashMap<&str, usize> = HashMap::new();
    for line in text.split_inclusive('\n') {
        if line.ends_with('\n') && line.trim().chars().count() >= config.min_line_len {
            *lines.entry(line).or_insert(0) += 1;
        }
    }

    let first_ref = reference_key(0).chars().count();
    let mut candidates: Vec<Candidate> = identifiers
        .into_iter()
        .map(|(p, c)| (p, c, PatternKind::Identifier))
        .chain(lines.into_iter().map(|(p, c)| (p, c, PatternKind::Line)))
        .filter(|(_, count, _)| *count >= 2)
        .map(|(pattern, count, kind)| {
            let chars = pattern.chars().count();
            Candidate {
                pattern: pattern.to_string(),
                kind,
                chars,
                savings: net_savings(chars, first_ref, count),
            }
        })
        .filter(|c| c.savings >= config.min_net_savings as i64)
        .collect();

    candidates.sort_by(|a, b| {
        b.savings
            .cmp(&a.savings)
            .then(b.chars.cmp(&a.chars))
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    candidates.truncate(config.max_hash_entries.saturating_mul(CANDIDATES_PER_ENTRY));
    candidates
}

fn patterns_of(candidates: &[Candidate], kind: PatternKind) -> HashSet<&str> {
    candidates
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.pattern.as_str())
        .collect()
}

/// Where each candidate occurs, indexed once so selection never rescans the text.
struct Occurrences<'a> {
    line_starts: Vec<usize>,
    /// Identifier → (byte offset, line number) of every whole-word occurrence.
    words: HashMap<&'a str, Vec<(usize, usize)>>,
    /// Line text → numbers of the lines that equal it.
    lines: HashMap<&'a str, Vec<usize>>,
}

impl<'a> Occurrences<'a> {
    fn index(text: &'a str, candidates: &[Candidate]) -> Self {
        let wanted_words = patterns_of(candidates, PatternKind::Identifier);
        let wanted_lines = patterns_of(candidates, PatternKind::Line);

        let mut line_starts = Vec::new();
        let mut lines: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut offset = 0;
        for (number, line) in text.split_inclusive('\n').enumerate() {
            line_starts.push(offset);
            if wanted_lines.contains(line) {
                lines.entry(line).or_default().push(number);
            }
            offset += line.len();
        }

        let mut words: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();
        let mut line = 0;
        for m in WORD_RE.find_iter(text) {
            while line + 1 < line_starts.len() && line_starts[line + 1] <= m.start() {
                line += 1;
            }
            if wanted_words.contains(m.as_str()) {
                words.entry(m.as_str()).or_default().push((m.start(), line));
            }
        }

        Self {
            line_starts,
            words,
            lines,
        }
    }
}

fn push_escaped(out: &mut String, literal: &str) {
    for c in literal.chars() {
        if c == SIGIL {
            out.push(SIGIL);
        }
        out.push(c);
    }
}

/// `replacements` must be sorted by `start` and disjoint.
fn render(text: &str, replacements: &[Replacement], keys: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for r in replacements {
        push_escaped(&mut out, &text[cursor..r.start]);
        out.push_str(&keys[r.key]);
        cursor = r.end;
    }
    push_escaped(&mut out, &text[cursor..]);
    out
}

/// Substitute the patterns that pay for themselves, densest savings first.
///
/// A line that has been replaced whole hides the identifiers on it, and a
/// line with a replaced identifier no longer matches as a line.
pub fn hash_patterns(text: &str, config: &CompressionConfig) -> Substitution {
    let candidates = collect_candidates(text, config);
    let index = Occurrences::index(text, &candidates);
    let mut line_taken = vec![false; index.line_starts.len()];
    let mut words_taken = vec![0usize; index.line_starts.len()];

    let mut replacements = Vec::new();
    let mut keys = KeyAllocator::default();
    let mut chosen: Vec<String> = Vec::new();
    let mut entries = BTreeMap::new();

    for cand in candidates {
        if entries.len() >= config.max_hash_entries {
            break;
        }
        let live: Vec<(usize, usize)> = match cand.kind {
            PatternKind::Identifier => index
                .words
                .get(cand.pattern.as_str())
                .into_iter()
                .flatten()
                .filter(|(_, line)| !line_taken[*line])
                .copied()
                .collect(),
            PatternKind::Line => index
                .lines
                .get(cand.pattern.as_str())
                .into_iter()
                .flatten()
                .filter(|&&line| !line_taken[line] && words_taken[line] == 0)
                .map(|&line| (index.line_starts[line], line))
                .collect(),
        };
        // Earlier substitutions may have consumed some occurrences.
        if net_savings(cand.chars, keys.peek_len(), live.len()) < config.min_net_savings as i64 {
            continue;
        }
        let slot = chosen.len();
        for &(start, line) in &live {
            match cand.kind {
                PatternKind::Identifier => words_taken[line] += 1,
                PatternKind::Line => line_taken[line] = true,
            }
            replacements.push(Replacement {
                start,
                end: start + cand.pattern.len(),
                key: slot,
            });
        }
        let key = keys.allocate();
        chosen.push(key.clone());
        entries.insert(key, cand.pattern);
    }

    replacements.sort_unstable_by_key(|r| r.start);
    Substitution {
        text: render(text, &replacements, &chosen),
        table: HashTable { entries },
    }
}

/// Reverse [`hash_patterns`]: expand every reference and unescape `§§`.
pub fn expand(text: &str, table: &HashTable) -> Result<String, CompressError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != SIGIL {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&SIGIL) {
            chars.next();
            out.push(SIGIL);
            continue;
        }
        let mut key = String::from(SIGIL);
        loop {
            match chars.next() {
                Some(k) if k.is_ascii_lowercase() => key.push(k),
                Some(k) if k.is_ascii_uppercase() => {
                    key.push(k);
                    break;
                }
                _ => {
                    return Err(CompressError::Hash(format!(
                        "malformed reference starting {key:?}"
                    )))
                }
            }
        }
        let pattern = table
            .get(&key)
            .ok_or_else(|| CompressError::Hash(format!("unknown reference {key}")))?;
        out.push_str(pattern);
    }
    Ok(out)
}
