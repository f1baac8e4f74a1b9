//! Language-aware minification: strip comments and redundant whitespace.
//!
//! String literals are matched ahead of comments so comment markers inside
//! strings survive, and whitespace inside a string is never touched. Block
//! comments become a single space, which keeps the surrounding tokens apart
//! and makes a second pass a no-op.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

use crate::language::{estimate_tokens, CommentStyle, Language};

/// Double-quoted string; may span lines.
const DQ_STRING: &str = r#""(?:\\[\s\S]|[^"\\])*""#;
/// Double-quoted string confined to one line (Python).
const DQ_LINE_STRING: &str = r#""(?:\\[\s\S]|[^"\\\n])*""#;
const SQ_STRING: &str = r"'(?:\\[\s\S]|[^'\\])*'";
const SQ_LINE_STRING: &str = r"'(?:\\[\s\S]|[^'\\\n])*'";
const BT_STRING: &str = r"`(?:\\[\s\S]|[^`\\])*`";
const TRIPLE_STRING: &str = r#""""[\s\S]*?"""|'''[\s\S]*?'''"#;
const RUST_RAW_STRING: &str =
    r####"r"[^"]*"|r#"[\s\S]*?"#|r##"[\s\S]*?"##|r###"[\s\S]*?"###"####;
/// A single character; a lifetime such as `'a` never closes.
const RUST_CHAR: &str = r"'(?:\\u\{[0-9a-fA-F]{1,6}\}|\\x[0-9a-fA-F]{2}|\\[\s\S]|[^'\\\n])'";
const BLOCK_COMMENT: &str = r"/\*[\s\S]*?\*/";
const LINE_COMMENT: &str = r"//[^\n]*";
const PY_COMMENT: &str = r"#[^\n]*";
/// `#` opens a comment only at a word start (`$#` and `a#b` are not comments).
const HASH_COMMENT: &str = r"(?m:(?:^|[ \t])#[^\n]*)";
const MARKUP_COMMENT: &str = r"<!--[\s\S]*?-->";

fn comment_regex(keep: &[&str], drop: &[&str]) -> Regex {
    let pattern = if keep.is_empty() {
        format!("(?P<drop>{})", drop.join("|"))
    } else {
        format!("(?P<keep>{})|(?P<drop>{})", keep.join("|"), drop.join("|"))
    };
    Regex::new(&pattern).expect("static minifier pattern")
}

static RUST_RE: LazyLock<Regex> = LazyLock::new(|| {
    comment_regex(&[RUST_RAW_STRING, DQ_STRING, RUST_CHAR], &[BLOCK_COMMENT, LINE_COMMENT])
});
static C_FAMILY_RE: LazyLock<Regex> = LazyLock::new(|| {
    comment_regex(&[DQ_STRING, SQ_LINE_STRING, BT_STRING], &[BLOCK_COMMENT, LINE_COMMENT])
});
static PYTHON_RE: LazyLock<Regex> = LazyLock::new(|| {
    comment_regex(&[TRIPLE_STRING, DQ_LINE_STRING, SQ_LINE_STRING], &[PY_COMMENT])
});
static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    comment_regex(&[TRIPLE_STRING, DQ_STRING, SQ_STRING], &[HASH_COMMENT])
});
static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| comment_regex(&[], &[MARKUP_COMMENT]));
static CSS_RE: LazyLock<Regex> =
    LazyLock::new(|| comment_regex(&[DQ_STRING, SQ_LINE_STRING], &[BLOCK_COMMENT]));

fn lexer(language: Language) -> Option<&'static Regex> {
    if language == Language::Rust {
        return Some(&RUST_RE);
    }
    match language.comment_style() {
        CommentStyle::CFamily => Some(&C_FAMILY_RE),
        CommentStyle::Python => Some(&PYTHON_RE),
        CommentStyle::Hash => Some(&HASH_RE),
        CommentStyle::Markup => Some(&MARKUP_RE),
        CommentStyle::Css => Some(&CSS_RE),
        CommentStyle::None => None,
    }
}

/// Byte ranges of every string literal and comment in `text`, in order.
pub fn lexical_spans(text: &str, language: Language) -> Vec<Range<usize>> {
    match lexer(language) {
        Some(re) => re.find_iter(text).map(|m| m.range()).collect(),
        None => Vec::new(),
    }
}

/// Whether `pos` falls strictly inside one of the sorted, disjoint `spans`.
pub(crate) fn within(spans: &[Range<usize>], pos: usize) -> bool {
    let i = spans.partition_point(|r| r.end <= pos);
    spans.get(i).is_some_and(|r| r.start < pos)
}

/// Output of a minification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Minified {
    pub code: String,
    pub original_tokens: usize,
    pub tokens: usize,
    pub reduction_pct: f64,
    pub comments_removed: usize,
}

/// `(1 - part/whole) * 100`, rounded to two places; 0 when `whole` is 0.
pub fn reduction_pct(whole: usize, part: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let pct = (1.0 - part as f64 / whole as f64) * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Minify `text` for `language`.
pub fn minify(text: &str, language: Language, aggressive: bool) -> Minified {
    let stripped = strip_comments(text, language);
    let code = normalise_whitespace(
        &stripped.text,
        &stripped.literals,
        aggressive && language.uses_braces(),
        aggressive,
    );
    let original_tokens = estimate_tokens(text);
    let tokens = estimate_tokens(&code);
    Minified {
        code,
        original_tokens,
        tokens,
        reduction_pct: reduction_pct(original_tokens, tokens),
        comments_removed: stripped.removed,
    }
}

struct Stripped {
    text: String,
    /// String literal ranges in `text`.
    literals: Vec<Range<usize>>,
    removed: usize,
}

fn strip_comments(text: &str, language: Language) -> Stripped {
    let Some(re) = lexer(language) else {
        return Stripped {
            text: text.to_string(),
            literals: Vec::new(),
            removed: 0,
        };
    };
    let mut out = String::with_capacity(text.len());
    let mut literals = Vec::new();
    let mut removed = 0;
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        if caps.name("keep").is_some() {
            let start = out.len();
            out.push_str(whole.as_str());
            literals.push(start..out.len());
        } else {
            removed += 1;
            // A line comment ends at the newline; a block comment collapses to a space.
            let comment = whole.as_str().trim_start();
            if !(comment.starts_with("//") || comment.starts_with('#')) {
                out.push(' ');
            }
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Stripped {
        text: out,
        literals,
        removed,
    }
}

fn normalise_whitespace(
    text: &str,
    literals: &[Range<usize>],
    strip_indent: bool,
    drop_blank: bool,
) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    let mut start = 0;
    for raw in text.split('\n') {
        let end = start + raw.len();
        let opens_in_literal = within(literals, start);
        let mut line = raw;
        if !within(literals, end) {
            line = line.trim_end();
        }
        if strip_indent && !opens_in_literal {
            line = line.trim_start();
        }
        start = end + 1;

        if line.is_empty() && !opens_in_literal {
            blank_run += 1;
            if drop_blank || blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
