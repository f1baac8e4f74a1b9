//! Structural chunker: splits a file at function/class/block boundaries.
//!
//! Chunks are byte ranges over whole lines. For any input the chunks are
//! contiguous, never overlap, and together span the entire content.
//! Declarations are only recognised at the top level, so a class absorbs its
//! methods instead of being split around them. No chunk starts inside a
//! multi-line string or block comment.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

use crate::language::Language;
use crate::minifier::{lexical_spans, within};

/// Lines scanned past a declaration looking for its opening brace.
const SIGNATURE_LOOKAHEAD: usize = 8;

/// Names the broad declaration patterns can capture that are really control flow.
const CONTROL_WORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "else", "match", "sizeof", "new", "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Block,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    pub fn text<'a>(&self, content: &'a str) -> &'a str {
        &content[self.start_offset..self.end_offset]
    }

    /// Signature view of a function/class chunk: leading comments, the
    /// declaration line and, for classes, nested member signatures.
    pub fn outline<'a>(&self, content: &'a str, language: Language) -> Option<Outline<'a>> {
        if !matches!(self.kind, ChunkKind::Function | ChunkKind::Class) {
            return None;
        }
        let family = family(language)?;
        let mut lines = self.text(content).lines();
        let mut leading = Vec::new();
        let signature = loop {
            let line = lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            if family.is_trivia(line) {
                leading.push(line.trim_end());
            } else {
                break line.trim_end();
            }
        };
        let members = match (self.kind, &family.members) {
            (ChunkKind::Class, Some(re)) => lines
                .filter(|l| family.captures_declaration(re, l))
                .map(str::trim_end)
                .collect(),
            _ => Vec::new(),
        };
        Some(Outline {
            leading,
            signature,
            members,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline<'a> {
    pub leading: Vec<&'a str>,
    pub signature: &'a str,
    pub members: Vec<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStyle {
    Braces,
    Indent,
    /// Indentation with a closing `end` keyword at the declaration's level.
    IndentWithEnd,
}

struct Family {
    declarations: Vec<(Regex, ChunkKind)>,
    members: Option<Regex>,
    imports: Regex,
    trivia: &'static [&'static str],
    style: BlockStyle,
}

impl Family {
    fn classify(&self, line: &str) -> Option<ChunkKind> {
        if self.imports.is_match(line) {
            return Some(ChunkKind::Other);
        }
        self.declarations
            .iter()
            .find(|(re, _)| self.captures_declaration(re, line))
            .map(|(_, kind)| *kind)
    }

    fn captures_declaration(&self, re: &Regex, line: &str) -> bool {
        match re.captures(line) {
            Some(caps) => caps
                .name("name")
                .map_or(true, |m| !CONTROL_WORDS.contains(&m.as_str())),
            None => false,
        }
    }

    fn is_trivia(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        !trimmed.is_empty() && self.trivia.iter().any(|p| trimmed.starts_with(p))
    }

    fn block_end(&self, lines: &[&str], start: usize) -> usize {
        match self.style {
            BlockStyle::Braces => self.brace_block_end(lines, start),
            BlockStyle::Indent => indent_block_end(lines, start, false),
            BlockStyle::IndentWithEnd => indent_block_end(lines, start, true),
        }
    }

    fn brace_block_end(&self, lines: &[&str], start: usize) -> usize {
        let mut depth = 0i64;
        let mut opened = false;
        for (i, line) in lines.iter().enumerate().skip(start) {
            if !opened && i > start {
                // A body never opened: stop before the next declaration or blank line.
                let bare = line.trim_end_matches(['\n', '\r']);
                if bare.trim().is_empty() || self.classify(bare).is_some() {
                    return i - 1;
                }
            }
            let (delta, saw_open) = brace_delta(line);
            depth += delta;
            opened |= saw_open;
            if opened && depth <= 0 {
                return i;
            }
            if !opened {
                if line.trim_end().ends_with(';') {
                    return i;
                }
                if i >= start + SIGNATURE_LOOKAHEAD {
                    return start;
                }
            }
        }
        if opened {
            lines.len() - 1
        } else {
            start
        }
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static chunker pattern")
}

static RUST: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (
            re(r#"^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+\w+"#),
            ChunkKind::Function,
        ),
        (
            re(r"^(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|union|trait|mod)\s+\w+"),
            ChunkKind::Class,
        ),
        (re(r"^(?:unsafe\s+)?impl\b"), ChunkKind::Class),
        (re(r"^macro_rules!\s*\w+"), ChunkKind::Function),
    ],
    members: Some(re(
        r"^\s+(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+\w+",
    )),
    imports: re(r"^(?:pub(?:\([^)]*\))?\s+)?(?:use\s|extern\s+crate\s)"),
    trivia: &["//", "/*", "*", "#[", "#!["],
    style: BlockStyle::Braces,
});

static PYTHON: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (re(r"^class\s+\w+"), ChunkKind::Class),
        (re(r"^(?:async\s+)?def\s+\w+"), ChunkKind::Function),
    ],
    members: Some(re(r"^\s+(?:async\s+)?def\s+\w+")),
    imports: re(r"^(?:from\s+\S+\s+import\s|import\s)"),
    trivia: &["#", "@"],
    style: BlockStyle::Indent,
});

static JS_TS: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (
            re(r"^(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:class|interface|enum|namespace)\s+\w+"),
            ChunkKind::Class,
        ),
        (re(r"^(?:export\s+)?type\s+\w+"), ChunkKind::Class),
        (
            re(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\b"),
            ChunkKind::Function,
        ),
        (
            re(r"^(?:export\s+)?(?:const|let|var)\s+\w+\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|\w+\s*=>)"),
            ChunkKind::Function,
        ),
    ],
    members: Some(re(
        r"^\s+(?:(?:public|private|protected|static|async|readonly|get|set|override)\s+)*\*?(?P<name>\w+)\s*\([^;]*\)\s*(?::[^{;]+)?\{\s*$",
    )),
    imports: re(r"^(?:import\b|export\s+\*\s+from\b|(?:const|let|var)\s+.+=\s*require\()"),
    trivia: &["//", "/*", "*", "@"],
    style: BlockStyle::Braces,
});

static C_FAMILY: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (
            re(r"^(?:(?:public|private|protected|internal|static|abstract|final|sealed|partial|open|data|export)\s+)*(?:class|struct|interface|enum|record|object|namespace|protocol|extension|trait)\s+\w+"),
            ChunkKind::Class,
        ),
        (
            re(r"^(?:[A-Za-z_][\w:<>,*&\[\]]*\s+)*\**(?P<name>[A-Za-z_]\w*)\s*\([^;]*$"),
            ChunkKind::Function,
        ),
    ],
    members: Some(re(
        r"^\s+(?:[A-Za-z_][\w:<>,*&\[\]?]*\s+)+\**(?P<name>[A-Za-z_]\w*)\s*\([^;]*$",
    )),
    imports: re(r"^(?:#include|#import|import\s|using\s|package\s|require(?:_once)?\b|include(?:_once)?\b)"),
    trivia: &["//", "/*", "*", "@", "#["],
    style: BlockStyle::Braces,
});

static GO: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (re(r"^func\s+(?:\([^)]*\)\s*)?\w+"), ChunkKind::Function),
        (re(r"^type\s+\w+"), ChunkKind::Class),
    ],
    members: None,
    imports: re(r"^(?:import|package)\b"),
    trivia: &["//", "/*", "*"],
    style: BlockStyle::Braces,
});

static RUBY: LazyLock<Family> = LazyLock::new(|| Family {
    declarations: vec![
        (re(r"^(?:class|module)\s+\w+"), ChunkKind::Class),
        (re(r"^def\s+"), ChunkKind::Function),
    ],
    members: Some(re(r"^\s+def\s+")),
    imports: re(r"^(?:require|require_relative|load)\b"),
    trivia: &["#"],
    style: BlockStyle::IndentWithEnd,
});

fn family(language: Language) -> Option<&'static Family> {
    match language {
        Language::Rust => Some(&RUST),
        Language::Python => Some(&PYTHON),
        Language::JavaScript | Language::TypeScript => Some(&JS_TS),
        Language::Go => Some(&GO),
        Language::Ruby => Some(&RUBY),
        Language::C
        | Language::Cpp
        | Language::CSharp
        | Language::Java
        | Language::Kotlin
        | Language::Swift
        | Language::Php => Some(&C_FAMILY),
        _ => None,
    }
}

/// Count braces on a line, skipping string literals, char literals and `//` comments.
fn brace_delta(line: &str) -> (i64, bool) {
    let chars: Vec<char> = line.chars().collect();
    let mut delta = 0;
    let mut opened = false;
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '"' | '`' => quote = Some(c),
            '\'' if chars.get(i + 2) == Some(&'\'') => i += 2,
            '\'' if chars.get(i + 1) == Some(&'\\') && chars.get(i + 3) == Some(&'\'') => i += 3,
            '/' if chars.get(i + 1) == Some(&'/') => break,
            '{' => {
                delta += 1;
                opened = true;
            }
            '}' => delta -= 1,
            _ => {}
        }
        i += 1;
    }
    (delta, opened)
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace() && *c != '\n' && *c != '\r')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn indent_block_end(lines: &[&str], start: usize, closing_end: bool) -> usize {
    let base = indent_of(lines[start]);
    let mut last = start;
    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            // Closing brackets of a multi-line signature stay with the declaration.
            if trimmed.starts_with(')') || trimmed.starts_with(']') {
                last = i;
                continue;
            }
            if closing_end
                && indent_of(line) == base
                && (trimmed == "end" || trimmed.starts_with("end ") || trimmed.starts_with("end#"))
            {
                return i;
            }
            break;
        }
        last = i;
    }
    last
}

fn import_end(lines: &[&str], start: usize) -> usize {
    let first = lines[start];
    if first.contains('(') && !first.contains(')') {
        for (i, line) in lines.iter().enumerate().skip(start + 1) {
            if line.contains(')') {
                return i;
            }
        }
        return lines.len() - 1;
    }
    if first.contains('{') && !first.contains('}') {
        for (i, line) in lines.iter().enumerate().skip(start + 1) {
            if line.contains('}') {
                return i;
            }
        }
        return lines.len() - 1;
    }
    start
}

/// Line-level span, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
struct Span {
    first: usize,
    last: usize,
    kind: ChunkKind,
}

/// Split `content` into ordered, gap-free chunks.
pub fn chunk(content: &str, language: Language, fallback_lines: usize) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut starts = Vec::with_capacity(lines.len() + 1);
    let mut offset = 0;
    for line in &lines {
        starts.push(offset);
        offset += line.len();
    }
    starts.push(offset);

    let regions = lexical_spans(content, language);
    let fallback_lines = fallback_lines.max(1);
    let spans = match family(language) {
        Some(family) => structural_spans(&lines, &starts, &regions, family, fallback_lines),
        None => fixed_spans(0, lines.len() - 1, ChunkKind::Block, fallback_lines),
    };

    respect_regions(merge_spans(spans, &lines), &starts, &regions)
        .into_iter()
        .map(|s| Chunk {
            start_offset: starts[s.first],
            end_offset: starts[s.last + 1],
            kind: s.kind,
        })
        .collect()
}

fn structural_spans(
    lines: &[&str],
    starts: &[usize],
    regions: &[Range<usize>],
    family: &Family,
    fallback_lines: usize,
) -> Vec<Span> {
    let mut declarations = Vec::new();
    let mut floor = 0;
    let mut i = 0;
    while i < lines.len() {
        if within(regions, starts[i]) {
            i += 1;
            continue;
        }
        let line = lines[i].trim_end_matches(['\n', '\r']);
        let Some(kind) = family.classify(line) else {
            i += 1;
            continue;
        };
        let (mut first, last) = if kind == ChunkKind::Other {
            (i, import_end(lines, i))
        } else {
            (i, family.block_end(lines, i))
        };
        if kind != ChunkKind::Other {
            while first > floor && family.is_trivia(lines[first - 1]) {
                first -= 1;
            }
        }
        declarations.push(Span { first, last, kind });
        floor = last + 1;
        i = last + 1;
    }

    let mut spans = Vec::new();
    let mut cursor = 0;
    for decl in declarations {
        if cursor < decl.first {
            let kind = gap_kind(&lines[cursor..decl.first], family);
            spans.extend(fixed_spans(cursor, decl.first - 1, kind, fallback_lines));
        }
        cursor = decl.last + 1;
        spans.push(decl);
    }
    if cursor < lines.len() {
        let kind = gap_kind(&lines[cursor..], family);
        spans.extend(fixed_spans(cursor, lines.len() - 1, kind, fallback_lines));
    }
    spans
}

fn gap_kind(lines: &[&str], family: &Family) -> ChunkKind {
    let all_trivia = lines
        .iter()
        .all(|l| l.trim().is_empty() || family.is_trivia(l));
    if all_trivia {
        ChunkKind::Other
    } else {
        ChunkKind::Block
    }
}

fn fixed_spans(first: usize, last: usize, kind: ChunkKind, size: usize) -> Vec<Span> {
    (first..=last)
        .step_by(size)
        .map(|s| Span {
            first: s,
            last: (s + size - 1).min(last),
            kind,
        })
        .collect()
}

fn rank(kind: ChunkKind) -> u8 {
    match kind {
        ChunkKind::Class => 3,
        ChunkKind::Function => 2,
        ChunkKind::Block => 1,
        ChunkKind::Other => 0,
    }
}

/// Join any span that opens inside a string or comment onto the span before it.
fn respect_regions(spans: Vec<Span>, starts: &[usize], regions: &[Range<usize>]) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match out.last_mut() {
            Some(prev) if within(regions, starts[span.first]) => {
                prev.last = span.last;
                if rank(span.kind) > rank(prev.kind) {
                    prev.kind = span.kind;
                }
            }
            _ => out.push(span),
        }
    }
    out
}

/// Fold whitespace-only spans into their neighbour and join runs of `Other`.
fn merge_spans(spans: Vec<Span>, lines: &[&str]) -> Vec<Span> {
    let blank = |s: &Span| lines[s.first..=s.last].iter().all(|l| l.trim().is_empty());
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    let mut pending_blank: Option<usize> = None;
    for span in spans {
        if blank(&span) {
            match merged.last_mut() {
                Some(prev) => prev.last = span.last,
                None => {
                    pending_blank.get_or_insert(span.first);
                }
            }
            continue;
        }
        let mut span = span;
        if let Some(first) = pending_blank.take() {
            span.first = first;
        }
        match merged.last_mut() {
            Some(prev) if prev.kind == ChunkKind::Other && span.kind == ChunkKind::Other => {
                prev.last = span.last;
            }
            _ => merged.push(span),
        }
    }
    if let Some(first) = pending_blank {
        // Nothing but whitespace in the file.
        merged.push(Span {
            first,
            last: lines.len() - 1,
            kind: ChunkKind::Other,
        });
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_coverage(content: &str, chunks: &[Chunk]) {
        let mut cursor = 0;
        for c in chunks {
            assert_eq!(c.start_offset, cursor, "gap or overlap before {:?}", c);
            assert!(c.end_offset > c.start_offset);
            cursor = c.end_offset;
        }
        assert_eq!(cursor, content.len());
    }

    #[test]
    fn test_rust_functions() {
        let code = "use std::fmt;\n\n/// Adds.\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn helper() -> bool {\n    true\n}\n";
        let chunks = chunk(code, Language::Rust, 40);
        assert_coverage(code, &chunks);
        let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChunkKind::Other, ChunkKind::Function, ChunkKind::Function]);
        assert!(chunks[1].text(code).starts_with("/// Adds."));
    }

    #[test]
    fn test_class_absorbs_methods() {
        let code = "class Greeter:\n    def hello(self):\n        return 1\n\n    def bye(self):\n        return 2\n\nx = Greeter()\n";
        let chunks = chunk(code, Language::Python, 40);
        assert_coverage(code, &chunks);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks.last().unwrap().kind, ChunkKind::Block);
        assert_eq!(chunks.iter().filter(|c| c.kind == ChunkKind::Function).count(), 0);
    }

    #[test]
    fn test_single_line_body() {
        let code = "fn a() {}\nfn b() {}\n";
        let chunks = chunk(code, Language::Rust, 40);
        assert_coverage(code, &chunks);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        let code = "function f() {\n  const s = \"}}}\";\n  return s;\n}\nfunction g() {\n}\n";
        let chunks = chunk(code, Language::JavaScript, 40);
        assert_coverage(code, &chunks);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text(code).ends_with("}\n"));
    }

    #[test]
    fn test_unknown_language_line_blocks() {
        let text: String = (0..95).map(|i| format!("line {i}\n")).collect();
        let chunks = chunk(&text, Language::Unknown, 40);
        assert_coverage(&text, &chunks);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Block));
    }

    #[test]
    fn test_empty_and_blank() {
        assert!(chunk("", Language::Rust, 40).is_empty());
        let blank = "\n\n  \n";
        let chunks = chunk(blank, Language::Rust, 40);
        assert_coverage(blank, &chunks);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_no_trailing_newline() {
        let code = "def f():\n    return 1";
        let chunks = chunk(code, Language::Python, 40);
        assert_coverage(code, &chunks);
    }

    #[test]
    fn test_ruby_end_included() {
        let code = "class Foo\n  def bar\n    1\n  end\nend\nputs Foo.new.bar\n";
        let chunks = chunk(code, Language::Ruby, 40);
        assert_coverage(code, &chunks);
        assert_eq!(chunks[0].text(code), "class Foo\n  def bar\n    1\n  end\nend\n");
    }

    #[test]
    fn test_outline_members() {
        let code = "// Shapes.\nclass Shape {\n  area(): number {\n    return 0;\n  }\n  if (x) {\n  }\n}\n";
        let chunks = chunk(code, Language::TypeScript, 40);
        let outline = chunks[0].outline(code, Language::TypeScript).unwrap();
        assert_eq!(outline.leading, vec!["// Shapes."]);
        assert_eq!(outline.signature, "class Shape {");
        assert_eq!(outline.members, vec!["  area(): number {"]);
    }

    #[test]
    fn test_no_chunk_starts_inside_a_string() {
        let mut code = String::from("\"\"\"Module notes.\n");
        for i in 0..60 {
            code.push_str(&format!("# keep {i}\n"));
            if i == 30 {
                code.push_str("def not_real():\n");
            }
        }
        code.push_str("\"\"\"\n\ndef f():\n    return 1\n");
        let regions = lexical_spans(&code, Language::Python);
        let chunks = chunk(&code, Language::Python, 20);
        assert_coverage(&code, &chunks);
        assert!(chunks.iter().all(|c| !within(&regions, c.start_offset)));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].kind, ChunkKind::Function);
        assert!(chunks[0].text(&code).contains("# keep 59\n\"\"\""));
    }

    #[test]
    fn test_long_shell_string_stays_whole() {
        let mut text = String::from("echo start\n: '\n");
        for i in 0..30 {
            text.push_str(&format!("# note {i}\n"));
        }
        text.push_str("'\necho end\n");
        let chunks = chunk(&text, Language::Shell, 4);
        assert_coverage(&text, &chunks);
        let regions = lexical_spans(&text, Language::Shell);
        assert!(chunks.iter().all(|c| !within(&regions, c.start_offset)));
        assert!(chunks.iter().any(|c| c.text(&text).contains(": '\n# note 0\n")
            && c.text(&text).contains("# note 29\n'\n")));
    }

    #[test]
    fn test_c_control_words_not_functions() {
        let code = "int main(void) {\n  return 0;\n}\n";
        let chunks = chunk(code, Language::C, 40);
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        let code = "while (x) {\n}\n";
        let chunks = chunk(code, Language::C, 40);
        assert_eq!(chunks[0].kind, ChunkKind::Block);
    }
}
