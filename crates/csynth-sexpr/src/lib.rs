//! A small s-expression codec that keeps byte spans for every node.
//!
//! Schematic sync never rewrites whole files: it parses a sheet once, decides
//! which byte ranges must change, and applies those ranges as a [`PatchSet`]
//! against the original source text. Everything outside a patch survives
//! byte-identical, including formatting the user (or their CAD tool) chose.
//!
//! Numeric atoms keep their source lexeme, so a `12.000000` in the input is
//! never re-rendered as `12`.

pub mod format;

use std::fmt;

use thiserror::Error;

/// Byte range in source text. `start == end` addresses an insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width span for insertion points.
    pub fn point(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span for nodes constructed in memory rather than parsed.
    pub fn synthetic() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// An s-expression node with its source span.
#[derive(Debug, Clone)]
pub enum Sexpr {
    /// Unquoted identifier.
    Sym(String, Span),
    /// Quoted string literal (stored unescaped).
    Str(String, Span),
    /// Numeric atom, kept as its source lexeme.
    Num(String, Span),
    /// Parenthesized list.
    List(Vec<Sexpr>, Span),
}

impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality only; spans are a parsing artifact.
        match (self, other) {
            (Sexpr::Sym(a, _), Sexpr::Sym(b, _)) => a == b,
            (Sexpr::Str(a, _), Sexpr::Str(b, _)) => a == b,
            (Sexpr::Num(a, _), Sexpr::Num(b, _)) => a == b,
            (Sexpr::List(a, _), Sexpr::List(b, _)) => a == b,
            _ => false,
        }
    }
}

impl Sexpr {
    pub fn sym(s: impl Into<String>) -> Self {
        Sexpr::Sym(s.into(), Span::synthetic())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Sexpr::Str(s.into(), Span::synthetic())
    }

    pub fn int(n: i64) -> Self {
        Sexpr::Num(n.to_string(), Span::synthetic())
    }

    pub fn float(f: f64) -> Self {
        Sexpr::Num(format::trim_float(f), Span::synthetic())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Sexpr::List(items, Span::synthetic())
    }

    pub fn span(&self) -> Span {
        match self {
            Sexpr::Sym(_, s) | Sexpr::Str(_, s) | Sexpr::Num(_, s) | Sexpr::List(_, s) => *s,
        }
    }

    /// Symbol name, if this is an unquoted identifier.
    pub fn as_sym(&self) -> Option<&str> {
        match self {
            Sexpr::Sym(s, _) => Some(s),
            _ => None,
        }
    }

    /// String content, if this is a quoted literal.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Sexpr::Str(s, _) => Some(s),
            _ => None,
        }
    }

    /// Symbol or string content.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexpr::Sym(s, _) | Sexpr::Str(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Sexpr::Num(raw, _) => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Sexpr::Num(raw, _) => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match self {
            Sexpr::List(items, _) => Some(items),
            _ => None,
        }
    }

    /// Tag of a list node: its first element when that element is a symbol.
    pub fn tag(&self) -> Option<&str> {
        self.as_list()?.first()?.as_sym()
    }

    /// Find the first direct child list `(name ...)`.
    pub fn find(&self, name: &str) -> Option<&Sexpr> {
        self.as_list()?
            .iter()
            .find(|item| item.tag() == Some(name))
    }

    /// Find all direct child lists `(name ...)`.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a Sexpr> {
        self.as_list()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.tag() == Some(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first traversal visiting every node once.
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&Sexpr),
    {
        f(self);
        if let Some(items) = self.as_list() {
            for item in items {
                item.walk(f);
            }
        }
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format::compact(self))
    }
}

/// Value of a `(tag "value")` child, as a string literal.
pub fn string_prop(node: &Sexpr, tag: &str) -> Option<String> {
    node.find(tag)?.as_list()?.get(1)?.as_str().map(str::to_owned)
}

/// Value of a `(tag value)` child, as an unquoted symbol.
pub fn sym_prop(node: &Sexpr, tag: &str) -> Option<String> {
    node.find(tag)?.as_list()?.get(1)?.as_sym().map(str::to_owned)
}

/// Value of a `(tag 123)` child.
pub fn int_prop(node: &Sexpr, tag: &str) -> Option<i64> {
    node.find(tag)?.as_list()?.get(1)?.as_int()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unmatched ')' at byte {0}")]
    UnmatchedClose(usize),
    #[error("unclosed list starting at byte {0}")]
    UnclosedList(usize),
    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),
    #[error("trailing content at byte {0}")]
    TrailingContent(usize),
}

/// Parse a single top-level s-expression.
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("parsing {} bytes of s-expression input", input.len());
    let mut cursor = Cursor::new(input);
    cursor.skip_trivia();
    let node = cursor.parse_node()?;
    cursor.skip_trivia();
    if !cursor.at_end() {
        return Err(ParseError::TrailingContent(cursor.pos));
    }
    Ok(node)
}

struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                // Line comments run to end of line.
                b';' => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn parse_node(&mut self) -> Result<Sexpr, ParseError> {
        match self.peek() {
            None => Err(ParseError::UnexpectedEof),
            Some(b'(') => self.parse_list(),
            Some(b')') => Err(ParseError::UnmatchedClose(self.pos)),
            Some(b'"') => self.parse_string(),
            Some(_) => Ok(self.parse_bare_atom()),
        }
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.pos += 1; // '('
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ParseError::UnclosedList(start)),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Sexpr::List(items, Span::new(start, self.pos)));
                }
                Some(_) => items.push(self.parse_node()?),
            }
        }
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedString(start)),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Sexpr::Str(value, Span::new(start, self.pos)));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Err(ParseError::UnterminatedString(start)),
                        Some(b'n') => {
                            value.push('\n');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            value.push('\r');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            value.push('\t');
                            self.pos += 1;
                        }
                        // Any other escaped character stands for itself.
                        Some(_) => {
                            let ch = self.src[self.pos..].chars().next().expect("in-bounds char");
                            value.push(ch);
                            self.pos += ch.len_utf8();
                        }
                    }
                }
                Some(_) => {
                    let ch = self.src[self.pos..].chars().next().expect("in-bounds char");
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn parse_bare_atom(&mut self) -> Sexpr {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"' | b';') {
                break;
            }
            self.pos += 1;
        }
        let lexeme = &self.src[start..self.pos];
        let span = Span::new(start, self.pos);
        if lexeme.parse::<f64>().is_ok() {
            Sexpr::Num(lexeme.to_owned(), span)
        } else {
            Sexpr::Sym(lexeme.to_owned(), span)
        }
    }
}

/// One pending edit to source text.
#[derive(Debug, Clone)]
pub struct Patch {
    pub span: Span,
    pub text: String,
}

/// An ordered set of non-overlapping byte-range edits.
///
/// Insertions at the same position are applied in the order they were added,
/// so callers can append several nodes at one insertion point.
#[derive(Debug, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn extend(&mut self, mut other: PatchSet) {
        self.patches.append(&mut other.patches);
    }

    /// Replace a string literal. `value` is unquoted; quoting and escaping
    /// are applied here.
    pub fn replace_string(&mut self, span: Span, value: &str) {
        self.patches.push(Patch {
            span,
            text: format::quote_string(value),
        });
    }

    /// Replace a byte range with exact text.
    pub fn replace_raw(&mut self, span: Span, text: String) {
        self.patches.push(Patch { span, text });
    }

    /// Insert text at a byte position.
    pub fn insert(&mut self, at: usize, text: String) {
        self.patches.push(Patch {
            span: Span::point(at),
            text,
        });
    }

    /// Delete a byte range.
    pub fn delete(&mut self, span: Span) {
        self.patches.push(Patch {
            span,
            text: String::new(),
        });
    }

    /// Apply all patches to `source` in one forward pass.
    pub fn apply(&self, source: &str) -> String {
        if self.patches.is_empty() {
            return source.to_owned();
        }

        let mut sorted: Vec<&Patch> = self.patches.iter().collect();
        // Stable: equal start offsets keep insertion order.
        sorted.sort_by_key(|p| p.span.start);

        debug_assert!(
            sorted
                .windows(2)
                .all(|w| w[0].span.end <= w[1].span.start && w[1].span.end <= source.len()),
            "overlapping or out-of-bounds patches"
        );

        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for patch in sorted {
            if patch.span.start > cursor {
                out.push_str(&source[cursor..patch.span.start]);
            }
            out.push_str(&patch.text);
            cursor = patch.span.end.max(cursor);
        }
        if cursor < source.len() {
            out.push_str(&source[cursor..]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_atoms() {
        assert_eq!(parse("hello").unwrap(), Sexpr::sym("hello"));
        assert_eq!(parse("123").unwrap().as_int(), Some(123));
        assert_eq!(parse("3.15").unwrap().as_f64(), Some(3.15));
        assert_eq!(parse("-4.7").unwrap().as_f64(), Some(-4.7));
        assert_eq!(
            parse("Device:R").unwrap(),
            Sexpr::sym("Device:R"),
            "colon atoms stay symbols"
        );
    }

    #[test]
    fn numeric_lexeme_is_preserved() {
        let node = parse("12.000000").unwrap();
        assert_eq!(node.to_string(), "12.000000");
        assert_eq!(node.as_f64(), Some(12.0));
    }

    #[test]
    fn parse_string_escapes() {
        assert_eq!(
            parse(r#""with \"quotes\" and \n""#).unwrap().as_str(),
            Some("with \"quotes\" and \n")
        );
    }

    #[test]
    fn parse_nested_list() {
        let node = parse(r#"(symbol (lib_id "Device:R") (at 50 50 0))"#).unwrap();
        assert_eq!(node.tag(), Some("symbol"));
        assert_eq!(string_prop(&node, "lib_id"), Some("Device:R".to_owned()));
        let at = node.find("at").unwrap().as_list().unwrap();
        assert_eq!(at[1].as_f64(), Some(50.0));
    }

    #[test]
    fn parse_skips_comments() {
        let node = parse("; header\n(a ; inline\n b)").unwrap();
        assert_eq!(node.as_list().unwrap().len(), 2);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse("(a b"), Err(ParseError::UnclosedList(0)));
        assert_eq!(parse("\"oops"), Err(ParseError::UnterminatedString(0)));
        assert_eq!(parse("(a) extra"), Err(ParseError::TrailingContent(4)));
        assert_eq!(parse(""), Err(ParseError::UnexpectedEof));
    }

    #[test]
    fn spans_address_source_bytes() {
        let input = r#"(property "Value" "10k")"#;
        let node = parse(input).unwrap();
        let items = node.as_list().unwrap();
        assert_eq!(&input[items[2].span().start..items[2].span().end], "\"10k\"");
    }

    #[test]
    fn find_all_returns_every_match() {
        let node = parse(r#"(sheet (pin "A") (pin "B") (uuid "x"))"#).unwrap();
        assert_eq!(node.find_all("pin").len(), 2);
        assert_eq!(node.find_all("missing").len(), 0);
    }

    #[test]
    fn patchset_replace_and_delete() {
        let input = r#"(net 1 "OLD") (net 2 "KEEP")"#;
        // Patch just the first net name.
        let node = parse(r#"(net 1 "OLD")"#).unwrap();
        let span = node.as_list().unwrap()[2].span();

        let mut patches = PatchSet::new();
        patches.replace_string(span, "NEW");
        assert_eq!(patches.apply(input), r#"(net 1 "NEW") (net 2 "KEEP")"#);
    }

    #[test]
    fn patchset_stable_insert_order() {
        let mut patches = PatchSet::new();
        patches.insert(2, " one".to_owned());
        patches.insert(2, " two".to_owned());
        assert_eq!(patches.apply("(a)x"), "(a one two)x");
    }

    #[test]
    fn patchset_empty_is_identity() {
        let input = "(kicad_sch\n\t(version 1)\n)\n";
        assert_eq!(PatchSet::new().apply(input), input);
    }

    #[test]
    fn patchset_delete_range() {
        let input = "(a (b 1) (c 2))";
        let node = parse(input).unwrap();
        let span = node.find("b").unwrap().span();
        let mut patches = PatchSet::new();
        patches.delete(Span::new(span.start, span.end + 1));
        assert_eq!(patches.apply(input), "(a (c 2))");
    }
}
