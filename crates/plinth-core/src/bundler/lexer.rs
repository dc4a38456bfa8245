//! Minimal script tokenizer.
//!
//! Splits script source into tokens precise enough to tell code from
//! comments, strings, template literals and regular expression literals.
//! The dependency scanner, the `define` loader and the minifier all work on
//! this token stream instead of raw text.

use std::ops::Range;

/// Token category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Whitespace run; `true` if it contains a line break.
    Whitespace(bool),
    LineComment,
    BlockComment,
    Str,
    Template,
    Regex,
    Ident,
    Number,
    Punct,
}

/// A token and its byte range in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: Range<usize>,
}

impl Token {
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range.clone()]
    }

    #[must_use]
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace(_) | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Tokenize script source. Never fails; unterminated literals run to the end.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    // Last significant token, used to decide regex vs division.
    let mut prev: Option<(TokenKind, Range<usize>)> = None;

    while i < bytes.len() {
        let start = i;
        let b = bytes[i];
        let kind = if b.is_ascii_whitespace() {
            let mut newline = false;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                newline |= bytes[i] == b'\n';
                i += 1;
            }
            TokenKind::Whitespace(newline)
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            TokenKind::LineComment
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            TokenKind::BlockComment
        } else if b == b'"' || b == b'\'' {
            i = skip_string(bytes, i);
            TokenKind::Str
        } else if b == b'`' {
            i = skip_template(bytes, i);
            TokenKind::Template
        } else if b == b'/' && regex_allowed(source, prev.as_ref()) {
            i = skip_regex(bytes, i);
            TokenKind::Regex
        } else if is_ident_start(b) {
            while i < bytes.len() && is_ident_part(bytes[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_')
            {
                i += 1;
            }
            TokenKind::Number
        } else {
            // Multi-byte UTF-8 sequences are kept whole.
            i += utf8_len(b);
            TokenKind::Punct
        };

        let range = start..i.min(bytes.len());
        if !matches!(
            kind,
            TokenKind::Whitespace(_) | TokenKind::LineComment | TokenKind::BlockComment
        ) {
            prev = Some((kind, range.clone()));
        }
        tokens.push(Token { kind, range });
    }

    tokens
}

fn utf8_len(first: u8) -> usize {
    match first {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

/// Identifier start, including `$`, `_` and any non-ASCII byte.
#[must_use]
pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

#[must_use]
pub fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn regex_allowed(source: &str, prev: Option<&(TokenKind, Range<usize>)>) -> bool {
    match prev {
        None => true,
        Some((TokenKind::Punct, r)) => !matches!(&source[r.clone()], ")" | "]" | "}"),
        Some((TokenKind::Ident, r)) => REGEX_PRECEDING_KEYWORDS.contains(&&source[r.clone()]),
        Some(_) => false,
    }
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip a template literal, including nested `${ ... }` expressions.
fn skip_template(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return i + 1,
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                i = skip_expression(bytes, i + 2);
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Skip to just past the `}` closing a template expression.
fn skip_expression(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'`' => i = skip_template(bytes, i),
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_regex(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return i;
            }
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Value of a string literal token without quotes. Escapes are kept except
/// escaped quotes and backslashes.
#[must_use]
pub fn string_value(literal: &str) -> String {
    let inner = if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        ""
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n @ ('\'' | '"' | '\\' | '`')) => out.push(n),
                Some(n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Whitespace(_)))
            .map(|t| (t.kind, t.text(src).to_string()))
            .collect()
    }

    #[test]
    fn test_comments_and_strings() {
        let toks = kinds("a // x 'y'\n/* b */ 'c\\'d' \"e\"");
        assert_eq!(toks[0], (TokenKind::Ident, "a".to_string()));
        assert_eq!(toks[1].0, TokenKind::LineComment);
        assert_eq!(toks[2].0, TokenKind::BlockComment);
        assert_eq!(toks[3], (TokenKind::Str, "'c\\'d'".to_string()));
        assert_eq!(toks[4], (TokenKind::Str, "\"e\"".to_string()));
    }

    #[test]
    fn test_template_with_nested_expression() {
        let src = "`a ${ {x: `b ${c}`}.x } d` + 1";
        let toks = kinds(src);
        assert_eq!(toks[0].0, TokenKind::Template);
        assert_eq!(toks[0].1, "`a ${ {x: `b ${c}`}.x } d`");
        assert_eq!(toks[1], (TokenKind::Punct, "+".to_string()));
    }

    #[test]
    fn test_regex_vs_division() {
        let toks = kinds("x = a / b; y = /'[/]'/g.test(s)");
        assert!(toks.iter().any(|t| t == &(TokenKind::Punct, "/".to_string())));
        assert!(toks
            .iter()
            .any(|t| t == &(TokenKind::Regex, "/'[/]'/g".to_string())));
        assert!(!toks.iter().any(|t| t.0 == TokenKind::Str));
    }

    #[test]
    fn test_regex_after_return() {
        let toks = kinds("return /ab+c/i");
        assert_eq!(toks[1], (TokenKind::Regex, "/ab+c/i".to_string()));
    }

    #[test]
    fn test_ranges_cover_source() {
        let src = "const é = 'ü'; // ok\n";
        let total: usize = tokenize(src).iter().map(|t| t.range.len()).sum();
        assert_eq!(total, src.len());
    }

    #[test]
    fn test_string_value() {
        assert_eq!(string_value("'./a.js'"), "./a.js");
        assert_eq!(string_value(r#""it\"s""#), "it\"s");
    }
}
