//! `jsx`: JSX elements to `createElement` calls.
//!
//! Classic runtime: `<a href="x">hi</a>` becomes
//! `React.createElement("a", {href: "x"}, "hi")`. Line breaks an element
//! spanned are re-emitted after its call so later lines keep their numbers.

use super::{expect_type, js_string};
use crate::bundler::lexer::{is_ident_part, is_ident_start, tokenize, TokenKind};
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, Transformed};
use crate::bundler::unit::ModuleType;
use thiserror::Error;

pub const DEFAULT_PRAGMA: &str = "React.createElement";
pub const DEFAULT_PRAGMA_FRAG: &str = "React.Fragment";

/// Keywords after which `<` starts an element rather than a comparison.
const OPERAND_KEYWORDS: &[&str] = &[
    "return", "case", "default", "yield", "await", "else", "do", "in", "of", "typeof", "void",
    "delete", "throw",
];

/// Options: `pragma` (element factory, default `React.createElement`) and
/// `pragmaFrag` (fragment component, default `React.Fragment`).
pub struct JsxLoader;

impl Loader for JsxLoader {
    fn name(&self) -> &str {
        "jsx"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Script, self.name())?;

        let mut factory = JsxFactory::default();
        for (key, slot) in [
            ("pragma", &mut factory.pragma),
            ("pragmaFrag", &mut factory.pragma_frag),
        ] {
            if let Some(value) = options.get(key) {
                *slot = value
                    .as_str()
                    .ok_or_else(|| format!("'{key}' must be a string, got {value}"))?
                    .to_string();
            }
        }

        let out = transform_jsx(input.text()?, &factory)?;
        input.set_text(out);
        Ok(input)
    }
}

/// Callee for elements and the component used for fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsxFactory {
    pub pragma: String,
    pub pragma_frag: String,
}

impl Default for JsxFactory {
    fn default() -> Self {
        Self {
            pragma: DEFAULT_PRAGMA.to_string(),
            pragma_frag: DEFAULT_PRAGMA_FRAG.to_string(),
        }
    }
}

/// Malformed JSX.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("JSX syntax error on line {line}: {message}")]
pub struct JsxError {
    pub line: usize,
    pub message: String,
}

/// Rewrite every JSX element and fragment in `source`.
///
/// Code outside elements, including strings, templates and comments, is
/// copied unchanged.
///
/// # Errors
/// An element that is unterminated, has a mismatched closing tag or an
/// attribute that cannot be read.
pub fn transform_jsx(source: &str, factory: &JsxFactory) -> Result<String, JsxError> {
    let rewriter = Rewriter { src: source, factory };
    let (out, _) = rewriter.code(0, false)?;
    Ok(out)
}

struct Rewriter<'a> {
    src: &'a str,
    factory: &'a JsxFactory,
}

impl<'a> Rewriter<'a> {
    /// Copy script code from `start`, rewriting elements in operand position.
    /// When `nested`, stops at the `}` closing an expression container and
    /// returns its offset.
    fn code(&self, start: usize, nested: bool) -> Result<(String, usize), JsxError> {
        let mut out = String::new();
        let mut depth = 0usize;
        let mut prev: Option<&str> = None;
        let mut pos = start;

        'scan: loop {
            for token in tokenize(&self.src[pos..]) {
                let range = token.range.start + pos..token.range.end + pos;
                let text = &self.src[range.clone()];
                if token.kind == TokenKind::Punct {
                    match text {
                        "{" => depth += 1,
                        "}" if depth == 0 && nested => return Ok((out, range.start)),
                        "}" => depth = depth.saturating_sub(1),
                        "<" if operand_position(prev) && self.opens_element(range.end) => {
                            let (call, end) = self.element(range.start)?;
                            let lost = count_newlines(&self.src[range.start..end])
                                .saturating_sub(count_newlines(&call));
                            out.push_str(&call);
                            out.extend(std::iter::repeat('\n').take(lost));
                            prev = Some(")");
                            pos = end;
                            continue 'scan;
                        }
                        _ => {}
                    }
                }
                if !token.is_trivia() {
                    prev = Some(text);
                }
                out.push_str(text);
            }
            break;
        }

        if nested {
            return Err(self.error(start, "unterminated expression container"));
        }
        Ok((out, self.src.len()))
    }

    fn opens_element(&self, after_lt: usize) -> bool {
        self.src
            .as_bytes()
            .get(after_lt)
            .is_some_and(|&b| b == b'>' || is_ident_start(b))
    }

    /// Element or fragment starting at the `<` at `start`; returns the call
    /// and the offset just past the element.
    fn element(&self, start: usize) -> Result<(String, usize), JsxError> {
        let bytes = self.src.as_bytes();
        if bytes.get(start + 1) == Some(&b'>') {
            let (children, end) = self.children(start + 2, "")?;
            return Ok((self.call(&self.factory.pragma_frag, &[], &children), end));
        }

        let (name, mut i) = self.name(start + 1);
        let tag = tag_expr(name);
        let mut props = Vec::new();
        loop {
            i = self.skip_trivia(i);
            match bytes.get(i) {
                None => return Err(self.error(start, &format!("unterminated <{name}>"))),
                Some(b'/') => {
                    if bytes.get(i + 1) != Some(&b'>') {
                        return Err(self.error(i, "expected '>' after '/'"));
                    }
                    return Ok((self.call(&tag, &props, &[]), i + 2));
                }
                Some(b'>') => {
                    let (children, end) = self.children(i + 1, name)?;
                    return Ok((self.call(&tag, &props, &children), end));
                }
                Some(b'{') => {
                    let j = self.skip_trivia(i + 1);
                    if !self.src[j..].starts_with("...") {
                        return Err(self.error(i, "expected '...' in spread attribute"));
                    }
                    let (expr, close) = self.code(j + 3, true)?;
                    props.push(format!("...{}", expr.trim()));
                    i = close + 1;
                }
                Some(&b) if is_ident_start(b) => {
                    let (attr, after) = self.name(i);
                    i = self.skip_trivia(after);
                    let value = if bytes.get(i) == Some(&b'=') {
                        let (value, end) = self.attribute_value(self.skip_trivia(i + 1))?;
                        i = end;
                        value
                    } else {
                        "true".to_string()
                    };
                    props.push(format!("{}: {value}", prop_key(attr)));
                }
                Some(_) => return Err(self.error(i, &format!("unexpected character in <{name}>"))),
            }
        }
    }

    fn attribute_value(&self, i: usize) -> Result<(String, usize), JsxError> {
        match self.src.as_bytes().get(i) {
            Some(&quote @ (b'"' | b'\'')) => {
                let close = self.src[i + 1..]
                    .find(char::from(quote))
                    .map(|o| i + 1 + o)
                    .ok_or_else(|| self.error(i, "unterminated attribute value"))?;
                Ok((js_string(&decode_entities(&self.src[i + 1..close])), close + 1))
            }
            Some(b'{') => {
                let (expr, close) = self.code(i + 1, true)?;
                let expr = expr.trim();
                if is_blank(expr) {
                    return Err(self.error(i, "attribute expression must not be empty"));
                }
                Ok((expr.to_string(), close + 1))
            }
            Some(b'<') => self.element(i),
            _ => Err(self.error(i, "expected an attribute value")),
        }
    }

    /// Children up to and including the closing tag of `name` (`""` for a
    /// fragment).
    fn children(&self, mut i: usize, name: &str) -> Result<(Vec<String>, usize), JsxError> {
        let bytes = self.src.as_bytes();
        let mut children = Vec::new();
        loop {
            match bytes.get(i) {
                None => {
                    let what = if name.is_empty() { "fragment" } else { name };
                    return Err(self.error(i, &format!("unterminated <{what}>")));
                }
                Some(b'<') if bytes.get(i + 1) == Some(&b'/') => {
                    let (close, after) = self.name(self.skip_trivia(i + 2));
                    let end = self.skip_trivia(after);
                    if close != name || bytes.get(end) != Some(&b'>') {
                        return Err(self.error(i, &format!("expected </{name}>")));
                    }
                    return Ok((children, end + 1));
                }
                Some(b'<') => {
                    let (element, end) = self.element(i)?;
                    children.push(element);
                    i = end;
                }
                Some(b'{') => {
                    let (expr, close) = self.code(i + 1, true)?;
                    let expr = expr.trim();
                    if let Some(spread) = expr.strip_prefix("...") {
                        children.push(format!("...{}", spread.trim_start()));
                    } else if !is_blank(expr) {
                        children.push(expr.to_string());
                    }
                    i = close + 1;
                }
                Some(_) => {
                    let end = self.src[i..]
                        .find(|c| c == '<' || c == '{')
                        .map_or(self.src.len(), |o| i + o);
                    if let Some(text) = clean_text(&self.src[i..end]) {
                        children.push(js_string(&decode_entities(&text)));
                    }
                    i = end;
                }
            }
        }
    }

    /// Tag or attribute name: identifier characters, `.`, `:` and `-`.
    fn name(&self, start: usize) -> (&'a str, usize) {
        let bytes = self.src.as_bytes();
        let mut i = start;
        while i < bytes.len() && (is_ident_part(bytes[i]) || matches!(bytes[i], b'.' | b':' | b'-')) {
            i += 1;
        }
        (&self.src[start..i], i)
    }

    fn skip_trivia(&self, mut i: usize) -> usize {
        loop {
            let rest = &self.src[i..];
            let trimmed = rest.trim_start();
            i += rest.len() - trimmed.len();
            if trimmed.starts_with("//") {
                i += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                i += trimmed.find("*/").map_or(trimmed.len(), |o| o + 2);
            } else {
                return i;
            }
        }
    }

    fn call(&self, tag: &str, props: &[String], children: &[String]) -> String {
        let props = if props.is_empty() {
            "null".to_string()
        } else {
            format!("{{{}}}", props.join(", "))
        };
        let mut call = format!("{}({tag}, {props}", self.factory.pragma);
        for child in children {
            call.push_str(", ");
            call.push_str(child);
        }
        call.push(')');
        call
    }

    fn error(&self, offset: usize, message: &str) -> JsxError {
        let offset = offset.min(self.src.len());
        JsxError {
            line: count_newlines(&self.src[..offset]) + 1,
            message: message.to_string(),
        }
    }
}

fn operand_position(prev: Option<&str>) -> bool {
    match prev {
        None => true,
        Some(")" | "]" | "}") => false,
        Some(text) => {
            let first = text.as_bytes()[0];
            if is_ident_start(first) {
                OPERAND_KEYWORDS.contains(&text)
            } else {
                !(first.is_ascii_digit() || matches!(first, b'"' | b'\'' | b'`' | b'.'))
            }
        }
    }
}

/// Intrinsic elements (lowercase or containing `-`/`:`) are strings;
/// components are references.
fn tag_expr(name: &str) -> String {
    let intrinsic = name.contains(|c| c == '-' || c == ':')
        || (!name.contains('.') && name.starts_with(|c: char| c.is_ascii_lowercase()));
    if intrinsic {
        js_string(name)
    } else {
        name.to_string()
    }
}

fn prop_key(name: &str) -> String {
    let bytes = name.as_bytes();
    let plain = bytes.first().is_some_and(|&b| is_ident_start(b)) && bytes.iter().all(|&b| is_ident_part(b));
    if plain {
        name.to_string()
    } else {
        js_string(name)
    }
}

/// Only comments or nothing, as in `{/* note */}`.
fn is_blank(expr: &str) -> bool {
    tokenize(expr).iter().all(|t| t.is_trivia())
}

/// JSX text whitespace: lines are trimmed where they meet a line break,
/// blank lines dropped and the rest joined with single spaces.
fn clean_text(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last_non_empty = lines.iter().rposition(|l| !l.trim().is_empty())?;
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut line = line.replace('\t', " ");
        if i > 0 {
            line = line.trim_start().to_string();
        }
        if i + 1 < lines.len() {
            line = line.trim_end().to_string();
        }
        if line.is_empty() {
            continue;
        }
        out.push_str(&line);
        if i != last_non_empty {
            out.push(' ');
        }
    }
    Some(out)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &rest[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn count_newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, input, settings, text};
    use super::*;
    use crate::bundler::unit::UnitId;

    fn jsx(src: &str) -> String {
        transform_jsx(src, &JsxFactory::default()).unwrap()
    }

    #[test]
    fn test_element_with_attributes() {
        assert_eq!(
            jsx(r#"const a = <a href="/x" data-id='1' disabled onClick={go}>hi</a>;"#),
            r#"const a = React.createElement("a", {href: "/x", "data-id": "1", disabled: true, onClick: go}, "hi");"#
        );
    }

    #[test]
    fn test_components_fragments_and_spread() {
        assert_eq!(
            jsx("render(<><App {...props} /><Ui.Button /></>)"),
            "render(React.createElement(React.Fragment, null, React.createElement(App, {...props}), React.createElement(Ui.Button, null)))"
        );
    }

    #[test]
    fn test_nested_expressions_and_text_whitespace() {
        let src = "function List({ items }) {\n  return (\n    <ul>\n      Items &amp; more:\n      {items.map(i => <li key={i}>{i}</li>)}\n      {/* note */}\n    </ul>\n  );\n}\n";
        let out = jsx(src);
        assert!(out.contains(
            r#"React.createElement("ul", null, "Items & more:", items.map(i => React.createElement("li", {key: i}, i)))"#
        ), "{out}");
        assert_eq!(count_newlines(&out), count_newlines(src));
    }

    #[test]
    fn test_comparisons_and_literals_untouched() {
        let src = "if (a < b && c<d) x = '<p>' + `<q>` + f(1) < 2; // <b>\n";
        assert_eq!(jsx(src), src);
    }

    #[test]
    fn test_mismatched_close_is_error() {
        let err = transform_jsx("x = <div>\n<span></div>;", &JsxFactory::default()).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("</span>"), "{}", err.message);
        assert!(transform_jsx("x = <div>", &JsxFactory::default()).is_err());
    }

    #[test]
    fn test_loader_pragma_options() {
        let s = settings();
        let id = UnitId::new("/app/a.jsx", None);
        let opts = serde_json::json!({"pragma": "h", "pragmaFrag": "Fragment"});
        let out = JsxLoader
            .apply(input("export default () => <><b /></>;", ModuleType::Script), &opts, &ctx(&id, &s))
            .unwrap();
        assert_eq!(text(&out), "export default () => h(Fragment, null, h(\"b\", null));");

        let bad = serde_json::json!({"pragma": 1});
        assert!(JsxLoader
            .apply(input("<b />", ModuleType::Script), &bad, &ctx(&id, &s))
            .is_err());
    }
}
