//! Dependency discovery in transformed output.
//!
//! Scripts are scanned on the token stream from [`super::lexer`], so
//! specifiers inside comments, strings and templates are never picked up.
//! Every import and export form is recorded as a [`Site`] with its byte
//! range; the emitter rewrites those ranges into module-registry calls.
//! Stylesheets are scanned for `@import` and `url(...)`.

use super::lexer::{string_value, tokenize, Token, TokenKind};
use regex_lite::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::OnceLock;

/// How a dependency was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    /// `import ... from` / `import '...'`
    Import,
    /// `export ... from`
    ReExport,
    /// `require('...')`
    Require,
    /// `import('...')`: a split point.
    DynamicImport,
    /// CSS `@import`.
    StyleImport,
    /// CSS `url(...)`.
    Url,
}

impl DependencyKind {
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        self == Self::DynamicImport
    }
}

/// Which exports of the target a reference binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "names")]
pub enum Binding {
    /// Side-effect only (`import './polyfill'`).
    None,
    /// Named exports, `default` included.
    Named(Vec<String>),
    /// Namespace, re-export star, `require` or dynamic import.
    All,
}

impl Binding {
    #[must_use]
    pub fn binds_anything(&self) -> bool {
        match self {
            Self::None => false,
            Self::Named(names) => !names.is_empty(),
            Self::All => true,
        }
    }

    /// Union of two bindings of the same target.
    #[must_use]
    pub fn merge(self, other: Binding) -> Binding {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::None, b) | (b, Self::None) => b,
            (Self::Named(mut a), Self::Named(b)) => {
                for name in b {
                    if !a.contains(&name) {
                        a.push(name);
                    }
                }
                Self::Named(a)
            }
        }
    }
}

/// A dependency reference found in a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
    pub binding: Binding,
}

impl Dependency {
    #[must_use]
    pub fn new(specifier: impl Into<String>, kind: DependencyKind, binding: Binding) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            binding,
        }
    }
}

/// Name pair. For exports `(local, exported)`; for imports
/// `(imported, local)`. The first element is always the name on the side
/// that owns the binding's source.
pub type ExportName = (String, String);

/// A rewritable import/export site in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub range: Range<usize>,
    pub kind: SiteKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteKind {
    /// `import <clause> from 'x'` or `import 'x'` (whole statement).
    Import {
        specifier: String,
        default: Option<String>,
        namespace: Option<String>,
        named: Vec<ExportName>,
    },
    /// `import('x')` expression.
    DynamicImport { specifier: String },
    /// `require('x')` expression.
    Require { specifier: String },
    /// `export * from 'x'`, `export * as ns from 'x'`, `export {a as b} from 'x'`.
    ReExport {
        specifier: String,
        star: bool,
        names: Vec<ExportName>,
    },
    /// The `export` keyword of `export const|let|var|function|class NAME`.
    ExportDecl { names: Vec<String> },
    /// `export default` prefix; `name` set for named function/class.
    ExportDefault { name: Option<String> },
    /// `export { a, b as c };` (whole statement).
    ExportList { names: Vec<ExportName> },
}

impl SiteKind {
    /// Dependency this site introduces, if any.
    #[must_use]
    pub fn dependency(&self) -> Option<Dependency> {
        match self {
            Self::Import {
                specifier,
                default,
                namespace,
                named,
            } => {
                let binding = if namespace.is_some() {
                    Binding::All
                } else if default.is_none() && named.is_empty() {
                    Binding::None
                } else {
                    let mut names: Vec<String> = named.iter().map(|(l, _)| l.clone()).collect();
                    if default.is_some() {
                        names.insert(0, "default".to_string());
                    }
                    Binding::Named(names)
                };
                Some(Dependency::new(specifier, DependencyKind::Import, binding))
            }
            Self::DynamicImport { specifier } => Some(Dependency::new(
                specifier,
                DependencyKind::DynamicImport,
                Binding::All,
            )),
            Self::Require { specifier } => {
                Some(Dependency::new(specifier, DependencyKind::Require, Binding::All))
            }
            Self::ReExport {
                specifier,
                star,
                names,
            } => {
                let binding = if *star || names.iter().any(|(l, _)| l == "*") {
                    Binding::All
                } else {
                    Binding::Named(names.iter().map(|(l, _)| l.clone()).collect())
                };
                Some(Dependency::new(specifier, DependencyKind::ReExport, binding))
            }
            Self::ExportDecl { .. } | Self::ExportDefault { .. } | Self::ExportList { .. } => None,
        }
    }
}

/// Result of scanning a script.
#[derive(Debug, Clone, Default)]
pub struct ScriptScan {
    pub sites: Vec<Site>,
}

impl ScriptScan {
    /// Dependencies in source order, duplicates included.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.sites.iter().filter_map(|s| s.kind.dependency()).collect()
    }

    /// Names this module exports.
    #[must_use]
    pub fn exports(&self) -> Vec<String> {
        let mut out = Vec::new();
        for site in &self.sites {
            match &site.kind {
                SiteKind::ExportDecl { names } => out.extend(names.iter().cloned()),
                SiteKind::ExportDefault { .. } => out.push("default".to_string()),
                SiteKind::ExportList { names } | SiteKind::ReExport { names, .. } => {
                    out.extend(names.iter().map(|(_, e)| e.clone()));
                }
                _ => {}
            }
        }
        out
    }
}

/// Significant (non-trivia) tokens with their positions.
struct Cursor<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        let tokens = tokenize(source)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .collect();
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn text(&self, offset: usize) -> Option<&'a str> {
        self.peek(offset).map(|t| t.text(self.source))
    }

    fn is(&self, offset: usize, text: &str) -> bool {
        self.text(offset) == Some(text)
    }

    fn kind(&self, offset: usize) -> Option<TokenKind> {
        self.peek(offset).map(|t| t.kind)
    }

    fn start(&self, offset: usize) -> usize {
        self.peek(offset).map_or(self.source.len(), |t| t.range.start)
    }

    fn end(&self, offset: usize) -> usize {
        self.peek(offset).map_or(self.source.len(), |t| t.range.end)
    }

    /// Previous significant token text.
    fn prev_text(&self) -> Option<&'a str> {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.text(self.source))
    }
}

/// Scan a script for import/export sites.
#[must_use]
pub fn scan_script(source: &str) -> ScriptScan {
    let mut c = Cursor::new(source);
    let mut sites = Vec::new();

    while c.pos < c.tokens.len() {
        let member_access = matches!(c.prev_text(), Some("." | "?."));
        if c.kind(0) == Some(TokenKind::Ident) && !member_access {
            let parsed = match c.text(0) {
                Some("import") => scan_import(&mut c),
                Some("export") => scan_export(&mut c),
                Some("require") => scan_require(&mut c),
                _ => None,
            };
            if let Some(site) = parsed {
                sites.push(site);
                continue;
            }
        }
        c.pos += 1;
    }

    ScriptScan { sites }
}

/// Read `( 'spec' )` starting at `offset`; returns specifier and token count.
fn call_with_string(c: &Cursor<'_>, offset: usize) -> Option<(String, usize)> {
    if c.is(offset, "(")
        && c.kind(offset + 1) == Some(TokenKind::Str)
        && c.is(offset + 2, ")")
    {
        let spec = string_value(c.text(offset + 1)?);
        return Some((spec, 3));
    }
    None
}

/// Token count of an optional trailing `;` at `offset`.
fn semicolon(c: &Cursor<'_>, offset: usize) -> usize {
    usize::from(c.is(offset, ";"))
}

fn scan_require(c: &mut Cursor<'_>) -> Option<Site> {
    let (specifier, len) = call_with_string(c, 1)?;
    let site = Site {
        range: c.start(0)..c.end(len),
        kind: SiteKind::Require { specifier },
    };
    c.pos += len + 1;
    Some(site)
}

fn scan_import(c: &mut Cursor<'_>) -> Option<Site> {
    let start = c.start(0);

    // import.meta
    if c.is(1, ".") {
        return None;
    }

    // import('x')
    if c.is(1, "(") {
        let (specifier, len) = call_with_string(c, 1)?;
        let site = Site {
            range: start..c.end(len),
            kind: SiteKind::DynamicImport { specifier },
        };
        c.pos += len + 1;
        return Some(site);
    }

    // import 'x'
    if c.kind(1) == Some(TokenKind::Str) {
        let specifier = string_value(c.text(1)?);
        let last = 1 + semicolon(c, 2);
        let site = Site {
            range: start..c.end(last),
            kind: SiteKind::Import {
                specifier,
                default: None,
                namespace: None,
                named: Vec::new(),
            },
        };
        c.pos += last + 1;
        return Some(site);
    }

    let mut i = 1;
    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();

    if c.kind(i) == Some(TokenKind::Ident) && !c.is(i, "from") {
        default = c.text(i).map(str::to_string);
        i += 1;
        if c.is(i, ",") {
            i += 1;
        }
    }
    if c.is(i, "*") && c.is(i + 1, "as") {
        namespace = c.text(i + 2).map(str::to_string);
        i += 3;
    } else if c.is(i, "{") {
        let (names, consumed) = export_names(c, i)?;
        named = names;
        i += consumed;
    }

    if !c.is(i, "from") || c.kind(i + 1) != Some(TokenKind::Str) {
        return None;
    }
    let specifier = string_value(c.text(i + 1)?);
    let last = i + 1 + semicolon(c, i + 2);
    let site = Site {
        range: start..c.end(last),
        kind: SiteKind::Import {
            specifier,
            default,
            namespace,
            named,
        },
    };
    c.pos += last + 1;
    Some(site)
}

/// Parse `{ a, b as c }` at `offset`; returns pairs and tokens consumed.
fn export_names(c: &Cursor<'_>, offset: usize) -> Option<(Vec<ExportName>, usize)> {
    let mut names = Vec::new();
    let mut i = offset + 1;
    loop {
        match c.text(i)? {
            "}" => return Some((names, i + 1 - offset)),
            "," => i += 1,
            local => {
                let local = string_or_ident(local);
                if c.is(i + 1, "as") {
                    let exported = string_or_ident(c.text(i + 2)?);
                    names.push((local, exported));
                    i += 3;
                } else {
                    names.push((local.clone(), local));
                    i += 1;
                }
            }
        }
    }
}

fn string_or_ident(text: &str) -> String {
    if text.starts_with('"') || text.starts_with('\'') {
        string_value(text)
    } else {
        text.to_string()
    }
}

fn scan_export(c: &mut Cursor<'_>) -> Option<Site> {
    let start = c.start(0);

    // export * from 'x' / export * as ns from 'x'
    if c.is(1, "*") {
        let (names, from_at) = if c.is(2, "as") {
            let ns = c.text(3)?.to_string();
            (vec![("*".to_string(), ns)], 4)
        } else {
            (Vec::new(), 2)
        };
        if !c.is(from_at, "from") || c.kind(from_at + 1) != Some(TokenKind::Str) {
            return None;
        }
        let specifier = string_value(c.text(from_at + 1)?);
        let last = from_at + 1 + semicolon(c, from_at + 2);
        let star = names.is_empty();
        let site = Site {
            range: start..c.end(last),
            kind: SiteKind::ReExport {
                specifier,
                star,
                names,
            },
        };
        c.pos += last + 1;
        return Some(site);
    }

    // export { ... } [from 'x']
    if c.is(1, "{") {
        let (names, consumed) = export_names(c, 1)?;
        let after = 1 + consumed;
        if c.is(after, "from") && c.kind(after + 1) == Some(TokenKind::Str) {
            let specifier = string_value(c.text(after + 1)?);
            let last = after + 1 + semicolon(c, after + 2);
            let site = Site {
                range: start..c.end(last),
                kind: SiteKind::ReExport {
                    specifier,
                    star: false,
                    names,
                },
            };
            c.pos += last + 1;
            return Some(site);
        }
        let last = after - 1 + semicolon(c, after);
        let site = Site {
            range: start..c.end(last),
            kind: SiteKind::ExportList { names },
        };
        c.pos += last + 1;
        return Some(site);
    }

    // export default ...
    if c.is(1, "default") {
        let mut i = 2;
        if c.is(i, "async") {
            i += 1;
        }
        let name = if c.is(i, "function") || c.is(i, "class") {
            i += 1;
            if c.is(i, "*") {
                i += 1;
            }
            c.peek(i)
                .filter(|t| t.kind == TokenKind::Ident && c.text(i) != Some("extends"))
                .map(|t| t.text(c.source).to_string())
        } else {
            None
        };
        let site = Site {
            range: start..c.end(1),
            kind: SiteKind::ExportDefault { name },
        };
        c.pos += 2;
        return Some(site);
    }

    // export const|let|var|function|class|async function NAME
    let mut i = 1;
    if c.is(i, "async") {
        i += 1;
    }
    let names = match c.text(i)? {
        "const" | "let" | "var" => declared_names(c, i + 1),
        "function" | "class" => {
            let mut j = i + 1;
            if c.is(j, "*") {
                j += 1;
            }
            vec![c.text(j)?.to_string()]
        }
        _ => return None,
    };
    let site = Site {
        range: start..c.start(1),
        kind: SiteKind::ExportDecl { names },
    };
    c.pos += 1;
    Some(site)
}

/// Names bound by a declaration whose binding starts at `offset`.
///
/// Handles a plain identifier or a flat object/array destructuring pattern;
/// only the first declarator of a comma list is considered.
fn declared_names(c: &Cursor<'_>, offset: usize) -> Vec<String> {
    match c.text(offset) {
        Some(open @ ("{" | "[")) => {
            let close = if open == "{" { "}" } else { "]" };
            let mut names = Vec::new();
            let mut i = offset + 1;
            while let Some(text) = c.text(i) {
                if text == close {
                    break;
                }
                let is_ident = c.kind(i) == Some(TokenKind::Ident);
                let is_key = c.is(i + 1, ":");
                let after_eq = c.text(i.wrapping_sub(1)) == Some("=");
                if is_ident && !is_key && !after_eq {
                    names.push(text.to_string());
                }
                i += 1;
            }
            names
        }
        Some(name) => vec![name.to_string()],
        None => Vec::new(),
    }
}

fn style_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
            .expect("valid @import pattern")
    })
}

fn style_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)\s]*))\s*\)"#).expect("valid url() pattern")
    })
}

fn style_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"))
}

/// Whether a stylesheet URL refers to another unit.
#[must_use]
pub fn is_bundlable_url(url: &str) -> bool {
    !(url.is_empty()
        || url.starts_with("data:")
        || url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("//")
        || url.starts_with('#')
        || url.starts_with('/'))
}

/// A `url(...)` occurrence in a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleUrl {
    pub range: Range<usize>,
    pub url: String,
}

/// A stylesheet's `@import` statements and `url(...)` references.
#[derive(Debug, Clone, Default)]
pub struct StyleScan {
    /// `@import` statements: full statement range and specifier.
    pub imports: Vec<StyleUrl>,
    /// `url()` references outside `@import` statements.
    pub urls: Vec<StyleUrl>,
}

impl StyleScan {
    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.imports
            .iter()
            .filter(|i| is_bundlable_url(&i.url))
            .map(|i| Dependency::new(&i.url, DependencyKind::StyleImport, Binding::All))
            .chain(
                self.urls
                    .iter()
                    .filter(|u| is_bundlable_url(&u.url))
                    .map(|u| Dependency::new(&u.url, DependencyKind::Url, Binding::All)),
            )
            .collect()
    }
}

/// Scan a stylesheet. Comments are ignored.
#[must_use]
pub fn scan_style(source: &str) -> StyleScan {
    let comments: Vec<Range<usize>> = style_comment_re()
        .find_iter(source)
        .map(|m| m.range())
        .collect();
    let in_comment = |pos: usize| comments.iter().any(|r| r.contains(&pos));

    let imports: Vec<StyleUrl> = style_import_re()
        .captures_iter(source)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let url = cap.get(1)?.as_str().to_string();
            (!in_comment(whole.start())).then(|| StyleUrl {
                range: whole.range(),
                url,
            })
        })
        .collect();

    let urls = style_url_re()
        .captures_iter(source)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            if in_comment(whole.start()) || imports.iter().any(|i| i.range.contains(&whole.start()))
            {
                return None;
            }
            let url = cap
                .get(1)
                .or_else(|| cap.get(2))
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string())?;
            Some(StyleUrl {
                range: whole.range(),
                url,
            })
        })
        .collect();

    StyleScan { imports, urls }
}
