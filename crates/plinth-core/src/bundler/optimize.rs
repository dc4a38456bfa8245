//! Production optimization pass.
//!
//! Runs between rendering and naming, so content hashes cover optimized
//! bytes. Each artifact is optimized as a whole or not at all: the
//! cancellation flag is only checked before an artifact starts.

use super::emit::Rendered;
use super::lexer::{is_ident_part, tokenize, Token, TokenKind};
use super::runtime::{CHUNK_QUEUE, IDENT_PREFIX, SHORT_NAMES};
use crate::css::minify_css;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A failed optimization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{pass} failed for {artifact}: {message}")]
pub struct OptimizeError {
    pub artifact: String,
    pub pass: &'static str,
    pub message: String,
}

/// Settings of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Keep the unoptimized artifact and record a warning instead of failing.
    pub warn_only: bool,
    /// JPEG quality, 1 to 100.
    pub image_quality: u8,
    /// Keep `/*! ... */` comments.
    pub preserve_license_comments: bool,
}

/// Byte savings of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeStats {
    pub artifacts: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Runs the per-kind optimizers over rendered artifacts.
#[derive(Debug)]
pub struct Optimizer {
    options: OptimizeOptions,
    cancelled: Arc<AtomicBool>,
    warnings: Mutex<Vec<String>>,
}

impl Optimizer {
    #[must_use]
    pub fn new(options: OptimizeOptions) -> Self {
        Self {
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Use an externally owned cancellation flag.
    pub fn share_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Flag that stops the pass at the next artifact boundary.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Warnings recorded in warn-only mode.
    #[must_use]
    pub fn take_warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }

    /// Optimize every rendered chunk and asset in place.
    ///
    /// # Errors
    /// The first failure in artifact order, unless warn-only, or a
    /// cancellation.
    pub fn run(&self, rendered: &mut Rendered) -> Result<OptimizeStats, OptimizeError> {
        let chunk_results: Vec<Result<OptimizeStats, OptimizeError>> = rendered
            .chunks
            .par_iter_mut()
            .map(|chunk| {
                let mut stats = OptimizeStats::default();
                let preserve_lines = chunk.has_source_map();
                let minified = self.guarded(&chunk.name, "minify-script", &chunk.js, |src| {
                    minify_script(src, self.script_options(preserve_lines))
                })?;
                stats.record(chunk.js.len(), minified.len());
                chunk.js = minified;

                if let Some(css) = &chunk.css {
                    let name = format!("{}.css", chunk.name);
                    let minified = self.guarded(&name, "minify-style", css, |src| {
                        minify_css(src, &name).map_err(|e| e.to_string())
                    })?;
                    stats.record(css.len(), minified.len());
                    chunk.css = Some(minified);
                }
                Ok(stats)
            })
            .collect();

        let asset_results: Vec<Result<OptimizeStats, OptimizeError>> = rendered
            .assets
            .par_iter_mut()
            .map(|(name, asset)| {
                let mut stats = OptimizeStats::default();
                let Some(format) = ImageFormat::from_path(name).ok() else {
                    return Ok(stats);
                };
                if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
                    return Ok(stats);
                }
                self.check_cancelled(name)?;
                match recompress(&asset.bytes, format, self.options.image_quality) {
                    Ok(Some(smaller)) => {
                        stats.record(asset.bytes.len(), smaller.len());
                        asset.bytes = smaller;
                    }
                    Ok(None) => stats.record(asset.bytes.len(), asset.bytes.len()),
                    Err(e) => self.fail(name, "recompress-image", e.to_string())?,
                }
                Ok(stats)
            })
            .collect();

        let mut total = OptimizeStats::default();
        for result in chunk_results.into_iter().chain(asset_results) {
            let stats = result?;
            total.artifacts += stats.artifacts;
            total.bytes_before += stats.bytes_before;
            total.bytes_after += stats.bytes_after;
        }
        tracing::debug!(
            artifacts = total.artifacts,
            before = total.bytes_before,
            after = total.bytes_after,
            "optimization pass finished"
        );
        Ok(total)
    }

    /// Minify one script artifact, honouring warn-only.
    ///
    /// # Errors
    /// See [`minify_script`].
    pub fn script(&self, artifact: &str, source: &str) -> Result<String, OptimizeError> {
        self.guarded(artifact, "minify-script", source, |src| {
            minify_script(src, self.script_options(false))
        })
    }

    /// Minify the HTML document, honouring warn-only.
    ///
    /// # Errors
    /// Only on cancellation.
    pub fn html(&self, artifact: &str, source: &str) -> Result<String, OptimizeError> {
        self.guarded(artifact, "minify-html", source, |src| Ok(minify_html(src)))
    }

    fn script_options(&self, preserve_lines: bool) -> ScriptMinifyOptions {
        ScriptMinifyOptions {
            preserve_license_comments: self.options.preserve_license_comments,
            preserve_lines,
        }
    }

    fn guarded(
        &self,
        artifact: &str,
        pass: &'static str,
        source: &str,
        f: impl FnOnce(&str) -> Result<String, String>,
    ) -> Result<String, OptimizeError> {
        self.check_cancelled(artifact)?;
        match f(source) {
            Ok(out) => Ok(out),
            Err(message) => {
                self.fail(artifact, pass, message)?;
                Ok(source.to_string())
            }
        }
    }

    fn check_cancelled(&self, artifact: &str) -> Result<(), OptimizeError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OptimizeError {
                artifact: artifact.to_string(),
                pass: "cancelled",
                message: "optimization was cancelled".to_string(),
            });
        }
        Ok(())
    }

    /// Record a warning in warn-only mode, else return the error.
    fn fail(&self, artifact: &str, pass: &'static str, message: String) -> Result<(), OptimizeError> {
        let err = OptimizeError {
            artifact: artifact.to_string(),
            pass,
            message,
        };
        if !self.options.warn_only {
            return Err(err);
        }
        tracing::warn!(artifact, pass, "{err}; keeping unoptimized output");
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(err.to_string());
        }
        Ok(())
    }
}

impl OptimizeStats {
    fn record(&mut self, before: usize, after: usize) {
        self.artifacts += 1;
        self.bytes_before += before;
        self.bytes_after += after;
    }
}

// =============================================================================
// Scripts
// =============================================================================

/// Script minifier settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptMinifyOptions {
    pub preserve_license_comments: bool,
    /// Keep every line break so line-level source maps stay valid.
    pub preserve_lines: bool,
}

/// Strip comments, collapse whitespace and shorten pipeline identifiers.
///
/// A run of whitespace or comments that contained a line break becomes a
/// line break, so automatic semicolon insertion is unaffected. Strings,
/// template literals and regular expressions are copied verbatim.
///
/// # Errors
/// Fails on an unterminated comment or literal, which the tokenizer cannot
/// delimit reliably.
pub fn minify_script(source: &str, options: ScriptMinifyOptions) -> Result<String, String> {
    let tokens = tokenize(source);
    let mut out = String::with_capacity(source.len() / 2);
    let mut renames = Renamer::new(source, &tokens);
    let mut pending_newlines = 0usize;
    let mut pending_space = false;

    for token in &tokens {
        let text = token.text(source);
        check_terminated(token.kind, text)?;
        match token.kind {
            TokenKind::Whitespace(_) | TokenKind::LineComment => {
                pending_space = true;
                pending_newlines += newlines(text);
                continue;
            }
            TokenKind::BlockComment
                if !(options.preserve_license_comments && text.starts_with("/*!")) =>
            {
                pending_space = true;
                pending_newlines += newlines(text);
                continue;
            }
            _ => {}
        }

        let piece = if token.kind == TokenKind::Ident && text.starts_with(IDENT_PREFIX) {
            renames.get(text)
        } else {
            text.to_string()
        };

        if !out.is_empty() {
            if pending_newlines > 0 {
                let count = if options.preserve_lines { pending_newlines } else { 1 };
                out.extend(std::iter::repeat('\n').take(count));
            } else if pending_space && needs_space(&out, &piece) {
                out.push(' ');
            }
        } else if options.preserve_lines {
            out.extend(std::iter::repeat('\n').take(pending_newlines));
        }
        pending_newlines = 0;
        pending_space = false;
        out.push_str(&piece);
    }
    if pending_newlines > 0 {
        let count = if options.preserve_lines { pending_newlines } else { 1 };
        out.extend(std::iter::repeat('\n').take(count));
    }
    Ok(out)
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

fn check_terminated(kind: TokenKind, text: &str) -> Result<(), String> {
    let ok = match kind {
        TokenKind::BlockComment => text.len() >= 4 && text.ends_with("*/"),
        TokenKind::Str => {
            text.len() >= 2 && text.as_bytes()[0] == text.as_bytes()[text.len() - 1]
        }
        TokenKind::Template => text.len() >= 2 && text.ends_with('`'),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        let preview: String = text.chars().take(24).collect();
        Err(format!("unterminated literal or comment near `{preview}`"))
    }
}

/// Whether dropping the whitespace between `prev` and `next` would merge
/// them into different tokens.
fn needs_space(prev: &str, next: &str) -> bool {
    let (Some(a), Some(b)) = (prev.chars().last(), next.chars().next()) else {
        return false;
    };
    let word = |c: char| !c.is_ascii() || is_ident_part(c as u8);
    (word(a) && word(b))
        || (a == b && matches!(a, '+' | '-'))
        || (a == '/' && matches!(b, '/' | '*'))
        || (a == '-' && b == '>')
        || (a == '<' && b == '!')
        || (a.is_ascii_digit() && b == '.')
}

/// Short names for pipeline identifiers.
///
/// Every pipeline identifier is local to its artifact, so a short name only
/// has to be absent from the artifact's own code. Words inside template
/// literals count as taken too, since `${...}` is copied verbatim.
struct Renamer {
    taken: HashSet<String>,
    assigned: HashMap<String, String>,
    next: usize,
}

impl Renamer {
    fn new(source: &str, tokens: &[Token]) -> Self {
        let mut taken = HashSet::default();
        for token in tokens {
            let text = token.text(source);
            match token.kind {
                TokenKind::Ident if !text.starts_with(IDENT_PREFIX) => {
                    taken.insert(text.to_string());
                }
                TokenKind::Template => {
                    taken.extend(
                        text.split(|c: char| c.is_ascii() && !is_ident_part(c as u8))
                            .filter(|w| !w.is_empty())
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }
        Self {
            taken,
            assigned: HashMap::default(),
            next: 0,
        }
    }

    fn get(&mut self, ident: &str) -> String {
        if ident == CHUNK_QUEUE {
            return ident.to_string();
        }
        if let Some(short) = self.assigned.get(ident) {
            return short.clone();
        }
        let preferred = SHORT_NAMES
            .iter()
            .find(|(long, _)| *long == ident)
            .map(|(_, short)| (*short).to_string())
            .filter(|short| !self.taken.contains(short));
        let short = match preferred {
            Some(short) => short,
            None => loop {
                let candidate = format!("$${}", self.next);
                self.next += 1;
                if !self.taken.contains(&candidate) {
                    break candidate;
                }
            },
        };
        self.taken.insert(short.clone());
        self.assigned.insert(ident.to_string(), short.clone());
        short
    }
}

// =============================================================================
// Stylesheets, images, documents
// =============================================================================

/// Re-encode PNG losslessly or JPEG at `quality`; `None` if not smaller.
fn recompress(bytes: &[u8], format: ImageFormat, quality: u8) -> image::ImageResult<Option<Vec<u8>>> {
    let img = image::load_from_memory_with_format(bytes, format)?;
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        _ => {
            let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
    }
    Ok((buf.len() < bytes.len()).then_some(buf))
}

/// Elements whose content is kept verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["pre", "textarea", "script", "style"];

/// Remove comments and collapse whitespace outside raw-text elements.
///
/// Conditional comments (`<!--[if ...]>`) are kept.
#[must_use]
pub fn minify_html(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut in_space = false;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("<!--") && !rest.starts_with("<!--[if") {
            let end = rest.find("-->").map_or(rest.len(), |i| i + 3);
            rest = &rest[end..];
            continue;
        }
        if c == '<' {
            if let Some(tag) = RAW_TEXT_ELEMENTS.iter().find(|t| starts_with_tag(rest, t)) {
                let close = format!("</{tag}");
                let end = find_ignore_case(rest, &close)
                    .and_then(|i| rest[i..].find('>').map(|j| i + j + 1))
                    .unwrap_or(rest.len());
                out.push_str(&rest[..end]);
                rest = &rest[end..];
                in_space = false;
                continue;
            }
        }
        if c.is_whitespace() {
            if !in_space {
                out.push(if rest.starts_with('\n') || rest.starts_with("\r\n") { '\n' } else { ' ' });
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
        rest = &rest[c.len_utf8()..];
    }

    // Whitespace between tags carries no content.
    out.replace(">\n<", "><").replace("> <", "><").trim().to_string()
}

fn starts_with_tag(s: &str, tag: &str) -> bool {
    let Some(after) = s.get(1..=tag.len()) else {
        return false;
    };
    after.eq_ignore_ascii_case(tag)
        && s[1 + tag.len()..]
            .chars()
            .next()
            .map_or(true, |c| c == '>' || c.is_whitespace())
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minify(src: &str) -> String {
        minify_script(src, ScriptMinifyOptions::default()).unwrap()
    }

    #[test]
    fn test_strips_comments_and_whitespace() {
        let out = minify("var  a = 1; // one\n/* two */ var b = a + +c;\n");
        assert_eq!(out, "var a=1;\nvar b=a+ +c;\n");
    }

    #[test]
    fn test_literals_untouched() {
        let src = "var s = \"a  // b\"; var r = /  x/g; var t = `  ${ a }  `;";
        let out = minify(src);
        assert!(out.contains("\"a  // b\""));
        assert!(out.contains("/  x/g"));
        assert!(out.contains("`  ${ a }  `"));
    }

    #[test]
    fn test_newline_kept_for_asi() {
        assert_eq!(minify("a\n\n\n(b)"), "a\n(b)");
        let lines = minify_script(
            "a\n\n/* x\n */\nb",
            ScriptMinifyOptions {
                preserve_lines: true,
                ..ScriptMinifyOptions::default()
            },
        )
        .unwrap();
        assert_eq!(lines, "a\n\n\n\nb");
    }

    #[test]
    fn test_license_comment() {
        let src = "/*! MIT */\nvar a;";
        assert_eq!(minify(src), "var a;");
        let kept = minify_script(
            src,
            ScriptMinifyOptions {
                preserve_license_comments: true,
                ..ScriptMinifyOptions::default()
            },
        )
        .unwrap();
        assert_eq!(kept, "/*! MIT */\nvar a;");
    }

    #[test]
    fn test_renames_pipeline_identifiers() {
        let out = minify("__plinth_require(\"x\"); var __plinth_url_0 = 1; self.__plinth_chunks;");
        assert_eq!(out, "$r(\"x\");var $$0=1;self.__plinth_chunks;");
    }

    #[test]
    fn test_short_names_avoid_identifiers_in_use() {
        let out = minify(
            "var $r = 1, $$0 = 2; __plinth_require(\"x\"); __plinth_url_0; __plinth_require; `${$d}`; __plinth_default;",
        );
        assert_eq!(out, "var $r=1,$$0=2;$$1(\"x\");$$2;$$1;`${$d}`;$$3;");
    }

    #[test]
    fn test_unterminated_fails() {
        assert!(minify_script("var a = /* open", ScriptMinifyOptions::default()).is_err());
        assert!(minify_script("var s = 'open", ScriptMinifyOptions::default()).is_err());
    }

    #[test]
    fn test_minify_html() {
        let html = "<html>\n  <!-- note -->\n  <body>\n    <p>a   b</p>\n    <pre>  keep\n  me </pre>\n  </body>\n</html>\n";
        assert_eq!(
            minify_html(html),
            "<html><body><p>a b</p><pre>  keep\n  me </pre></body></html>"
        );
    }

    #[test]
    fn test_warn_only_keeps_original() {
        let optimizer = Optimizer::new(OptimizeOptions {
            warn_only: true,
            image_quality: 85,
            preserve_license_comments: false,
        });
        let out = optimizer.script("main", "var a = 'open").unwrap();
        assert_eq!(out, "var a = 'open");
        assert_eq!(optimizer.take_warnings().len(), 1);

        let strict = Optimizer::new(OptimizeOptions {
            warn_only: false,
            image_quality: 85,
            preserve_license_comments: false,
        });
        let err = strict.script("main", "var a = 'open").unwrap_err();
        assert_eq!(err.pass, "minify-script");
        assert_eq!(err.artifact, "main");
    }

    #[test]
    fn test_cancel_between_artifacts() {
        let optimizer = Optimizer::new(OptimizeOptions {
            warn_only: true,
            image_quality: 85,
            preserve_license_comments: false,
        });
        optimizer.cancel_handle().store(true, Ordering::SeqCst);
        let err = optimizer.script("main", "var a;").unwrap_err();
        assert_eq!(err.pass, "cancelled");
    }

    #[test]
    fn test_png_recompression_never_grows() {
        let img = DynamicImage::new_rgb8(16, 16);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        match recompress(&png, ImageFormat::Png, 85).unwrap() {
            Some(smaller) => assert!(smaller.len() < png.len()),
            None => {}
        }
    }
}
