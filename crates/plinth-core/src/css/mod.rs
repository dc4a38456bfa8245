//! Stylesheet processing using lightningcss.
//!
//! Used by the `css` and `postcss` loaders and by the optimizer's
//! stylesheet minifier.

pub mod sass;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use std::collections::BTreeMap;
use thiserror::Error;

/// Stylesheet processing options.
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    /// Print without whitespace.
    pub minify: bool,
    /// Scope class names (CSS Modules) and return the mapping.
    pub css_modules: bool,
    /// Lower nesting and add vendor prefixes for the default browser targets.
    pub lower: bool,
    /// Stable file name, used in errors and as the CSS Modules hash seed.
    pub filename: Option<String>,
    /// Override the browser targets used when lowering.
    pub targets: Option<Browsers>,
}

/// Result of stylesheet processing.
#[derive(Debug, Clone)]
pub struct CssResult {
    pub code: String,
    /// CSS Modules class map (local name to scoped name), sorted.
    pub exports: BTreeMap<String, String>,
}

/// Stylesheet processing error.
#[derive(Error, Debug)]
pub enum CssError {
    #[error("CSS parse error: {0}")]
    Parse(String),
    #[error("CSS transform error: {0}")]
    Transform(String),
    #[error("CSS print error: {0}")]
    Print(String),
}

/// Parse, optionally lower and scope, then print a stylesheet.
///
/// # Errors
/// Returns [`CssError`] when the stylesheet cannot be parsed or printed.
pub fn process_css(source: &str, options: &CssOptions) -> Result<CssResult, CssError> {
    let filename = options.filename.as_deref().unwrap_or("input.css");

    let mut parser_options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };

    if options.css_modules {
        parser_options.css_modules = Some(lightningcss::css_modules::Config {
            pattern: lightningcss::css_modules::Pattern::parse("[hash]_[local]")
                .map_err(|e| CssError::Parse(format!("CSS Modules pattern error: {e}")))?,
            dashed_idents: false,
            animation: Default::default(),
            grid: Default::default(),
            container: Default::default(),
            custom_idents: Default::default(),
            pure: false,
        });
    }

    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| CssError::Parse(format!("{filename}: {e}")))?;

    let targets = if options.lower {
        options.targets.unwrap_or_else(default_browser_targets)
    } else {
        Browsers::default()
    };

    if options.minify || options.lower {
        stylesheet
            .minify(MinifyOptions {
                targets: Targets::from(targets),
                ..Default::default()
            })
            .map_err(|e| CssError::Transform(format!("{filename}: {e}")))?;
    }

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets: Targets::from(targets),
            ..Default::default()
        })
        .map_err(|e| CssError::Print(format!("{filename}: {e}")))?;

    let exports = if options.css_modules {
        output
            .exports
            .map(|exp| {
                exp.iter()
                    .map(|(k, v)| (k.to_string(), v.name.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        BTreeMap::new()
    };

    Ok(CssResult {
        code: output.code,
        exports,
    })
}

/// Minify a finished stylesheet.
///
/// # Errors
/// Returns [`CssError`] if the stylesheet does not parse.
pub fn minify_css(source: &str, filename: &str) -> Result<String, CssError> {
    let options = CssOptions {
        minify: true,
        filename: Some(filename.to_string()),
        ..Default::default()
    };
    process_css(source, &options).map(|r| r.code)
}

/// Default targets for lowering: Chrome 80+, Firefox 75+, Safari 13+, Edge 80+.
fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_css_processing() {
        let result = process_css(".foo { color: red; }", &CssOptions::default()).unwrap();
        assert!(result.code.contains("color"));
        assert!(result.exports.is_empty());
    }

    #[test]
    fn test_minification() {
        let code = minify_css(".foo {\n  color: red;\n  margin: 10px;\n}", "a.css").unwrap();
        assert!(!code.contains('\n'));
    }

    #[test]
    fn test_nesting_lowered() {
        let options = CssOptions {
            lower: true,
            ..Default::default()
        };
        let result = process_css(".parent { .child { color: red; } }", &options).unwrap();
        assert!(result.code.contains(".parent .child"));
    }

    #[test]
    fn test_css_modules_stable_per_filename() {
        let options = CssOptions {
            css_modules: true,
            filename: Some("src/button.css".to_string()),
            ..Default::default()
        };
        let a = process_css(".button { color: blue; }", &options).unwrap();
        let b = process_css(".button { color: blue; }", &options).unwrap();
        assert!(a.exports.contains_key("button"));
        assert_eq!(a.exports, b.exports);
        assert_ne!(a.exports["button"], "button");
    }
}
