//! Stylesheet loaders: `css`, `postcss`, `sass`, `style`, `extract-css`.

use super::{class_map_export, expect_type, js_string};
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, Transformed};
use crate::bundler::scan::{is_bundlable_url, scan_style};
use crate::bundler::unit::ModuleType;
use crate::css::sass::{compile_sass, SassOptions};
use crate::css::{process_css, CssOptions};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Parses and re-prints the stylesheet, optionally scoping class names.
///
/// Options: `modules`: `true`, `false` or `"auto"` (default; enabled for
/// `*.module.*` files).
pub struct CssLoader;

impl Loader for CssLoader {
    fn name(&self) -> &str {
        "css"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Style, self.name())?;

        let css_modules = match options.get("modules") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) if s != "auto" => {
                return Err(format!("invalid 'modules' option '{s}'").into())
            }
            _ => ctx
                .unit
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(".module.")),
        };

        let result = process_css(
            input.text()?,
            &CssOptions {
                css_modules,
                filename: Some(ctx.relative_id()),
                ..Default::default()
            },
        )?;

        input.set_text(result.code);
        if css_modules {
            input.css_modules = Some(result.exports);
        }
        Ok(input)
    }
}

/// Lowers nesting and adds vendor prefixes for the default browser targets.
pub struct PostcssLoader;

impl Loader for PostcssLoader {
    fn name(&self) -> &str {
        "postcss"
    }

    fn apply(
        &self,
        mut input: Transformed,
        _options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Style, self.name())?;
        let result = process_css(
            input.text()?,
            &CssOptions {
                lower: true,
                filename: Some(ctx.relative_id()),
                ..Default::default()
            },
        )?;
        input.set_text(result.code);
        Ok(input)
    }
}

/// Compiles Sass/SCSS. Options: `includePaths` (relative to the project root).
pub struct SassLoader;

impl Loader for SassLoader {
    fn name(&self) -> &str {
        "sass"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Style, self.name())?;

        let mut load_paths: Vec<PathBuf> = vec![ctx.settings.root.join("node_modules")];
        if let Some(paths) = options.get("includePaths").and_then(|v| v.as_array()) {
            load_paths.extend(
                paths
                    .iter()
                    .filter_map(|p| p.as_str())
                    .map(|p| ctx.settings.root.join(p)),
            );
        }

        let css = compile_sass(
            input.text()?,
            &SassOptions {
                load_paths,
                minify: false,
                filename: Some(ctx.unit.path.clone()),
            },
        )?;
        input.set_text(css);
        Ok(input)
    }
}

/// Turns a stylesheet into a script that injects it as a `<style>` element.
///
/// `@import`s become script imports and `url(...)` references become
/// imports of the referenced assets, so they flow through the graph.
pub struct StyleLoader;

impl Loader for StyleLoader {
    fn name(&self) -> &str {
        "style"
    }

    fn apply(
        &self,
        mut input: Transformed,
        _options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Style, self.name())?;
        let css = input.text()?.to_string();
        let scan = scan_style(&css);

        let mut header = String::new();
        let mut pieces: Vec<String> = Vec::new();
        let mut copied = 0;
        let mut url_count = 0;

        let mut edits: Vec<(std::ops::Range<usize>, Option<String>)> = Vec::new();
        for import in scan.imports.iter().filter(|i| is_bundlable_url(&i.url)) {
            let _ = writeln!(header, "import {};", js_string(&import.url));
            edits.push((import.range.clone(), None));
        }
        for url in scan.urls.iter().filter(|u| is_bundlable_url(&u.url)) {
            let ident = format!("__plinth_url_{url_count}");
            url_count += 1;
            let _ = writeln!(header, "import {ident} from {};", js_string(&url.url));
            edits.push((url.range.clone(), Some(ident)));
        }
        edits.sort_by_key(|(r, _)| r.start);

        for (range, replacement) in edits {
            pieces.push(js_string(&css[copied..range.start]));
            if let Some(ident) = replacement {
                pieces.push(format!("\"url(\" + {ident} + \")\""));
            }
            copied = range.end;
        }
        pieces.push(js_string(&css[copied..]));

        let mut code = header;
        let _ = writeln!(code, "var __plinth_css = {};", pieces.join(" + "));
        code.push_str("var __plinth_style = document.createElement(\"style\");\n");
        let _ = writeln!(
            code,
            "__plinth_style.setAttribute(\"data-plinth\", {});",
            js_string(&ctx.relative_id())
        );
        code.push_str("__plinth_style.textContent = __plinth_css;\n");
        code.push_str("document.head.appendChild(__plinth_style);\n");
        code.push_str(&class_map_export(input.css_modules.as_ref()));

        input.set_text(code);
        input.module_type = ModuleType::Script;
        Ok(input)
    }
}

/// Moves the stylesheet into the chunk's CSS file and leaves a stub script
/// exporting the class map.
pub struct ExtractCssLoader;

impl Loader for ExtractCssLoader {
    fn name(&self) -> &str {
        "extract-css"
    }

    fn apply(
        &self,
        mut input: Transformed,
        _options: &serde_json::Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Style, self.name())?;
        let css = input.text()?.to_string();
        input.dependencies.extend(scan_style(&css).dependencies());
        input.extracted_css = Some(css);
        input.set_text(class_map_export(input.css_modules.as_ref()));
        input.module_type = ModuleType::Script;
        Ok(input)
    }
}
