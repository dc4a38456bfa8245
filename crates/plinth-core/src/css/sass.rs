//! Sass/SCSS compilation using grass.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Extra load paths for `@import`/`@use`.
    pub load_paths: Vec<PathBuf>,
    pub minify: bool,
    /// Source file path; its directory is added to the load paths and a
    /// `.sass` extension selects the indented syntax.
    pub filename: Option<PathBuf>,
}

#[derive(Error, Debug)]
#[error("Sass compile error: {0}")]
pub struct SassError(pub String);

/// Compile Sass or SCSS source to CSS.
///
/// # Errors
/// Returns [`SassError`] with grass's diagnostic when compilation fails.
pub fn compile_sass(source: &str, options: &SassOptions) -> Result<String, SassError> {
    let style = if options.minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };
    let mut grass_options = grass::Options::default().style(style);

    for path in &options.load_paths {
        grass_options = grass_options.load_path(path);
    }

    if let Some(fname) = &options.filename {
        if let Some(parent) = fname.parent() {
            grass_options = grass_options.load_path(parent);
        }
        if is_indented(fname) {
            grass_options = grass_options.input_syntax(grass::InputSyntax::Sass);
        }
    }

    grass::from_string(source.to_string(), &grass_options).map_err(|e| SassError(e.to_string()))
}

fn is_indented(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_scss() {
        let scss = r"
            $primary: blue;
            .button {
                color: $primary;
            }
        ";
        let result = compile_sass(scss, &SassOptions::default()).unwrap();
        assert!(result.contains("color: blue"));
    }

    #[test]
    fn test_indented_syntax() {
        let sass = "$c: red\n.a\n  color: $c\n";
        let options = SassOptions {
            filename: Some(PathBuf::from("style.sass")),
            ..Default::default()
        };
        let result = compile_sass(sass, &options).unwrap();
        assert!(result.contains("color: red"));
    }

    #[test]
    fn test_import_from_file_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_vars.scss"), "$w: 10px;").unwrap();
        let options = SassOptions {
            filename: Some(dir.path().join("main.scss")),
            ..Default::default()
        };
        let result = compile_sass("@import 'vars';\n.a { width: $w; }", &options).unwrap();
        assert!(result.contains("width: 10px"));
    }

    #[test]
    fn test_compile_error() {
        let err = compile_sass(".a { color: $missing; }", &SassOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Sass compile error"));
    }
}
