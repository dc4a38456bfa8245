//! Built-in loaders.
//!
//! | name          | input           | output                                   |
//! |---------------|-----------------|------------------------------------------|
//! | `define`      | script          | script with identifiers replaced         |
//! | `jsx`         | script with JSX | script with `createElement` calls        |
//! | `css`         | stylesheet      | validated stylesheet, optional class map |
//! | `postcss`     | stylesheet      | nesting lowered, vendor prefixes added   |
//! | `sass`        | Sass/SCSS       | stylesheet                               |
//! | `style`       | stylesheet      | script injecting a `<style>` element     |
//! | `extract-css` | stylesheet      | stub script, CSS moved to the chunk file |
//! | `url`         | any             | script exporting a data URI or file URL  |
//! | `json`        | JSON            | script with a default export             |
//! | `xml`         | XML             | script exporting the document text       |
//! | `csv`         | CSV/TSV         | script exporting an array of rows        |
//! | `banner`      | script or style | content with a leading comment           |

mod banner;
mod data;
mod define;
mod jsx;
mod style;
mod url;

pub use banner::BannerLoader;
pub use data::{CsvLoader, JsonLoader, XmlLoader};
pub use define::{replace_defines, DefineLoader};
pub use jsx::{transform_jsx, JsxError, JsxFactory, JsxLoader};
pub use style::{CssLoader, ExtractCssLoader, PostcssLoader, SassLoader, StyleLoader};
pub use url::UrlLoader;

use super::loader::{LoaderError, LoaderRegistry, Transformed};
use super::unit::ModuleType;
use std::sync::Arc;

/// Names of every built-in loader.
pub const BUILTIN_LOADERS: &[&str] = &[
    "define",
    "jsx",
    "css",
    "postcss",
    "sass",
    "style",
    "extract-css",
    "url",
    "json",
    "xml",
    "csv",
    "banner",
];

pub(crate) fn register_builtins(registry: &mut LoaderRegistry) {
    registry.register(Arc::new(DefineLoader));
    registry.register(Arc::new(JsxLoader));
    registry.register(Arc::new(CssLoader));
    registry.register(Arc::new(PostcssLoader));
    registry.register(Arc::new(SassLoader));
    registry.register(Arc::new(StyleLoader));
    registry.register(Arc::new(ExtractCssLoader));
    registry.register(Arc::new(UrlLoader));
    registry.register(Arc::new(JsonLoader));
    registry.register(Arc::new(XmlLoader));
    registry.register(Arc::new(CsvLoader));
    registry.register(Arc::new(BannerLoader));
}

/// Fail unless the input has the module type a loader expects.
fn expect_type(input: &Transformed, expected: ModuleType, loader: &str) -> Result<(), LoaderError> {
    if input.module_type == expected {
        Ok(())
    } else {
        Err(format!(
            "'{loader}' expects {expected:?} input but received {:?}; check the loader order",
            input.module_type
        )
        .into())
    }
}

/// JSON string literal for embedding text in generated scripts.
pub(crate) fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// `export default <class map>;`, or an empty object.
fn class_map_export(map: Option<&std::collections::BTreeMap<String, String>>) -> String {
    let json = map
        .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()))
        .unwrap_or_else(|| "{}".to_string());
    format!("export default {json};\n")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::bundler::loader::{LoaderContext, LoaderSettings, Transformed};
    use crate::bundler::unit::{ModuleType, UnitId};
    use crate::options::Mode;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    pub fn settings() -> LoaderSettings {
        LoaderSettings {
            mode: Mode::Production,
            root: PathBuf::from("/app"),
            context: PathBuf::from("/app"),
            define: BTreeMap::new(),
            public_path: "/static/".to_string(),
            asset_filename: "assets/[name].[hash:8][ext]".to_string(),
        }
    }

    pub fn ctx<'a>(unit: &'a UnitId, settings: &'a LoaderSettings) -> LoaderContext<'a> {
        LoaderContext { unit, settings }
    }

    pub fn input(text: &str, module_type: ModuleType) -> Transformed {
        Transformed {
            content: text.as_bytes().to_vec(),
            module_type,
            ..Transformed::default()
        }
    }

    pub fn text(out: &Transformed) -> String {
        String::from_utf8(out.content.clone()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_every_builtin() {
        let registry = LoaderRegistry::with_builtins();
        for name in BUILTIN_LOADERS {
            assert!(registry.contains(name), "{name} missing");
        }
    }
}
