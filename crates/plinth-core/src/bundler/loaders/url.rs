//! `url`: inline small files as `data:` URIs, emit the rest as hashed files.

use super::js_string;
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, SideArtifact, Transformed};
use crate::bundler::template::{render, TemplateVars};
use crate::bundler::unit::ModuleType;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use plinth_util::hash::blake3_bytes;

/// Files below this many bytes are inlined unless `limit` says otherwise.
pub const DEFAULT_INLINE_LIMIT: u64 = 10_000;

/// Options: `limit` (bytes, `false` to never inline), `name` (file name
/// template, default `output.assetFilename`), `mimetype`.
pub struct UrlLoader;

impl Loader for UrlLoader {
    fn name(&self) -> &str {
        "url"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        let limit = match options.get("limit") {
            Some(serde_json::Value::Bool(false)) => 0,
            Some(serde_json::Value::Bool(true)) => u64::MAX,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| format!("'limit' must be a number of bytes, got {v}"))?,
            None => DEFAULT_INLINE_LIMIT,
        };

        let url = if (input.content.len() as u64) < limit {
            let mime = options
                .get("mimetype")
                .and_then(|v| v.as_str())
                .map_or_else(
                    || {
                        mime_guess::from_path(&ctx.unit.path)
                            .first_or_octet_stream()
                            .essence_str()
                            .to_string()
                    },
                    str::to_string,
                );
            format!("data:{mime};base64,{}", STANDARD.encode(&input.content))
        } else {
            let template = options
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(ctx.settings.asset_filename.as_str());
            let hash = blake3_bytes(&input.content);
            let stem = ctx.unit.stem();
            let ext = ctx.unit.ext();
            let name = render(
                template,
                &TemplateVars {
                    name: &stem,
                    ext: &ext,
                    content_hash: &hash,
                    ..TemplateVars::default()
                },
            );
            input.artifacts.push(SideArtifact {
                name: name.clone(),
                bytes: std::mem::take(&mut input.content),
            });
            format!("{}{name}", ctx.settings.public_path)
        };

        input.set_text(format!("export default {};\n", js_string(&url)));
        input.module_type = ModuleType::Script;
        input.url = Some(url);
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, settings, text};
    use super::*;
    use crate::bundler::unit::UnitId;
    use serde_json::json;

    fn png(len: usize) -> Transformed {
        Transformed {
            content: vec![7u8; len],
            module_type: ModuleType::Asset,
            ..Transformed::default()
        }
    }

    #[test]
    fn test_inlines_below_limit() {
        let s = settings();
        let id = UnitId::new("/app/logo.png", None);
        let out = UrlLoader
            .apply(png(3), &json!({"limit": 100}), &ctx(&id, &s))
            .unwrap();
        assert_eq!(out.url.as_deref(), Some("data:image/png;base64,BwcH"));
        assert_eq!(text(&out), "export default \"data:image/png;base64,BwcH\";\n");
        assert!(out.artifacts.is_empty());
        assert_eq!(out.module_type, ModuleType::Script);
    }

    #[test]
    fn test_emits_file_at_or_above_limit() {
        let s = settings();
        let id = UnitId::new("/app/img/logo.png", None);
        let out = UrlLoader
            .apply(png(100), &json!({"limit": 100}), &ctx(&id, &s))
            .unwrap();
        assert_eq!(out.artifacts.len(), 1);
        let name = &out.artifacts[0].name;
        assert!(name.starts_with("assets/logo."));
        assert!(name.ends_with(".png"));
        assert_eq!(out.artifacts[0].bytes.len(), 100);
        assert_eq!(out.url.as_deref(), Some(format!("/static/{name}").as_str()));
    }

    #[test]
    fn test_custom_name_template() {
        let s = settings();
        let id = UnitId::new("/app/font.woff2", None);
        let out = UrlLoader
            .apply(
                png(10),
                &json!({"limit": false, "name": "fonts/[name][ext]"}),
                &ctx(&id, &s),
            )
            .unwrap();
        assert_eq!(out.artifacts[0].name, "fonts/font.woff2");
    }

    #[test]
    fn test_bad_limit() {
        let s = settings();
        let id = UnitId::new("/app/a.png", None);
        assert!(UrlLoader
            .apply(png(1), &json!({"limit": "big"}), &ctx(&id, &s))
            .is_err());
    }
}
