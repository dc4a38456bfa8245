//! `banner`: prepend a comment.

use crate::bundler::loader::{Loader, LoaderContext, LoaderError, Transformed};
use crate::bundler::unit::ModuleType;

/// Options: `banner` (text, required), `license` (emit as `/*! */` so the
/// minifier can keep it when license comments are preserved).
pub struct BannerLoader;

impl Loader for BannerLoader {
    fn name(&self) -> &str {
        "banner"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        if input.module_type == ModuleType::Asset {
            return Err("'banner' needs script or stylesheet input".into());
        }
        let banner = options
            .get("banner")
            .and_then(|v| v.as_str())
            .ok_or("missing 'banner' option")?;
        let license = options
            .get("license")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let body = banner.replace("*/", "* /");
        let open = if license { "/*!" } else { "/*" };
        let text = format!("{open} {body} */\n{}", input.text()?);
        input.set_text(text);
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, input, settings, text};
    use super::*;
    use crate::bundler::unit::UnitId;
    use serde_json::json;

    #[test]
    fn test_banner() {
        let s = settings();
        let id = UnitId::new("/app/a.js", None);
        let out = BannerLoader
            .apply(
                input("x();", ModuleType::Script),
                &json!({"banner": "v1 */ evil", "license": true}),
                &ctx(&id, &s),
            )
            .unwrap();
        assert_eq!(text(&out), "/*! v1 * / evil */\nx();");
    }

    #[test]
    fn test_banner_requires_text() {
        let s = settings();
        let id = UnitId::new("/app/a.js", None);
        assert!(BannerLoader
            .apply(input("x();", ModuleType::Script), &json!({}), &ctx(&id, &s))
            .is_err());
    }
}
