//! Output file name templates.
//!
//! Supported placeholders: `[name]`, `[ext]` (with leading dot),
//! `[contenthash]`, `[chunkhash]`, `[hash]`, each hash optionally truncated
//! with `:N` (default 8). Unknown placeholders are left as written.

use plinth_util::hash::SHORT_HASH_LEN;

/// Values substituted into a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    /// Full hex digest of the artifact's own bytes.
    pub content_hash: &'a str,
    /// Digest of the chunk's module set; falls back to `content_hash`.
    pub chunk_hash: Option<&'a str>,
    /// Digest of the whole build; falls back to `content_hash`.
    pub build_hash: Option<&'a str>,
}

/// Render `template` with `vars`.
#[must_use]
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find(']') else {
            out.push_str(after);
            return out;
        };
        let token = &after[1..close];
        match substitute(token, vars) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn substitute(token: &str, vars: &TemplateVars<'_>) -> Option<String> {
    let (key, len) = match token.split_once(':') {
        Some((key, len)) => (key, len.parse::<usize>().ok()?),
        None => (token, SHORT_HASH_LEN),
    };
    let hash = match key {
        "name" => return Some(vars.name.to_string()),
        "ext" => return Some(vars.ext.to_string()),
        "contenthash" => vars.content_hash,
        "chunkhash" => vars.chunk_hash.unwrap_or(vars.content_hash),
        "hash" => vars.build_hash.unwrap_or(vars.content_hash),
        _ => return None,
    };
    Some(hash[..len.min(hash.len())].to_string())
}

/// Whether a template contains any hash placeholder.
#[must_use]
pub fn has_hash(template: &str) -> bool {
    ["[contenthash", "[chunkhash", "[hash"]
        .iter()
        .any(|p| template.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn vars() -> TemplateVars<'static> {
        TemplateVars {
            name: "main",
            ext: ".js",
            content_hash: HASH,
            chunk_hash: Some("ffffffffffffffff"),
            build_hash: None,
        }
    }

    #[test]
    fn test_default_hash_length() {
        assert_eq!(
            render("js/[name].[contenthash].js", &vars()),
            "js/main.01234567.js"
        );
    }

    #[test]
    fn test_explicit_lengths_and_kinds() {
        assert_eq!(render("[name].[contenthash:4]", &vars()), "main.0123");
        assert_eq!(render("[chunkhash:3]", &vars()), "fff");
        assert_eq!(render("[hash:6][ext]", &vars()), "012345.js");
    }

    #[test]
    fn test_unknown_placeholders_kept() {
        assert_eq!(render("[id]-[name]", &vars()), "[id]-main");
        assert_eq!(render("[name][", &vars()), "main[");
        assert_eq!(render("[contenthash:x]", &vars()), "[contenthash:x]");
    }

    #[test]
    fn test_has_hash() {
        assert!(has_hash("js/[name].[contenthash:8].js"));
        assert!(!has_hash("js/[name].js"));
    }
}
