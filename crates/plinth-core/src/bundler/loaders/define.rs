//! `define`: compile-time identifier replacement.

use super::expect_type;
use crate::bundler::lexer::{tokenize, Token, TokenKind};
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, Transformed};
use crate::bundler::unit::ModuleType;
use std::collections::BTreeMap;

/// Replaces configured expressions (`process.env.NODE_ENV`, `__DEV__`) with
/// code. The build-wide `define` table applies first; loader options of the
/// same shape add to or override it.
pub struct DefineLoader;

impl Loader for DefineLoader {
    fn name(&self) -> &str {
        "define"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        expect_type(&input, ModuleType::Script, self.name())?;

        let mut defs = ctx.settings.define.clone();
        if let Some(extra) = options.as_object() {
            for (key, value) in extra {
                let code = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                defs.insert(key.clone(), code);
            }
        }
        if defs.is_empty() {
            return Ok(input);
        }

        let replaced = replace_defines(input.text()?, &defs);
        input.set_text(replaced);
        Ok(input)
    }
}

/// Replace every code occurrence of a dotted key with its value.
///
/// Longer keys win. Member accesses (`a.process.env`), object keys and
/// occurrences inside strings, templates and comments are left alone.
#[must_use]
pub fn replace_defines(source: &str, defs: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<(Vec<&str>, &str)> = defs
        .iter()
        .map(|(k, v)| (k.split('.').collect(), v.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let tokens = tokenize(source);
    let significant: Vec<usize> = (0..tokens.len())
        .filter(|&i| !tokens[i].is_trivia())
        .collect();

    let mut out = String::with_capacity(source.len());
    let mut copied = 0;
    let mut s = 0;
    while s < significant.len() {
        let i = significant[s];
        let tok = &tokens[i];
        let prev = s.checked_sub(1).map(|p| tokens[significant[p]].text(source));
        if tok.kind != TokenKind::Ident || matches!(prev, Some("." | "?.")) {
            s += 1;
            continue;
        }

        let matched = keys
            .iter()
            .find_map(|(parts, value)| match_key(source, &tokens, i, parts).map(|end| (end, *value)));
        let Some((end, value)) = matched else {
            s += 1;
            continue;
        };

        let next = tokens[end..]
            .iter()
            .find(|t| !t.is_trivia())
            .map(|t| t.text(source));
        let object_key = next == Some(":") && matches!(prev, Some("{" | ","));
        if object_key {
            s += 1;
            continue;
        }

        out.push_str(&source[copied..tok.range.start]);
        out.push_str(value);
        copied = tokens[end - 1].range.end;
        while s < significant.len() && significant[s] < end {
            s += 1;
        }
    }
    out.push_str(&source[copied..]);
    out
}

/// Match `parts` as adjacent `ident . ident ...` tokens at `start`; returns
/// the token index just past the match.
fn match_key(source: &str, tokens: &[Token], start: usize, parts: &[&str]) -> Option<usize> {
    let mut i = start;
    for (n, part) in parts.iter().enumerate() {
        if n > 0 {
            if tokens.get(i)?.text(source) != "." {
                return None;
            }
            i += 1;
        }
        let tok = tokens.get(i)?;
        if tok.kind != TokenKind::Ident || tok.text(source) != *part {
            return None;
        }
        i += 1;
    }
    Some(i)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, input, settings, text};
    use super::*;
    use crate::bundler::unit::UnitId;

    fn defs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_replaces_dotted_key() {
        let out = replace_defines(
            "if (process.env.NODE_ENV !== 'production') log();",
            &defs(&[("process.env.NODE_ENV", "\"production\"")]),
        );
        assert_eq!(out, "if (\"production\" !== 'production') log();");
    }

    #[test]
    fn test_longest_key_wins() {
        let out = replace_defines(
            "a(process.env.X, process.env)",
            &defs(&[("process.env", "{}"), ("process.env.X", "1")]),
        );
        assert_eq!(out, "a(1, {})");
    }

    #[test]
    fn test_skips_strings_members_and_object_keys() {
        let src = "const s = '__DEV__'; o.__DEV__; x = { __DEV__: 1 }; // __DEV__\n__DEV__";
        let out = replace_defines(src, &defs(&[("__DEV__", "false")]));
        assert_eq!(
            out,
            "const s = '__DEV__'; o.__DEV__; x = { __DEV__: 1 }; // __DEV__\nfalse"
        );
    }

    #[test]
    fn test_word_boundary() {
        let out = replace_defines("__DEV__X + __DEV__", &defs(&[("__DEV__", "0")]));
        assert_eq!(out, "__DEV__X + 0");
    }

    #[test]
    fn test_loader_merges_options() {
        let mut s = settings();
        s.define.insert("A".to_string(), "1".to_string());
        let id = UnitId::new("/app/a.js", None);
        let opts = serde_json::json!({"B": true, "C": "'c'"});
        let out = DefineLoader
            .apply(input("A + B + C", ModuleType::Script), &opts, &ctx(&id, &s))
            .unwrap();
        assert_eq!(text(&out), "1 + true + 'c'");
    }

    #[test]
    fn test_rejects_stylesheet_input() {
        let s = settings();
        let id = UnitId::new("/app/a.css", None);
        let err = DefineLoader
            .apply(input(".a{}", ModuleType::Style), &serde_json::Value::Null, &ctx(&id, &s))
            .unwrap_err();
        assert!(err.to_string().contains("check the loader order"));
    }
}
