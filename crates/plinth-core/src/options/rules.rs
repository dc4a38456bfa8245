//! `module.rules`: transform rules and their compiled predicates.

use crate::error::Error;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Rule phase. Pre rules run before normal rules, post rules after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforce {
    Pre,
    #[default]
    Normal,
    Post,
}

/// A loader reference in a rule's `use` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoaderRef {
    Name(String),
    WithOptions {
        loader: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl LoaderRef {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::WithOptions { loader: name, .. } => name,
        }
    }

    /// Declared options, `null` when none.
    #[must_use]
    pub fn options(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        match self {
            Self::Name(_) => &NULL,
            Self::WithOptions { options, .. } => options,
        }
    }
}

/// One transform rule as written in the config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleOptions {
    /// Pattern over the unit path.
    #[serde(default)]
    pub test: Option<String>,
    /// Pattern the path must also match.
    #[serde(default)]
    pub include: Option<String>,
    /// Pattern that excludes a path.
    #[serde(default)]
    pub exclude: Option<String>,
    /// Pattern over the query string (without `?`).
    #[serde(default)]
    pub resource_query: Option<String>,
    #[serde(default, rename = "use")]
    pub use_: Vec<LoaderRef>,
    #[serde(default)]
    pub side_effects: Option<bool>,
    #[serde(default)]
    pub enforce: Enforce,
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Position in the config, used to name the rule in errors.
    pub index: usize,
    pub label: String,
    test: Option<Regex>,
    include: Option<Regex>,
    exclude: Option<Regex>,
    resource_query: Option<Regex>,
    pub uses: Vec<LoaderRef>,
    pub side_effects: Option<bool>,
    pub enforce: Enforce,
}

impl CompiledRule {
    /// Whether the rule applies to a unit path (forward slashes) and query.
    #[must_use]
    pub fn matches(&self, path: &str, query: Option<&str>) -> bool {
        if let Some(test) = &self.test {
            if !test.is_match(path) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return false;
            }
        }
        match (&self.resource_query, query) {
            (Some(re), Some(q)) => re.is_match(q),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

fn compile(index: usize, field: &str, pattern: Option<&String>) -> Result<Option<Regex>, Error> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                Error::invalid(format!("module.rules[{index}].{field}: invalid pattern '{p}': {e}"))
            })
        })
        .transpose()
}

/// All configured rules, compiled once per pipeline.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile every rule pattern.
    ///
    /// # Errors
    /// Returns an error naming the first rule with an invalid pattern.
    pub fn compile(rules: &[RuleOptions]) -> Result<Self, Error> {
        let compiled = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let label = match &rule.test {
                    Some(test) => format!("rules[{index}] {test}"),
                    None => format!("rules[{index}]"),
                };
                Ok(CompiledRule {
                    index,
                    label,
                    test: compile(index, "test", rule.test.as_ref())?,
                    include: compile(index, "include", rule.include.as_ref())?,
                    exclude: compile(index, "exclude", rule.exclude.as_ref())?,
                    resource_query: compile(index, "resourceQuery", rule.resource_query.as_ref())?,
                    uses: rule.use_.clone(),
                    side_effects: rule.side_effects,
                    enforce: rule.enforce,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self { rules: compiled })
    }

    /// Rules matching a unit, in declaration order.
    pub fn matching<'a>(
        &'a self,
        path: &'a str,
        query: Option<&'a str>,
    ) -> impl Iterator<Item = &'a CompiledRule> + 'a {
        self.rules.iter().filter(move |r| r.matches(path, query))
    }

    /// Every loader name referenced by any rule.
    pub fn loader_names(&self) -> impl Iterator<Item = (&CompiledRule, &str)> {
        self.rules
            .iter()
            .flat_map(|r| r.uses.iter().map(move |u| (r, u.name())))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(json: &str) -> RuleOptions {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_use_accepts_names_and_objects() {
        let r = rule(r#"{"test": "\\.png$", "use": ["define", {"loader": "url", "options": {"limit": 10}}]}"#);
        assert_eq!(r.use_[0].name(), "define");
        assert!(r.use_[0].options().is_null());
        assert_eq!(r.use_[1].name(), "url");
        assert_eq!(r.use_[1].options()["limit"], 10);
    }

    #[test]
    fn test_include_exclude() {
        let set = RuleSet::compile(&[rule(
            r#"{"test": "\\.js$", "exclude": "node_modules", "use": ["define"]}"#,
        )])
        .unwrap();
        assert_eq!(set.matching("/app/src/a.js", None).count(), 1);
        assert_eq!(set.matching("/app/node_modules/x/a.js", None).count(), 0);
        assert_eq!(set.matching("/app/src/a.css", None).count(), 0);
    }

    #[test]
    fn test_resource_query() {
        let set = RuleSet::compile(&[rule(r#"{"resourceQuery": "^raw$", "use": ["banner"]}"#)])
            .unwrap();
        assert_eq!(set.matching("/a.txt", Some("raw")).count(), 1);
        assert_eq!(set.matching("/a.txt", None).count(), 0);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = RuleSet::compile(&[rule(r#"{"test": "(unclosed"}"#)]).unwrap_err();
        assert!(err.to_string().contains("module.rules[0].test"));
    }
}
