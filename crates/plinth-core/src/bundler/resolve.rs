//! Import specifier resolution.
//!
//! Maps a specifier plus the importing unit's directory to a [`UnitId`].
//!
//! ## Order
//!
//! 1. Externals are returned untouched.
//! 2. Alias substitution on the first matching prefix (`key$` matches exactly).
//! 3. Relative and absolute specifiers: exact file, each configured extension,
//!    then the directory's `package.json` main fields and index files.
//! 4. Bare specifiers: walk up from the importer through the configured
//!    module directories (`node_modules`).

#![allow(clippy::module_name_repetitions)]

use super::unit::UnitId;
use crate::options::ResolveOptions;
use rustc_hash::FxHashMap as HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Outcome of resolving a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(UnitId),
    /// Left to the environment; not bundled.
    External(String),
}

/// An unresolvable specifier, with every path that was tried.
#[derive(Error, Debug, Clone)]
#[error("Cannot resolve '{specifier}' from '{from}'{}", format_candidates(.candidates))]
pub struct ResolveError {
    pub specifier: String,
    pub from: String,
    pub candidates: Vec<PathBuf>,
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n  tried:");
    for c in candidates {
        out.push_str("\n    ");
        out.push_str(&c.display().to_string());
    }
    out
}

#[derive(Debug, Clone)]
struct Alias {
    key: String,
    exact: bool,
    target: String,
}

/// Information read from a unit's nearest `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub dir: PathBuf,
    pub name: Option<String>,
    side_effects: SideEffects,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum SideEffects {
    #[default]
    Unspecified,
    All(bool),
    Only(Vec<String>),
}

impl PackageInfo {
    /// `sideEffects` for a file in this package, if the package declares it.
    ///
    /// List entries are `*.ext` suffixes or package-relative paths.
    #[must_use]
    pub fn side_effects_for(&self, path: &Path) -> Option<bool> {
        match &self.side_effects {
            SideEffects::Unspecified => None,
            SideEffects::All(b) => Some(*b),
            SideEffects::Only(patterns) => {
                let rel = path
                    .strip_prefix(&self.dir)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/");
                Some(patterns.iter().any(|p| {
                    let p = p.trim_start_matches("./");
                    match p.strip_prefix('*') {
                        Some(suffix) => rel.ends_with(suffix),
                        None => rel == p,
                    }
                }))
            }
        }
    }
}

/// Import resolver with per-build caches.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
    alias: Vec<Alias>,
    modules: Vec<String>,
    main_fields: Vec<String>,
    main_files: Vec<String>,
    externals: Vec<String>,
    cache: RwLock<HashMap<(PathBuf, String), Resolution>>,
    packages: RwLock<HashMap<PathBuf, Option<PackageInfo>>>,
}

impl Resolver {
    /// Create a resolver. Relative alias targets are taken from `root`.
    #[must_use]
    pub fn new(root: &Path, options: &ResolveOptions, externals: &[String]) -> Self {
        let alias = options
            .alias
            .iter()
            .map(|(key, target)| match key.strip_suffix('$') {
                Some(exact) => Alias {
                    key: exact.to_string(),
                    exact: true,
                    target: target.clone(),
                },
                None => Alias {
                    key: key.clone(),
                    exact: false,
                    target: target.clone(),
                },
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            extensions: options.extensions.clone(),
            alias,
            modules: options.modules.clone(),
            main_fields: options.main_fields.clone(),
            main_files: options.main_files.clone(),
            externals: externals.to_vec(),
            cache: RwLock::default(),
            packages: RwLock::default(),
        }
    }

    /// Resolve `specifier` imported from a unit in `from_dir`.
    ///
    /// # Errors
    /// Returns [`ResolveError`] listing every candidate tried.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<Resolution, ResolveError> {
        let key = (from_dir.to_path_buf(), specifier.to_string());
        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }

        let result = self.resolve_uncached(specifier, from_dir)?;
        tracing::trace!(specifier, from = %from_dir.display(), ?result, "resolved");

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Resolution, ResolveError> {
        let (request, query) = split_query(specifier);

        if self.is_external(request) {
            return Ok(Resolution::External(request.to_string()));
        }

        let mut candidates = Vec::new();
        let aliased = self.apply_alias(request);
        let found = match &aliased {
            Some(AliasTarget::Path(path)) => self.resolve_path(path, &mut candidates),
            Some(AliasTarget::Bare(bare)) => self.resolve_bare(bare, from_dir, &mut candidates),
            None if is_path_like(request) => {
                let target = if Path::new(request).is_absolute() {
                    PathBuf::from(request)
                } else {
                    from_dir.join(request)
                };
                self.resolve_path(&target, &mut candidates)
            }
            None => self.resolve_bare(request, from_dir, &mut candidates),
        };

        match found {
            Some(path) => {
                let canonical = dunce::canonicalize(&path).unwrap_or(path);
                Ok(Resolution::Found(UnitId::new(
                    canonical,
                    query.map(str::to_string),
                )))
            }
            None => Err(ResolveError {
                specifier: specifier.to_string(),
                from: from_dir.display().to_string(),
                candidates,
            }),
        }
    }

    fn is_external(&self, request: &str) -> bool {
        self.externals.iter().any(|ext| {
            request == ext
                || request
                    .strip_prefix(ext.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn apply_alias(&self, request: &str) -> Option<AliasTarget> {
        for alias in &self.alias {
            let rest = if request == alias.key {
                ""
            } else if alias.exact {
                continue;
            } else if let Some(rest) = request
                .strip_prefix(alias.key.as_str())
                .filter(|r| r.starts_with('/'))
            {
                rest
            } else {
                continue;
            };

            let replaced = format!("{}{rest}", alias.target);
            return Some(if is_path_like(&alias.target) || Path::new(&alias.target).is_absolute()
            {
                AliasTarget::Path(self.root.join(replaced))
            } else {
                AliasTarget::Bare(replaced)
            });
        }
        None
    }

    /// Try `target` as a file, then with each extension, then as a directory.
    fn resolve_path(&self, target: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if let Some(found) = self.resolve_file(target, candidates) {
            return Some(found);
        }
        if target.is_dir() {
            return self.resolve_directory(target, candidates);
        }
        None
    }

    fn resolve_file(&self, target: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
        candidates.push(target.to_path_buf());
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        for ext in &self.extensions {
            let mut with_ext = OsString::from(target.as_os_str());
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            candidates.push(with_ext.clone());
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
        None
    }

    fn resolve_directory(&self, dir: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let pkg_json = dir.join("package.json");
        if pkg_json.is_file() {
            if let Some(json) = read_json(&pkg_json) {
                for field in &self.main_fields {
                    if let Some(main) = json.get(field).and_then(|v| v.as_str()) {
                        let main_path = dir.join(main);
                        if let Some(found) = self.resolve_file(&main_path, candidates) {
                            return Some(found);
                        }
                        if main_path.is_dir() {
                            if let Some(found) = self.resolve_index(&main_path, candidates) {
                                return Some(found);
                            }
                        }
                    }
                }
            }
        }
        self.resolve_index(dir, candidates)
    }

    fn resolve_index(&self, dir: &Path, candidates: &mut Vec<PathBuf>) -> Option<PathBuf> {
        for main_file in &self.main_files {
            for ext in &self.extensions {
                let candidate = dir.join(format!("{main_file}{ext}"));
                candidates.push(candidate.clone());
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &Path,
        candidates: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut search_dirs = Vec::new();
        for module_dir in &self.modules {
            if Path::new(module_dir).is_absolute() {
                search_dirs.push(PathBuf::from(module_dir));
                continue;
            }
            let mut current = Some(from_dir);
            while let Some(dir) = current {
                search_dirs.push(dir.join(module_dir));
                current = dir.parent();
            }
        }

        for modules_dir in search_dirs {
            let pkg_dir = modules_dir.join(pkg_name);
            if !pkg_dir.is_dir() {
                candidates.push(pkg_dir);
                continue;
            }
            let found = match subpath {
                Some(sub) => self.resolve_path(&pkg_dir.join(sub), candidates),
                None => self.resolve_directory(&pkg_dir, candidates),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Nearest `package.json` above `path`, cached per directory.
    #[must_use]
    pub fn package_info(&self, path: &Path) -> Option<PackageInfo> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if let Some(cached) = self.packages.read().ok().and_then(|p| p.get(dir).cloned()) {
                return cached;
            }
            let pkg_json = dir.join("package.json");
            if pkg_json.is_file() {
                let info = read_json(&pkg_json).map(|json| PackageInfo {
                    dir: dir.to_path_buf(),
                    name: json.get("name").and_then(|v| v.as_str()).map(str::to_string),
                    side_effects: match json.get("sideEffects") {
                        Some(serde_json::Value::Bool(b)) => SideEffects::All(*b),
                        Some(serde_json::Value::Array(items)) => SideEffects::Only(
                            items
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect(),
                        ),
                        _ => SideEffects::Unspecified,
                    },
                });
                if let Ok(mut packages) = self.packages.write() {
                    packages.insert(dir.to_path_buf(), info.clone());
                }
                return info;
            }
            current = dir.parent();
        }
        None
    }
}

enum AliasTarget {
    Path(PathBuf),
    Bare(String),
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn is_path_like(spec: &str) -> bool {
    spec == "."
        || spec == ".."
        || spec.starts_with("./")
        || spec.starts_with("../")
        || spec.starts_with('/')
        || Path::new(spec).is_absolute()
}

/// Split `./a.png?inline` into the request and its query.
#[must_use]
pub fn split_query(specifier: &str) -> (&str, Option<&str>) {
    match specifier.split_once('?') {
        Some((request, query)) => (request, Some(query)),
        None => (specifier, None),
    }
}

/// Split a bare specifier into package name and subpath.
#[must_use]
pub fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };
    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    }
}

/// Package name of a path under a module directory, e.g.
/// `/app/node_modules/@scope/pkg/lib/a.js` gives `@scope/pkg`.
#[must_use]
pub fn package_name_from_path(path: &Path) -> Option<String> {
    let s = path.to_string_lossy().replace('\\', "/");
    let idx = s.rfind("/node_modules/")?;
    let rest = &s[idx + "/node_modules/".len()..];
    let (name, _) = parse_bare_specifier(rest);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, content).unwrap();
        dunce::canonicalize(p).unwrap()
    }

    fn resolver(root: &Path, options: ResolveOptions) -> Resolver {
        Resolver::new(root, &options, &["react".to_string()])
    }

    fn found(r: Result<Resolution, ResolveError>) -> UnitId {
        match r.unwrap() {
            Resolution::Found(id) => id,
            Resolution::External(e) => panic!("unexpected external {e}"),
        }
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash", None));
        assert_eq!(parse_bare_specifier("lodash/fp"), ("lodash", Some("fp")));
        assert_eq!(parse_bare_specifier("@scope/pkg"), ("@scope/pkg", None));
        assert_eq!(
            parse_bare_specifier("@scope/pkg/a/b"),
            ("@scope/pkg", Some("a/b"))
        );
    }

    #[test]
    fn test_package_name_from_path() {
        assert_eq!(
            package_name_from_path(Path::new("/a/node_modules/@s/p/x.js")).as_deref(),
            Some("@s/p")
        );
        assert_eq!(
            package_name_from_path(Path::new("/a/node_modules/x/node_modules/y/i.js")).as_deref(),
            Some("y")
        );
        assert_eq!(package_name_from_path(Path::new("/a/src/x.js")), None);
    }

    #[test]
    fn test_resolve_relative_with_extension_and_index() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let utils = write(&root, "src/utils.js", "");
        let index = write(&root, "src/lib/index.js", "");
        let r = resolver(&root, ResolveOptions::default());

        assert_eq!(found(r.resolve("./utils", &root.join("src"))).path, utils);
        assert_eq!(found(r.resolve("./lib", &root.join("src"))).path, index);
    }

    #[test]
    fn test_resolve_keeps_query() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root, "logo.png", "");
        let r = resolver(&root, ResolveOptions::default());
        let id = found(r.resolve("./logo.png?inline", &root));
        assert_eq!(id.query.as_deref(), Some("inline"));
    }

    #[test]
    fn test_resolve_alias() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let button = write(&root, "src/components/button.js", "");
        let mut options = ResolveOptions::default();
        options.alias.insert("@src".to_string(), "./src".to_string());
        let r = resolver(&root, options);
        let id = found(r.resolve("@src/components/button", &root.join("deep/dir")));
        assert_eq!(id.path, button);
    }

    #[test]
    fn test_bare_alias_target_is_a_package() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root, "node_modules/preact/package.json", r#"{"name":"preact"}"#);
        let compat = write(&root, "node_modules/preact/compat/index.js", "");
        write(&root, "src/index.js", "");
        let mut options = ResolveOptions::default();
        options.alias.insert("react".to_string(), "preact/compat".to_string());
        options.alias.insert("@src".to_string(), "src".to_string());
        let r = resolver(&root, options);

        assert_eq!(found(r.resolve("react", &root.join("src"))).path, compat);
        // Without `./` the target names a package, not the `src` directory.
        assert!(r.resolve("@src/index", &root).is_err());
    }

    #[test]
    fn test_exact_alias_does_not_match_subpaths() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(&root, "shim.js", "");
        let mut options = ResolveOptions::default();
        options.alias.insert("vue$".to_string(), "./shim.js".to_string());
        let r = resolver(&root, options);
        assert!(matches!(r.resolve("vue", &root), Ok(Resolution::Found(_))));
        assert!(r.resolve("vue/other", &root).is_err());
    }

    #[test]
    fn test_resolve_bare_main_fields() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(
            &root,
            "node_modules/pkg/package.json",
            r#"{"name":"pkg","main":"lib/main.js","module":"es/index.js"}"#,
        );
        let es = write(&root, "node_modules/pkg/es/index.js", "");
        write(&root, "node_modules/pkg/lib/main.js", "");
        let r = resolver(&root, ResolveOptions::default());
        assert_eq!(found(r.resolve("pkg", &root.join("src/a"))).path, es);
    }

    #[test]
    fn test_resolve_bare_subpath() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let fp = write(&root, "node_modules/@s/p/fp.js", "");
        let r = resolver(&root, ResolveOptions::default());
        assert_eq!(found(r.resolve("@s/p/fp", &root)).path, fp);
    }

    #[test]
    fn test_externals() {
        let dir = tempdir().unwrap();
        let r = resolver(dir.path(), ResolveOptions::default());
        assert_eq!(
            r.resolve("react/jsx-runtime", dir.path()).unwrap(),
            Resolution::External("react/jsx-runtime".to_string())
        );
    }

    #[test]
    fn test_error_lists_candidates() {
        let dir = tempdir().unwrap();
        let r = resolver(dir.path(), ResolveOptions::default());
        let err = r.resolve("./missing", dir.path()).unwrap_err();
        assert!(err.candidates.len() >= 3);
        assert!(err.candidates.iter().any(|c| c.ends_with("missing.js")));
        assert!(err.to_string().contains("tried:"));
    }

    #[test]
    fn test_package_side_effects() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write(
            &root,
            "node_modules/pure/package.json",
            r#"{"name":"pure","sideEffects":false}"#,
        );
        let a = write(&root, "node_modules/pure/a.js", "");
        write(
            &root,
            "node_modules/styled/package.json",
            r#"{"name":"styled","sideEffects":["*.css"]}"#,
        );
        let css = write(&root, "node_modules/styled/x.css", "");
        let js = write(&root, "node_modules/styled/x.js", "");

        let r = resolver(&root, ResolveOptions::default());
        let info = r.package_info(&a).unwrap();
        assert_eq!(info.name.as_deref(), Some("pure"));
        assert_eq!(info.side_effects_for(&a), Some(false));

        let styled = r.package_info(&css).unwrap();
        assert_eq!(styled.side_effects_for(&css), Some(true));
        assert_eq!(styled.side_effects_for(&js), Some(false));
    }
}
