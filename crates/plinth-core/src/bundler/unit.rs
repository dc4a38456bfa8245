//! Source units: resolved identities and their raw content.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved identity of a source unit: canonical file path plus query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    pub path: PathBuf,
    pub query: Option<String>,
}

impl UnitId {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, query: Option<String>) -> Self {
        Self {
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
        }
    }

    /// Path with forward slashes, as matched by rule patterns.
    #[must_use]
    pub fn path_str(&self) -> String {
        slash_path(&self.path)
    }

    /// Stable module id relative to `context`, with the query appended.
    ///
    /// Units outside `context` keep their absolute path.
    #[must_use]
    pub fn relative_to(&self, context: &Path) -> String {
        let rel = self.path.strip_prefix(context).unwrap_or(&self.path);
        let mut id = slash_path(rel);
        if !id.starts_with('/') && !id.starts_with("../") {
            id.insert_str(0, "./");
        }
        if let Some(q) = &self.query {
            id.push('?');
            id.push_str(q);
        }
        id
    }

    /// File stem, used to name async chunks and emitted assets.
    #[must_use]
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string())
    }

    /// Extension with a leading dot, or empty.
    #[must_use]
    pub fn ext(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn kind(&self) -> ContentKind {
        ContentKind::detect(&self.path)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        Ok(())
    }
}

impl Serialize for UnitId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn slash_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '\\' {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Detected content kind of a unit, from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Script,
    Style,
    Image,
    Font,
    Data,
    Other,
}

impl ContentKind {
    #[must_use]
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => Self::Script,
            "css" | "scss" | "sass" | "less" => Self::Style,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" | "bmp" => {
                Self::Image
            }
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Self::Font,
            "json" | "xml" | "csv" | "tsv" | "txt" | "md" => Self::Data,
            _ => Self::Other,
        }
    }

    /// Module type a unit has before any loader runs.
    #[must_use]
    pub fn initial_module_type(self) -> ModuleType {
        match self {
            Self::Script => ModuleType::Script,
            Self::Style => ModuleType::Style,
            Self::Image | Self::Font | Self::Data | Self::Other => ModuleType::Asset,
        }
    }
}

/// How the emitter treats a module's final content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// Script module wrapped into a chunk.
    #[default]
    Script,
    /// Stylesheet merged into the chunk's CSS file.
    Style,
    /// Emitted as a file; importers receive its public URL.
    Asset,
}

/// A source unit as read from disk. Immutable once read.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub id: UnitId,
    pub raw: Arc<[u8]>,
    pub kind: ContentKind,
}

impl SourceUnit {
    /// Read a unit's content.
    ///
    /// # Errors
    /// Returns the I/O error from reading the file.
    pub fn read(id: UnitId) -> std::io::Result<Self> {
        let raw: Arc<[u8]> = std::fs::read(&id.path)?.into();
        let kind = id.kind();
        Ok(Self { id, raw, kind })
    }

    #[must_use]
    pub fn from_bytes(id: UnitId, raw: impl Into<Arc<[u8]>>) -> Self {
        let kind = id.kind();
        Self {
            id,
            raw: raw.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_id() {
        let id = UnitId::new("/app/src/components/a.js", None);
        assert_eq!(id.relative_to(Path::new("/app")), "./src/components/a.js");

        let q = UnitId::new("/app/img.png", Some("inline".to_string()));
        assert_eq!(q.relative_to(Path::new("/app")), "./img.png?inline");
        assert_eq!(q.to_string(), "/app/img.png?inline");
    }

    #[test]
    fn test_empty_query_dropped() {
        let id = UnitId::new("/a.js", Some(String::new()));
        assert!(id.query.is_none());
    }

    #[test]
    fn test_kind_detection() {
        assert_eq!(ContentKind::detect(Path::new("a.JSX")), ContentKind::Script);
        assert_eq!(ContentKind::detect(Path::new("a.scss")), ContentKind::Style);
        assert_eq!(ContentKind::detect(Path::new("a.woff2")), ContentKind::Font);
        assert_eq!(ContentKind::detect(Path::new("a.csv")), ContentKind::Data);
        assert_eq!(ContentKind::detect(Path::new("Makefile")), ContentKind::Other);
        assert_eq!(ContentKind::Image.initial_module_type(), ModuleType::Asset);
    }

    #[test]
    fn test_stem_and_ext() {
        let id = UnitId::new("/x/logo.min.png", None);
        assert_eq!(id.stem(), "logo.min");
        assert_eq!(id.ext(), ".png");
    }
}
