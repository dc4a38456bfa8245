//! Build manifest: logical names to emitted files.

use super::emit::{ChunkFiles, Emitted, EntryFiles};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of the manifest in the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Chunk in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChunk {
    pub kind: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    /// Context-relative ids of the modules the chunk holds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
}

/// Entry load list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub js: Vec<String>,
    pub css: Vec<String>,
}

/// Everything a document needs to reference hashed output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub public_path: String,
    pub entrypoints: IndexMap<String, ManifestEntry>,
    pub chunks: IndexMap<String, ManifestChunk>,
    /// Module id to emitted asset file.
    pub assets: BTreeMap<String, String>,
}

impl Manifest {
    /// Assemble from emitted files and the chunk summary (chunk name to
    /// module ids).
    #[must_use]
    pub fn new(
        emitted: &Emitted,
        summary: &IndexMap<String, Vec<String>>,
        public_path: &str,
    ) -> Self {
        let entrypoints = emitted
            .entrypoints
            .iter()
            .map(|(name, EntryFiles { js, css })| {
                (
                    name.clone(),
                    ManifestEntry {
                        js: js.clone(),
                        css: css.clone(),
                    },
                )
            })
            .collect();
        let chunks = emitted
            .chunks
            .iter()
            .map(|(name, files)| (name.clone(), chunk_entry(files, summary.get(name))))
            .collect();
        Self {
            public_path: public_path.to_string(),
            entrypoints,
            chunks,
            assets: emitted.assets.clone(),
        }
    }

    /// Hashed file of a chunk.
    #[must_use]
    pub fn file_of(&self, chunk: &str) -> Option<&str> {
        self.chunks.get(chunk).map(|c| c.file.as_str())
    }

    /// Pretty JSON document.
    #[must_use]
    pub fn to_json(&self) -> String {
        let mut json = serde_json::to_string_pretty(self).unwrap_or_default();
        json.push('\n');
        json
    }
}

fn chunk_entry(files: &ChunkFiles, modules: Option<&Vec<String>>) -> ManifestChunk {
    let kind = serde_json::to_value(files.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    ManifestChunk {
        kind,
        file: files.js.clone(),
        css: files.css.clone(),
        map: files.map.clone(),
        modules: modules.cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::chunks::ChunkKind;

    #[test]
    fn test_manifest_json() {
        let mut emitted = Emitted::default();
        emitted.chunks.insert(
            "main".to_string(),
            ChunkFiles {
                kind: ChunkKind::Entry,
                js: "js/main.1a2b3c4d.js".to_string(),
                css: None,
                map: None,
            },
        );
        emitted.entrypoints.insert(
            "main".to_string(),
            EntryFiles {
                js: vec!["js/main.1a2b3c4d.js".to_string()],
                css: vec![],
            },
        );
        let mut summary = IndexMap::new();
        summary.insert("main".to_string(), vec!["./index.js".to_string()]);

        let manifest = Manifest::new(&emitted, &summary, "/");
        assert_eq!(manifest.file_of("main"), Some("js/main.1a2b3c4d.js"));
        assert_eq!(manifest.chunks["main"].kind, "entry");

        let parsed: Manifest = serde_json::from_str(&manifest.to_json()).unwrap();
        assert_eq!(parsed, manifest);
        assert!(manifest.to_json().contains("\"publicPath\": \"/\""));
    }
}
