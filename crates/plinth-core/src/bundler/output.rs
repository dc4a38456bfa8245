//! Writing artifacts to the output directory.

use super::emit::{Artifact, ArtifactKind};
use crate::options::CopyPattern;
use plinth_util::fs::{atomic_write, empty_dir};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Attempts per file for transient failures.
pub const WRITE_ATTEMPTS: usize = 3;

/// An artifact could not be read or written.
#[derive(Error, Debug)]
#[error("Failed to write {}: {source}", path.display())]
pub struct EmitError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Run `op`, retrying transient I/O failures.
fn with_retries(path: &Path, mut op: impl FnMut() -> io::Result<()>) -> Result<(), EmitError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(e.kind()) && attempt < WRITE_ATTEMPTS => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "retrying write");
                attempt += 1;
            }
            Err(source) => {
                return Err(EmitError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Write every artifact under `out_dir`, emptying it first when `clean`.
///
/// # Errors
/// The first write that failed permanently or exhausted its retries.
pub fn write_artifacts(out_dir: &Path, artifacts: &[Artifact], clean: bool) -> Result<(), EmitError> {
    if clean {
        with_retries(out_dir, || empty_dir(out_dir))?;
    }
    for artifact in artifacts {
        let path = out_dir.join(&artifact.name);
        with_retries(&path, || atomic_write(&path, &artifact.bytes))?;
    }
    tracing::debug!(
        dir = %out_dir.display(),
        files = artifacts.len(),
        "wrote artifacts"
    );
    Ok(())
}

/// Read the files of `copy` patterns as static artifacts.
///
/// A pattern naming a directory copies its whole tree, following symbolic
/// links; `to` is a directory prefix inside the output.
///
/// # Errors
/// A source that is missing or cannot be read, including any entry of a
/// copied tree that cannot be walked.
pub fn collect_copies(root: &Path, patterns: &[CopyPattern]) -> Result<Vec<Artifact>, EmitError> {
    let mut artifacts = Vec::new();
    for pattern in patterns {
        let from = root.join(&pattern.from);
        let prefix = pattern.to.trim_matches('/');
        let join = |rel: &str| {
            if prefix.is_empty() {
                rel.to_string()
            } else {
                format!("{prefix}/{rel}")
            }
        };

        if from.is_dir() {
            let mut files = Vec::new();
            for entry in WalkDir::new(&from).follow_links(true) {
                let entry = entry.map_err(|e| EmitError {
                    path: e.path().unwrap_or(&from).to_path_buf(),
                    source: io::Error::from(e),
                })?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            for file in files {
                let rel = file
                    .strip_prefix(&from)
                    .unwrap_or(&file)
                    .to_string_lossy()
                    .replace('\\', "/");
                let bytes = read(&file)?;
                artifacts.push(Artifact::new(join(&rel), ArtifactKind::Static, bytes));
            }
        } else {
            let bytes = read(&from)?;
            let name = from
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            artifacts.push(Artifact::new(join(&name), ArtifactKind::Static, bytes));
        }
    }
    Ok(artifacts)
}

fn read(path: &Path) -> Result<Vec<u8>, EmitError> {
    std::fs::read(path).map_err(|source| EmitError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_clean() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("stale.js"), "old").unwrap();

        let artifacts = vec![Artifact::new("js/main.js", ArtifactKind::Script, "x")];
        write_artifacts(&out, &artifacts, true).unwrap();

        assert!(!out.join("stale.js").exists());
        assert_eq!(std::fs::read_to_string(out.join("js/main.js")).unwrap(), "x");
    }

    #[test]
    fn test_retries_only_transient() {
        let path = Path::new("x");
        let mut calls = 0;
        let result = with_retries(path, || {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::Interrupted))
        });
        assert!(result.is_err());
        assert_eq!(calls, WRITE_ATTEMPTS);

        let mut calls = 0;
        let err = with_retries(path, || {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.source.kind(), io::ErrorKind::PermissionDenied);

        let mut calls = 0;
        with_retries(path, || {
            calls += 1;
            if calls < 2 {
                Err(io::Error::from(io::ErrorKind::TimedOut))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_collect_copies() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("favicon.ico"), [1u8, 2]).unwrap();
        std::fs::create_dir_all(dir.path().join("public/img")).unwrap();
        std::fs::write(dir.path().join("public/img/a.png"), [3u8]).unwrap();

        let patterns = vec![
            CopyPattern {
                from: "favicon.ico".into(),
                to: String::new(),
            },
            CopyPattern {
                from: "public".into(),
                to: "static/".into(),
            },
        ];
        let copies = collect_copies(dir.path(), &patterns).unwrap();
        let names: Vec<&str> = copies.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["favicon.ico", "static/img/a.png"]);

        let missing = vec![CopyPattern {
            from: "nope.txt".into(),
            to: String::new(),
        }];
        assert!(collect_copies(dir.path(), &missing).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwalkable_tree_entry_fails_copy() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("public/ok.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("public/dangling")).unwrap();

        let patterns = vec![CopyPattern {
            from: "public".into(),
            to: String::new(),
        }];
        let err = collect_copies(dir.path(), &patterns).unwrap_err();
        assert!(err.path.ends_with("dangling"), "{}", err.path.display());
    }
}
