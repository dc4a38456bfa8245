//! File watching as a cancellable stream of change batches.

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Directory names never watched.
const IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn", ".cache"];

/// Watcher errors.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid watch root: {}", .0.display())]
    InvalidRoot(PathBuf),

    #[error("Watcher failed: {0}")]
    WatcherFailed(#[from] notify::Error),
}

/// Paths whose changes never trigger a rebuild.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    /// Directories ignored with everything below them, e.g. the output dir.
    pub dirs: Vec<PathBuf>,
}

impl IgnoreRules {
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Whether a change to `path` is ignored.
    #[must_use]
    pub fn should_ignore(&self, path: &Path) -> bool {
        if self.dirs.iter().any(|d| path.starts_with(d)) {
            return true;
        }
        if path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|s| IGNORED_DIRS.contains(&s))
        }) {
            return true;
        }
        // Editor swap and backup files.
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        name.ends_with('~')
            || name.ends_with(".swp")
            || name.ends_with(".swx")
            || name.ends_with(".tmp")
            || name.starts_with(".#")
            || name == ".DS_Store"
    }
}

/// What happened to a path.
///
/// Ordered so that merging the events of one batch keeps the kind that
/// matters most for relevance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Modified,
    Removed,
    /// Created, or renamed into place.
    Created,
}

/// One changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl FileChange {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Subscription to file changes.
///
/// Dropping the stream stops the underlying watcher.
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<FileChange>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl ChangeStream {
    /// Watch `root` recursively.
    ///
    /// # Errors
    /// The root is not a directory or the platform watcher cannot start.
    pub fn watch(root: &Path, ignore: IgnoreRules) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::InvalidRoot(root.to_path_buf()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = change_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if !ignore.should_ignore(&path) {
                            let _ = tx.send(FileChange { path, kind });
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");
        Ok(Self {
            rx,
            watcher: Some(watcher),
        })
    }

    /// A stream fed by hand instead of by the filesystem.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<FileChange>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, watcher: None })
    }

    /// Wait for the next change, then keep collecting until no change has
    /// arrived for `debounce`. Returns one change per distinct path in
    /// sorted order, or `None` once the stream is closed.
    pub async fn next_batch(&mut self, debounce: Duration) -> Option<Vec<FileChange>> {
        let first = self.rx.recv().await?;
        let mut batch = BTreeMap::from([(first.path, first.kind)]);
        loop {
            match tokio::time::timeout(debounce, self.rx.recv()).await {
                Ok(Some(change)) => {
                    let kind = batch.entry(change.path).or_insert(change.kind);
                    *kind = (*kind).max(change.kind);
                }
                Ok(None) | Err(_) => break,
            }
        }
        tracing::debug!(count = batch.len(), "coalesced file changes");
        Some(
            batch
                .into_iter()
                .map(|(path, kind)| FileChange { path, kind })
                .collect(),
        )
    }

    /// Stop receiving; pending changes are dropped.
    pub fn close(&mut self) {
        self.rx.close();
        self.watcher = None;
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(ChangeKind::Modified),
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => Some(ChangeKind::Removed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore() {
        let rules = IgnoreRules::new(vec![PathBuf::from("/p/build")]);
        assert!(rules.should_ignore(Path::new("/p/build/js/main.js")));
        assert!(rules.should_ignore(Path::new("/p/.git/index")));
        assert!(rules.should_ignore(Path::new("/p/src/.index.js.swp")));
        assert!(rules.should_ignore(Path::new("/p/src/index.js~")));
        assert!(!rules.should_ignore(Path::new("/p/src/index.js")));
        assert!(!rules.should_ignore(Path::new("/p/builder/x.js")));
    }

    #[test]
    fn test_change_kinds() {
        assert_eq!(change_kind(&EventKind::Create(CreateKind::File)), Some(ChangeKind::Created));
        assert_eq!(
            change_kind(&EventKind::Modify(ModifyKind::Name(notify::event::RenameMode::To))),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            change_kind(&EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(change_kind(&EventKind::Create(CreateKind::Folder)), None);
        assert_eq!(change_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[tokio::test]
    async fn test_batches_are_debounced_and_deduped() {
        let (tx, mut stream) = ChangeStream::channel();
        tx.send(FileChange::new("/b.js", ChangeKind::Modified)).unwrap();
        tx.send(FileChange::new("/a.js", ChangeKind::Modified)).unwrap();
        tx.send(FileChange::new("/b.js", ChangeKind::Created)).unwrap();
        tx.send(FileChange::new("/b.js", ChangeKind::Modified)).unwrap();

        let batch = stream.next_batch(Duration::from_millis(20)).await.unwrap();
        assert_eq!(
            batch,
            vec![
                FileChange::new("/a.js", ChangeKind::Modified),
                FileChange::new("/b.js", ChangeKind::Created),
            ]
        );

        drop(tx);
        assert!(stream.next_batch(Duration::from_millis(20)).await.is_none());
    }
}
