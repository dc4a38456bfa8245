//! Incremental rebuild loop.
//!
//! ```text
//! idle --start--> building --> serving --change--> rebuilding --> serving
//! ```
//!
//! A failed rebuild leaves the last good output published and reports the
//! error to clients; the session keeps serving.

use super::watch::{ChangeKind, ChangeStream, FileChange};
use crate::bundler::{BuildOutput, Pipeline, TransformCache, UnitId};
use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Buffered notifications per client before old ones are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevState {
    #[default]
    Idle,
    Building,
    Serving,
    Rebuilding,
}

/// Kind of client notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Connected,
    Reload,
    Error,
    Warning,
}

/// Message pushed to browser clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub detail: String,
}

impl DevMessage {
    #[must_use]
    pub fn new(kind: MessageKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What the server sees: the last good output and the current error.
#[derive(Debug, Clone, Default)]
pub struct DevSnapshot {
    pub state: DevState,
    /// Incremented on every finished build, successful or not.
    pub generation: u64,
    pub output: Option<Arc<BuildOutput>>,
    pub error: Option<String>,
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    /// Cache entries dropped for changed units and their dependents.
    pub invalidated: usize,
    /// Units run through their loaders, `None` if the build failed.
    pub transformed: Option<usize>,
}

/// Owns the pipeline and its cache across generations.
#[derive(Debug)]
pub struct DevOrchestrator {
    pipeline: Pipeline,
    cache: TransformCache,
    state: DevState,
    generation: u64,
    last_good: Option<Arc<BuildOutput>>,
    failed: bool,
    notify: broadcast::Sender<DevMessage>,
    snapshot: watch::Sender<DevSnapshot>,
}

impl DevOrchestrator {
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        let (notify, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (snapshot, _) = watch::channel(DevSnapshot::default());
        Self {
            pipeline,
            cache: TransformCache::new(),
            state: DevState::Idle,
            generation: 0,
            last_good: None,
            failed: false,
            notify,
            snapshot,
        }
    }

    #[must_use]
    pub fn state(&self) -> DevState {
        self.state
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Last successful output.
    #[must_use]
    pub fn last_good(&self) -> Option<&Arc<BuildOutput>> {
        self.last_good.as_ref()
    }

    /// Client notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DevMessage> {
        self.notify.subscribe()
    }

    /// Sender for notifications, for components that greet new clients.
    #[must_use]
    pub fn notifier(&self) -> broadcast::Sender<DevMessage> {
        self.notify.clone()
    }

    /// Published snapshots.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<DevSnapshot> {
        self.snapshot.subscribe()
    }

    /// First build. A failure is reported like a rebuild failure and the
    /// session still moves to serving so a fix can be picked up.
    ///
    /// # Errors
    /// Returns the build error after reporting it.
    pub fn start(&mut self) -> Result<(), BuildError> {
        self.state = DevState::Building;
        self.publish();
        let result = self.pipeline.build_with_cache(&mut self.cache);
        self.finish(result).map(|_| ())
    }

    /// Rebuild after `changed` files changed.
    ///
    /// Changed units and their transitive dependents are invalidated; every
    /// other unit is served from the cache.
    pub fn rebuild(&mut self, changed: &[PathBuf]) -> RebuildReport {
        self.state = DevState::Rebuilding;
        self.publish();

        let invalidated = match &self.last_good {
            Some(output) => {
                let ids: Vec<UnitId> = output
                    .graph
                    .nodes()
                    .iter()
                    .filter(|n| changed.iter().any(|p| *p == n.id.path))
                    .map(|n| n.id.clone())
                    .collect();
                let dependents = output.graph.transitive_dependents(&ids);
                self.cache.invalidate(dependents.iter())
            }
            None => 0,
        };
        tracing::debug!(changed = changed.len(), invalidated, "rebuilding");

        let result = self.pipeline.build_with_cache(&mut self.cache);
        let transformed = self.finish(result).ok();
        RebuildReport {
            invalidated,
            transformed,
        }
    }

    /// Whether `change` can affect the output. A new file may change how an
    /// existing specifier resolves, so creations always count.
    #[must_use]
    pub fn is_relevant(&self, change: &FileChange) -> bool {
        if self.failed || self.last_good.is_none() || change.kind == ChangeKind::Created {
            return true;
        }
        let path = change.path.as_path();
        if path.file_name().is_some_and(|n| n == "package.json") {
            return true;
        }
        self.last_good
            .as_ref()
            .is_some_and(|o| o.graph.nodes().iter().any(|n| n.id.path == path))
    }

    /// Consume change batches until the stream closes. Changes arriving
    /// during a rebuild are collected into a single follow-up rebuild.
    ///
    /// Returns `None` if the runtime cancelled a rebuild task.
    pub async fn run(mut self, mut changes: ChangeStream, debounce: Duration) -> Option<Self> {
        while let Some(batch) = changes.next_batch(debounce).await {
            let relevant: Vec<PathBuf> = batch
                .into_iter()
                .filter(|c| self.is_relevant(c))
                .map(|c| c.path)
                .collect();
            if relevant.is_empty() {
                tracing::trace!("ignoring changes outside the graph");
                continue;
            }
            let joined = tokio::task::spawn_blocking(move || {
                self.rebuild(&relevant);
                self
            })
            .await;
            self = match joined {
                Ok(orchestrator) => orchestrator,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    tracing::error!(error = %e, "rebuild task cancelled");
                    return None;
                }
            };
        }
        Some(self)
    }

    fn finish(&mut self, result: Result<BuildOutput, BuildError>) -> Result<usize, BuildError> {
        self.generation += 1;
        self.state = DevState::Serving;
        match result {
            Ok(output) => {
                let transformed = output.stats.graph.transformed;
                let detail = format!(
                    "{} modules, {} transformed in {}ms",
                    output.stats.graph.modules, transformed, output.stats.duration_ms
                );
                for warning in &output.warnings {
                    let _ = self.notify.send(DevMessage::new(MessageKind::Warning, warning.clone()));
                }
                self.last_good = Some(Arc::new(output));
                self.failed = false;
                self.publish_with_error(None);
                tracing::info!(generation = self.generation, "{detail}");
                let _ = self.notify.send(DevMessage::new(MessageKind::Reload, detail));
                Ok(transformed)
            }
            Err(e) => {
                self.failed = true;
                let detail = match e.unit() {
                    Some(unit) => format!("{} in {unit}: {e}", e.code()),
                    None => format!("{}: {e}", e.code()),
                };
                tracing::error!(generation = self.generation, code = e.code(), "{e}");
                self.publish_with_error(Some(detail.clone()));
                let _ = self.notify.send(DevMessage::new(MessageKind::Error, detail));
                Err(e)
            }
        }
    }

    fn publish(&self) {
        let error = self.snapshot.borrow().error.clone();
        self.publish_with_error(error);
    }

    fn publish_with_error(&self, error: Option<String>) {
        self.snapshot.send_replace(DevSnapshot {
            state: self.state,
            generation: self.generation,
            output: self.last_good.clone(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Mode, PlinthOptions};
    use std::fs;
    use tempfile::tempdir;

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("index.js"), "import { b } from './b.js';\nimport './d.js';\nconsole.log(b);\n").unwrap();
        fs::write(root.join("b.js"), "import { c } from './c.js';\nexport const b = c + 1;\n").unwrap();
        fs::write(root.join("c.js"), "export const c = 1;\n").unwrap();
        fs::write(root.join("d.js"), "console.log('d');\n").unwrap();
        (dir, root)
    }

    fn orchestrator(root: &std::path::Path) -> DevOrchestrator {
        let pipeline =
            Pipeline::new(root, PlinthOptions::with_entry("./index.js"), Mode::Development).unwrap();
        DevOrchestrator::new(pipeline)
    }

    #[test]
    fn test_rebuild_touches_only_dependents() {
        let (_dir, root) = project();
        let mut dev = orchestrator(&root);
        let mut rx = dev.subscribe();
        assert_eq!(dev.state(), DevState::Idle);

        dev.start().unwrap();
        assert_eq!(dev.state(), DevState::Serving);
        assert_eq!(rx.try_recv().unwrap().kind, MessageKind::Reload);

        fs::write(root.join("c.js"), "export const c = 2;\n").unwrap();
        let report = dev.rebuild(&[root.join("c.js")]);
        // c, b and index; d is reused.
        assert_eq!(report.invalidated, 3);
        assert_eq!(report.transformed, Some(3));
        assert_eq!(dev.last_good().unwrap().stats.graph.reused, 1);
    }

    #[test]
    fn test_failed_rebuild_keeps_last_good() {
        let (_dir, root) = project();
        let mut dev = orchestrator(&root);
        let snapshots = dev.snapshots();
        dev.start().unwrap();
        let good = Arc::clone(dev.last_good().unwrap());
        let mut rx = dev.subscribe();

        fs::write(root.join("b.js"), "import { c } from './missing.js';\n").unwrap();
        let report = dev.rebuild(&[root.join("b.js")]);
        assert_eq!(report.transformed, None);
        assert_eq!(dev.state(), DevState::Serving);
        assert!(Arc::ptr_eq(dev.last_good().unwrap(), &good));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.kind, MessageKind::Error);
        assert!(msg.detail.contains("RESOLUTION_ERROR"));
        assert!(snapshots.borrow().error.is_some());
        assert!(snapshots.borrow().output.is_some());

        // Any change is relevant while the last build is broken.
        assert!(dev.is_relevant(&FileChange::new(root.join("missing.js"), ChangeKind::Modified)));
        fs::write(root.join("missing.js"), "export const c = 3;\n").unwrap();
        let report = dev.rebuild(&[root.join("missing.js")]);
        assert!(report.transformed.is_some());
        assert!(snapshots.borrow().error.is_none());
        assert!(!dev.is_relevant(&FileChange::new(root.join("notes.txt"), ChangeKind::Modified)));
    }

    #[test]
    fn test_created_file_that_shadows_a_resolution_is_relevant() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("utils")).unwrap();
        fs::write(root.join("index.js"), "import { v } from './utils';\nconsole.log(v);\n").unwrap();
        fs::write(root.join("utils/index.js"), "export const v = 'dir';\n").unwrap();
        let mut dev = orchestrator(&root);
        dev.start().unwrap();

        // `./utils` now resolves to the new file instead of the directory.
        fs::write(root.join("utils.js"), "export const v = 'file';\n").unwrap();
        assert!(!dev.is_relevant(&FileChange::new(root.join("utils.js"), ChangeKind::Modified)));
        let created = FileChange::new(root.join("utils.js"), ChangeKind::Created);
        assert!(dev.is_relevant(&created));

        dev.rebuild(&[created.path]);
        let output = dev.last_good().unwrap();
        assert!(output.graph.nodes().iter().any(|n| n.id.path == root.join("utils.js")));
        assert!(!output.graph.nodes().iter().any(|n| n.id.path == root.join("utils/index.js")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_coalesces_changes() {
        let (_dir, root) = project();
        let mut dev = orchestrator(&root);
        dev.start().unwrap();
        let snapshots = dev.snapshots();
        let generation = snapshots.borrow().generation;

        let (tx, stream) = ChangeStream::channel();
        tx.send(FileChange::new(root.join("c.js"), ChangeKind::Modified)).unwrap();
        tx.send(FileChange::new(root.join("b.js"), ChangeKind::Modified)).unwrap();
        tx.send(FileChange::new(root.join("c.js"), ChangeKind::Modified)).unwrap();
        drop(tx);

        let dev = dev.run(stream, Duration::from_millis(10)).await.unwrap();
        assert_eq!(dev.state(), DevState::Serving);
        assert_eq!(snapshots.borrow().generation, generation + 1);
    }

    #[test]
    fn test_message_json() {
        let msg = DevMessage::new(MessageKind::Reload, "ok");
        assert_eq!(msg.to_json(), r#"{"type":"reload","detail":"ok"}"#);
    }
}
