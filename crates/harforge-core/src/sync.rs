//! Real-time mirroring of generated output into a user-visible workspace
//!
//! Uses notify to observe the source tree and a re-armed deadline to debounce
//! change bursts: a sync pass runs only after a full quiet period, so N rapid
//! writes collapse into one pass reflecting the state after the last write.
//!
//! Mirroring is a full mirror: additions and modifications are copied over,
//! and destination entries with no source counterpart are removed on the
//! next pass. A pass failure is published once on the event bus and the
//! watcher keeps running; the scripts directory stays authoritative.

use crate::error::CoreError;
use crate::event::{EventBus, SyncEvent};
use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Configuration for a sync session
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last change event before a pass runs
    pub debounce: Duration,

    /// Capacity of the raw notify event channel
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            event_channel_capacity: 100,
        }
    }
}

/// Lifecycle state of a sync watcher
///
/// `Stopped` is terminal; a new instance must be constructed to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running,
    Stopped,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Stopped => "stopped",
        }
    }
}

/// Point-in-time snapshot of a sync session
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    pub dest_dir: PathBuf,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_count: u64,
    pub error_count: u64,
}

/// What one completed pass changed
#[derive(Debug, Clone, Copy, Default)]
struct PassSummary {
    copied: usize,
    removed: usize,
}

/// Holds the live observation resources; dropping it releases the watch
struct WatchHandle {
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

/// Mirrors a source directory into a destination while running
pub struct SyncWatcher {
    source_dir: PathBuf,
    dest_dir: PathBuf,
    config: SyncConfig,
    bus: EventBus,
    status: Arc<RwLock<SyncStatus>>,
    handle: Option<WatchHandle>,
}

impl SyncWatcher {
    /// Create an idle watcher bound to a source and destination directory
    pub fn new(source_dir: PathBuf, dest_dir: PathBuf, config: SyncConfig) -> Self {
        let status = SyncStatus {
            state: SyncState::Idle,
            dest_dir: dest_dir.clone(),
            last_sync: None,
            sync_count: 0,
            error_count: 0,
        };
        Self {
            source_dir,
            dest_dir,
            config,
            bus: EventBus::default_capacity(),
            status: Arc::new(RwLock::new(status)),
            handle: None,
        }
    }

    /// Event bus carrying this session's notifications
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Snapshot of the current session state; never blocks on in-flight work
    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Begin observing the source tree; idle instances only
    ///
    /// Returns once observation is armed. One initial pass is scheduled so
    /// content that existed before `start()` is mirrored after the first
    /// quiet period. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), CoreError> {
        {
            let status = self.status.read();
            if status.state != SyncState::Idle {
                return Err(CoreError::InvalidState {
                    expected: SyncState::Idle.as_str(),
                    actual: status.state.as_str(),
                });
            }
        }

        fs::create_dir_all(&self.source_dir).map_err(|source| CoreError::DirectoryCreate {
            path: self.source_dir.clone(),
            source,
        })?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_channel_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            Config::default(),
        )
        .map_err(|e| CoreError::WatchError {
            message: "failed to create watch backend".to_string(),
            source: Some(e),
        })?;

        watcher
            .watch(&self.source_dir, RecursiveMode::Recursive)
            .map_err(|e| CoreError::WatchError {
                message: format!("failed to watch {}", self.source_dir.display()),
                source: Some(e),
            })?;

        self.status.write().state = SyncState::Running;

        tokio::spawn(run_loop(
            self.source_dir.clone(),
            self.dest_dir.clone(),
            self.config.debounce,
            self.bus.clone(),
            Arc::clone(&self.status),
            event_rx,
            shutdown_rx,
        ));

        self.handle = Some(WatchHandle {
            _watcher: watcher,
            shutdown_tx,
        });

        debug!(
            source = %self.source_dir.display(),
            dest = %self.dest_dir.display(),
            "sync watcher started"
        );
        self.bus.publish(SyncEvent::Started {
            dest: self.dest_dir.clone(),
        });

        Ok(())
    }

    /// Stop observing and release resources; no-op unless running
    ///
    /// Returns without awaiting an in-flight pass: the pass task is allowed
    /// to finish committing before it notices the channels closed. Teardown
    /// never fails the caller's shutdown sequence.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.status.write().state = SyncState::Stopped;

        // Dropping the handle also closes the event channel, which ends the
        // pass task even when the signal cannot be delivered.
        if handle.shutdown_tx.try_send(()).is_err() {
            trace!("sync shutdown signal not delivered; relying on channel close");
        }
        drop(handle);

        debug!(source = %self.source_dir.display(), "sync watcher stopped");
        self.bus.publish(SyncEvent::Stopped);
    }
}

/// Debounce loop: each qualifying event re-arms the deadline; the pass runs
/// only when a full quiet period has elapsed. Passes are awaited in place,
/// so they never overlap.
async fn run_loop(
    source: PathBuf,
    dest: PathBuf,
    debounce: Duration,
    bus: EventBus,
    status: Arc<RwLock<SyncStatus>>,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    // Mirror pre-existing content after the first quiet period.
    let mut deadline = Some(Instant::now() + debounce);

    loop {
        // Disabled branch below still needs a value; any future instant does.
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            // Shutdown first: a pass scheduled but not yet started when
            // stop() arrives is abandoned, not begun.
            biased;

            _ = shutdown_rx.recv() => break,
            maybe_event = event_rx.recv() => match maybe_event {
                Some(Ok(event)) if qualifies(&event.kind) => {
                    trace!(kind = ?event.kind, "source change event");
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "watch backend error");
                    bus.publish(SyncEvent::WatchError(e.to_string()));
                }
                None => break,
            },
            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                deadline = None;
                let (pass_source, pass_dest) = (source.clone(), dest.clone());
                let result =
                    tokio::task::spawn_blocking(move || mirror_pass(&pass_source, &pass_dest))
                        .await;

                match result {
                    Ok(Ok(summary)) => {
                        {
                            let mut st = status.write();
                            st.sync_count += 1;
                            st.last_sync = Some(Utc::now());
                        }
                        debug!(
                            copied = summary.copied,
                            removed = summary.removed,
                            "sync pass completed"
                        );
                        bus.publish(SyncEvent::PassCompleted {
                            copied: summary.copied,
                            removed: summary.removed,
                        });
                    }
                    Ok(Err(e)) => {
                        status.write().error_count += 1;
                        warn!(error = %e, "sync pass failed");
                        bus.publish(SyncEvent::PassFailed(e.to_string()));
                    }
                    Err(e) => {
                        status.write().error_count += 1;
                        bus.publish(SyncEvent::PassFailed(format!("sync pass aborted: {e}")));
                    }
                }
            },
        }
    }
}

/// Events that can change the on-disk state of the source tree
fn qualifies(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// One full mirror pass: copy changed files, then drop stale entries
fn mirror_pass(source: &Path, dest: &Path) -> Result<PassSummary, CoreError> {
    fs::create_dir_all(dest).map_err(|e| CoreError::DirectoryCreate {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let mut summary = PassSummary::default();
    let mut mirrored: HashSet<PathBuf> = HashSet::new();

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source.to_path_buf());
            CoreError::FileRead {
                path,
                source: e.into(),
            }
        })?;

        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        mirrored.insert(rel.to_path_buf());

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| CoreError::DirectoryCreate {
                path: target.clone(),
                source: e,
            })?;
        } else if entry.file_type().is_file() && needs_copy(entry.path(), &target) {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| CoreError::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            fs::copy(entry.path(), &target).map_err(|e| CoreError::FileWrite {
                path: target.clone(),
                source: e,
            })?;
            summary.copied += 1;
        }
    }

    // Deletion propagation: collect stale destination entries first, then
    // remove children before parents.
    let mut stale: Vec<(PathBuf, bool)> = Vec::new();
    for entry in WalkDir::new(dest).min_depth(1).contents_first(true) {
        let Ok(entry) = entry else { continue };
        let Ok(rel) = entry.path().strip_prefix(dest) else {
            continue;
        };
        if !mirrored.contains(rel) {
            stale.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
        }
    }

    for (path, is_dir) in stale {
        let removal = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removal {
            Ok(()) => summary.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::MirrorRemove { path, source: e }),
        }
    }

    Ok(summary)
}

/// Copy when the destination is missing, a different type, a different size,
/// or older than the source
fn needs_copy(source: &Path, dest: &Path) -> bool {
    let Ok(src_meta) = source.metadata() else {
        // Disappeared mid-pass; the deletion sweep handles it next time.
        return false;
    };
    let Ok(dst_meta) = dest.metadata() else {
        return true;
    };
    if !dst_meta.is_file() {
        return true;
    }
    if src_meta.len() != dst_meta.len() {
        return true;
    }
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(src_mtime), Ok(dst_mtime)) => src_mtime > dst_mtime,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn test_watcher(source: &Path, dest: &Path, debounce_ms: u64) -> SyncWatcher {
        SyncWatcher::new(
            source.to_path_buf(),
            dest.to_path_buf(),
            SyncConfig {
                debounce: Duration::from_millis(debounce_ms),
                ..Default::default()
            },
        )
    }

    /// Poll the status until `predicate` holds or the timeout elapses
    async fn wait_for(
        watcher: &SyncWatcher,
        predicate: impl Fn(&SyncStatus) -> bool,
    ) -> SyncStatus {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let status = watcher.status();
            if predicate(&status) {
                return status;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "timed out waiting for sync status; last: {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 100);

        watcher.stop();
        watcher.stop();
        assert_eq!(watcher.status().state, SyncState::Idle);
    }

    #[test]
    fn test_initial_status_snapshot() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let watcher = test_watcher(source.path(), dest.path(), 100);

        let status = watcher.status();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.dest_dir, dest.path());
        assert_eq!(status.sync_count, 0);
        assert_eq!(status.error_count, 0);
        assert!(status.last_sync.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_twice_is_rejected() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 100);

        watcher.start().unwrap();
        let err = watcher.start().unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));

        watcher.stop();
        assert_eq!(watcher.status().state, SyncState::Stopped);

        // Terminal: stopping again stays a no-op
        watcher.stop();
        assert_eq!(watcher.status().state, SyncState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_burst_coalesces_into_one_pass() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 300);

        watcher.start().unwrap();

        // A burst of writes well inside one debounce window
        for i in 0..5 {
            write(&source.path().join(format!("file{i}.py")), "draft");
        }
        write(&source.path().join("file0.py"), "final contents");

        let status = wait_for(&watcher, |s| s.sync_count >= 1).await;
        assert!(status.last_sync.is_some());

        // No trailing passes: after two further quiet windows the count holds
        tokio::time::sleep(Duration::from_millis(700)).await;
        let settled = watcher.status();
        assert_eq!(settled.sync_count, 1, "burst must collapse into one pass");

        // Destination reflects the state after the last write
        let mirrored = fs::read_to_string(dest.path().join("file0.py")).unwrap();
        assert_eq!(mirrored, "final contents");
        for i in 1..5 {
            assert!(dest.path().join(format!("file{i}.py")).is_file());
        }

        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_directories_are_mirrored() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 150);

        watcher.start().unwrap();
        write(&source.path().join("pkg/api/client.py"), "class Client: ...");

        wait_for(&watcher, |s| s.sync_count >= 1).await;
        let mirrored = fs::read_to_string(dest.path().join("pkg/api/client.py")).unwrap();
        assert_eq!(mirrored, "class Client: ...");

        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mirrors_deletions_on_next_pass() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 150);

        watcher.start().unwrap();
        write(&source.path().join("keep.py"), "keep");
        write(&source.path().join("drop.py"), "drop");

        wait_for(&watcher, |s| s.sync_count >= 1).await;
        assert!(dest.path().join("drop.py").is_file());

        fs::remove_file(source.path().join("drop.py")).unwrap();

        wait_for(&watcher, |s| s.sync_count >= 2).await;
        assert!(!dest.path().join("drop.py").exists());
        assert!(dest.path().join("keep.py").is_file());

        watcher.stop();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_pass_failure_reports_once_and_recovers() {
        use std::os::unix::fs::PermissionsExt;

        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mut watcher = test_watcher(source.path(), dest.path(), 150);
        let mut events = watcher.events().subscribe();

        watcher.start().unwrap();
        write(&source.path().join("data.txt"), "v1");
        wait_for(&watcher, |s| s.sync_count >= 1).await;

        // Make the mirrored file unwritable, then change the source
        let mirrored = dest.path().join("data.txt");
        fs::set_permissions(&mirrored, fs::Permissions::from_mode(0o444)).unwrap();
        write(&source.path().join("data.txt"), "v2 with more bytes");

        let status = wait_for(&watcher, |s| s.error_count >= 1).await;
        assert_eq!(status.state, SyncState::Running);
        assert_eq!(status.sync_count, 1);
        assert_eq!(status.error_count, 1, "one failed pass, one error");

        // Exactly one PassFailed on the bus so far (give the publish a beat)
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::PassFailed(_)) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        // Heal and confirm the next pass succeeds
        fs::set_permissions(&mirrored, fs::Permissions::from_mode(0o644)).unwrap();
        write(&source.path().join("data.txt"), "v3 final");

        wait_for(&watcher, |s| s.sync_count >= 2).await;
        assert_eq!(fs::read_to_string(&mirrored).unwrap(), "v3 final");

        watcher.stop();
    }

    #[test]
    fn test_qualifying_event_kinds() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        assert!(qualifies(&EventKind::Create(CreateKind::File)));
        assert!(qualifies(&EventKind::Modify(ModifyKind::Any)));
        assert!(qualifies(&EventKind::Remove(RemoveKind::File)));
        assert!(!qualifies(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }

    #[test]
    fn test_mirror_pass_copies_and_prunes() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        write(&source.path().join("a.txt"), "alpha");
        write(&source.path().join("sub/b.txt"), "beta");
        write(&dest.path().join("stale/old.txt"), "gone");

        let summary = mirror_pass(source.path(), dest.path()).unwrap();
        assert_eq!(summary.copied, 2);
        assert!(summary.removed >= 1);

        assert_eq!(
            fs::read_to_string(dest.path().join("a.txt")).unwrap(),
            "alpha"
        );
        assert_eq!(
            fs::read_to_string(dest.path().join("sub/b.txt")).unwrap(),
            "beta"
        );
        assert!(!dest.path().join("stale").exists());
    }

    #[test]
    fn test_mirror_pass_skips_unchanged_files() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        write(&source.path().join("a.txt"), "same");
        let first = mirror_pass(source.path(), dest.path()).unwrap();
        assert_eq!(first.copied, 1);

        let second = mirror_pass(source.path(), dest.path()).unwrap();
        assert_eq!(second.copied, 0, "unchanged file copied again");
    }
}
