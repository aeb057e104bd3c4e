//! Run identity and the controller that ties one run together
//!
//! A run binds one HAR capture and one goal to an external agent session.
//! The controller owns the run's sync session (at most one at a time), its
//! message history, and its aggregated token usage and cost.

use crate::error::CoreError;
use crate::event::SyncEvent;
use crate::messages::MessageStore;
use crate::pricing::{PricingTable, TokenUsage};
use crate::sync::{SyncConfig, SyncStatus, SyncWatcher};
use crate::workspace;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Immutable identity of one run
///
/// Created once per invocation; owns the derived on-disk paths.
#[derive(Debug, Clone)]
pub struct RunIdentity {
    pub run_id: String,
    pub har_path: PathBuf,
    pub goal: String,
    pub model: Option<String>,
    pub additional_instructions: Option<String>,
    pub output_root: PathBuf,
}

impl RunIdentity {
    pub fn run_dir(&self) -> PathBuf {
        self.output_root.join(&self.run_id)
    }

    /// Where the agent writes generated scripts; authoritative output
    pub fn scripts_dir(&self) -> PathBuf {
        self.run_dir().join("scripts")
    }

    /// Conversation history location
    pub fn messages_path(&self) -> PathBuf {
        self.run_dir().join("messages.jsonl")
    }
}

/// Default root for run output directories (`~/.harforge/runs`)
pub fn default_output_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".harforge")
        .join("runs")
}

/// Consumer-side notification slots for sync activity
///
/// Implemented by the UI layer; invoked from a forwarding task, never from
/// the watcher's own loop.
pub trait NotificationSink: Send + Sync {
    fn sync_flash(&self, message: &str);
    fn sync_error(&self, message: &str);
}

/// The single required operation of a concrete run strategy
pub trait RunStrategy {
    /// Drive the external agent through analysis and generation
    fn analyze_and_generate(
        &mut self,
        run: &mut RunController,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Controller options beyond the run identity
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Mirror generated scripts into a local workspace while the run is live
    pub enable_sync: bool,

    /// Parent directory for mirrored workspaces
    pub mirror_root: PathBuf,

    /// Debounce interval for the sync watcher
    pub debounce: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            enable_sync: false,
            mirror_root: PathBuf::from("scripts"),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Owns one run: its identity, message history, usage totals, and at most
/// one live sync session
pub struct RunController {
    identity: RunIdentity,
    pricing: Arc<PricingTable>,
    messages: MessageStore,
    options: RunOptions,
    usage: TokenUsage,
    cost: f64,
    watcher: Option<SyncWatcher>,
}

impl RunController {
    pub fn new(identity: RunIdentity, pricing: Arc<PricingTable>, options: RunOptions) -> Self {
        let messages = MessageStore::new(identity.messages_path());
        Self {
            identity,
            pricing,
            messages,
            options,
            usage: TokenUsage::default(),
            cost: 0.0,
            watcher: None,
        }
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Start mirroring generated scripts, if enabled
    ///
    /// Returns the allocated destination, or `None` when sync is disabled.
    /// A second call while a session is active is rejected; stop the active
    /// session first.
    pub fn start_sync(&mut self) -> Result<Option<PathBuf>, CoreError> {
        if !self.options.enable_sync {
            debug!("sync disabled; skipping");
            return Ok(None);
        }
        if self.watcher.is_some() {
            return Err(CoreError::SyncActive);
        }

        let scripts_dir = self.identity.scripts_dir();
        fs::create_dir_all(&scripts_dir).map_err(|source| CoreError::DirectoryCreate {
            path: scripts_dir.clone(),
            source,
        })?;

        let base_name = workspace::folder_name_from_goal(&self.identity.goal);
        let dest = workspace::get_available_directory(&self.options.mirror_root, &base_name)?;

        let mut watcher = SyncWatcher::new(
            scripts_dir,
            dest.clone(),
            SyncConfig {
                debounce: self.options.debounce,
                ..Default::default()
            },
        );
        watcher.start()?;

        info!(run_id = %self.identity.run_id, dest = %dest.display(), "sync started");
        self.watcher = Some(watcher);
        Ok(Some(dest))
    }

    /// Stop the active sync session, if any
    ///
    /// Teardown problems surface on the event bus, never to the caller; the
    /// held session is cleared unconditionally so calling this again is a
    /// safe no-op.
    pub fn stop_sync(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
            info!(run_id = %self.identity.run_id, "sync stopped");
        }
    }

    /// Snapshot of the active sync session, if any
    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.watcher.as_ref().map(|w| w.status())
    }

    /// Subscribe to the active sync session's events, if any
    pub fn sync_events(&self) -> Option<broadcast::Receiver<SyncEvent>> {
        self.watcher.as_ref().map(|w| w.events().subscribe())
    }

    /// Bridge sync events to a notification sink on a background task
    ///
    /// The forwarding task ends when the session's bus closes; a slow sink
    /// can lag the broadcast channel but never blocks the watcher.
    pub fn forward_notifications(
        &self,
        sink: Arc<dyn NotificationSink>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let mut rx = self.sync_events()?;
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => route_event(sink.as_ref(), event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        sink.sync_error(&format!("dropped {missed} sync notifications"));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Fold one usage report into the run totals; returns the running cost
    ///
    /// The report's own model wins; otherwise the run's configured model;
    /// otherwise the pricing table's fallback.
    pub fn record_usage(&mut self, model: Option<&str>, usage: &TokenUsage) -> f64 {
        self.usage += *usage;
        let model = model.or(self.identity.model.as_deref());
        self.cost += self.pricing.cost(model, usage);
        self.cost
    }

    pub fn total_usage(&self) -> &TokenUsage {
        &self.usage
    }

    pub fn total_cost(&self) -> f64 {
        self.cost
    }
}

fn route_event(sink: &dyn NotificationSink, event: SyncEvent) {
    match event {
        SyncEvent::Started { dest } => {
            sink.sync_flash(&format!("Syncing scripts to {}", dest.display()));
        }
        SyncEvent::PassCompleted { copied, removed } if copied + removed > 0 => {
            sink.sync_flash(&format!("Synced {copied} file(s), removed {removed}"));
        }
        SyncEvent::PassCompleted { .. } => {}
        SyncEvent::PassFailed(message) => sink.sync_error(&message),
        SyncEvent::WatchError(message) => sink.sync_error(&message),
        SyncEvent::Stopped => sink.sync_flash("Sync stopped"),
    }
}
