//! Error types for harforge-core
//!
//! Sync failures are recovered locally and surfaced as events; the variants
//! here cover the conditions a caller must handle.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for harforge operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove mirrored entry: {path}")]
    MirrorRemove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===================
    // Parse Errors
    // ===================
    #[error("Failed to parse JSON in {path}: {message}")]
    JsonParse {
        path: PathBuf,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Watch Errors
    // ===================
    #[error("File watcher error: {message}")]
    WatchError {
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    #[error("Sync watcher is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("A sync session is already active; stop it before starting another")]
    SyncActive,

    // ===================
    // Workspace Errors
    // ===================
    #[error("No free workspace directory for '{base_name}' under {parent} after {attempts} attempts")]
    WorkspaceExhausted {
        parent: PathBuf,
        base_name: String,
        attempts: u32,
    },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid pricing table: {message}")]
    InvalidPricing { message: String },
}
