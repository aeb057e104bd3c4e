//! Append-only JSONL persistence for the agent conversation

use crate::error::CoreError;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Message history for one run, stored as line-delimited JSON
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message; creates the parent directory on first write
    pub fn append(&self, message: &Value) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| CoreError::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let line = serde_json::to_string(message).map_err(|source| CoreError::JsonParse {
            path: self.path.clone(),
            message: source.to_string(),
            source,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| CoreError::FileWrite {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| CoreError::FileWrite {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// Load the full history; a missing file is an empty history
    ///
    /// Malformed lines are skipped with a warning rather than failing the
    /// whole load.
    pub fn load(&self) -> Result<Vec<Value>, CoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&self.path).map_err(|source| CoreError::FileRead {
            path: self.path.clone(),
            source,
        })?;

        let mut messages = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => messages.push(value),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line_number = index + 1,
                        error = %e,
                        "skipping malformed message line"
                    );
                }
            }
        }
        Ok(messages)
    }
}
