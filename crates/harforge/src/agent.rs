//! External agent process driver
//!
//! Spawns the selected agent CLI in non-interactive streaming mode, persists
//! every stream-JSON line to the run's message history, and folds per-message
//! usage reports into the run's cost total. The agent itself is an opaque
//! collaborator; this module only moves its output.

use anyhow::{Context, Result};
use harforge_core::prompt::build_analysis_prompt;
use harforge_core::{RunController, RunStrategy, TokenUsage};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Drives one external agent invocation for a run
pub struct AgentProcess {
    binary: String,
    fresh: bool,
}

impl AgentProcess {
    pub fn new(binary: String, fresh: bool) -> Self {
        Self { binary, fresh }
    }
}

impl RunStrategy for AgentProcess {
    async fn analyze_and_generate(&mut self, run: &mut RunController) -> Result<()> {
        let prompt = build_analysis_prompt(run.identity(), self.fresh);

        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(&prompt)
            .args(["--output-format", "stream-json", "--verbose"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        if let Some(model) = run.identity().model.clone() {
            command.args(["--model", &model]);
        }

        let mut child = command.spawn().with_context(|| {
            format!("Failed to spawn agent '{}' (is it on PATH?)", self.binary)
        })?;
        let stdout = child
            .stdout
            .take()
            .context("Agent stdout was not captured")?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read agent output")? {
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "skipping non-JSON agent output line");
                    continue;
                }
            };

            run.messages().append(&message)?;

            if let Some((model, usage)) = extract_usage(&message) {
                let total = run.record_usage(model.as_deref(), &usage);
                debug!(tokens = usage.total(), cost = total, "usage recorded");
            }
        }

        let status = child.wait().await.context("Failed to await agent exit")?;
        anyhow::ensure!(status.success(), "Agent exited with {status}");
        Ok(())
    }
}

/// Pull the usage report out of an assistant message
///
/// Only `assistant` messages are counted; the final `result` message repeats
/// cumulative totals and would double-count.
fn extract_usage(message: &Value) -> Option<(Option<String>, TokenUsage)> {
    if message.get("type")?.as_str()? != "assistant" {
        return None;
    }
    let inner = message.get("message")?;
    let usage = serde_json::from_value(inner.get("usage")?.clone()).ok()?;
    let model = inner
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned);
    Some((model, usage))
}
