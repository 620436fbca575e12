use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::models::Event;

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedEvents {
    pub events: Vec<Event>,
    pub skipped_lines: usize,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every event in file order. Blank and undecodable lines are
    /// skipped; a missing file is an empty log.
    pub async fn load(&self) -> anyhow::Result<LoadedEvents> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Event log not found, treating as empty");
                return Ok(LoadedEvents::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read event log {}", self.path.display()))
            }
        };

        Ok(decode_lines(&content))
    }

    pub async fn append(&self, event: &Event) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event).context("failed to encode event")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(path = %self.path.display(), kind = ?event.kind, "Appended event");
        Ok(())
    }
}

pub fn decode_lines(content: &str) -> LoadedEvents {
    let mut loaded = LoadedEvents::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => loaded.events.push(event),
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "Skipping malformed event line");
                loaded.skipped_lines += 1;
            }
        }
    }

    loaded
}
