use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use drillroom_schema::Message;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// JSONL line types of an archived transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveEntry {
    Session {
        version: u32,
        session_id: String,
        started_at: DateTime<Utc>,
        duration_sec: u64,
    },
    Message {
        message: Message,
    },
}

/// Append-only per-session JSONL files under one directory.
#[derive(Debug, Clone)]
pub struct TranscriptArchive {
    dir: PathBuf,
}

impl TranscriptArchive {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Truncates any previous file for the id and writes the header line.
    pub async fn start_session(
        &self,
        session_id: &str,
        started_at: DateTime<Utc>,
        duration_sec: u64,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating archive dir {}", self.dir.display()))?;
        let path = self.session_path(session_id);
        let entry = ArchiveEntry::Session {
            version: 1,
            session_id: session_id.to_owned(),
            started_at,
            duration_sec,
        };
        let line = serde_json::to_string(&entry)?;
        tokio::fs::write(&path, format!("{line}\n"))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub async fn append(&self, message: &Message) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.session_path(&message.session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let line = serde_json::to_string(&ArchiveEntry::Message {
            message: message.clone(),
        })?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Archived messages of a session; unparsable lines are skipped.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let mut messages = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArchiveEntry>(line) {
                Ok(ArchiveEntry::Message { message }) => messages.push(message),
                Ok(ArchiveEntry::Session { .. }) => {}
                Err(error) => warn!(line = index + 1, %error, "failed to parse archive line"),
            }
        }
        Ok(messages)
    }

    /// Returns true if a file was removed.
    pub async fn remove_session(&self, session_id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
