use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::protocol::TurnRecord;

/// Writes a JSON snapshot of the session before each turn, for offline audit.
/// One file per session, rewritten in place.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    path: PathBuf,
    session: String,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    session: &'a str,
    turns: &'a [TurnRecord],
    engine: serde_json::Value,
}

impl TraceWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create trace dir {}", dir.display()))?;
        let session = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let path = dir.join(format!("agenthost-trace-{session}.json"));
        Ok(Self { path, session })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, turns: &[TurnRecord], engine: serde_json::Value) -> Result<()> {
        let snapshot = Snapshot {
            session: &self.session,
            turns,
            engine,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
