//! Offline helpers behind the `firemap` binary.

use std::path::Path;
use std::sync::Arc;

use formats::{SnapshotPayload, ValidatedSnapshot};
use runtime::{MarkerEvent, MetricsSnapshot};
use scene::MarkerState;
use serde::Serialize;
use serde_json::Value;
use streaming::{ChannelSource, RecordingRenderer, SyncConfig, SyncController};

/// Parses newline-delimited snapshots. Blank lines are skipped.
pub fn parse_snapshot_lines(text: &str) -> Result<Vec<Value>, String> {
    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|e| format!("line {}: {e}", n + 1))?;
        out.push(value);
    }
    Ok(out)
}

pub fn read_snapshot_lines(path: &Path) -> Result<Vec<Value>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("read {path:?}: {e}"))?;
    parse_snapshot_lines(&text)
}

/// Loads `path` if given, otherwise defaults, then applies `FIREMAP_*`
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, String> {
    let mut config = match path {
        Some(path) => SyncConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => SyncConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub events: Vec<MarkerEvent>,
    pub markers: Vec<MarkerState>,
    pub metrics: MetricsSnapshot,
}

/// Feeds every snapshot through a controller, waiting for each one to be
/// reconciled before pushing the next.
pub async fn replay(config: &SyncConfig, snapshots: Vec<Value>) -> Result<ReplayOutcome, String> {
    let renderer = Arc::new(RecordingRenderer::new());
    let source = ChannelSource::new();
    let handle = SyncController::new(config, renderer.clone())
        .map_err(|e| e.to_string())?
        .start(Box::new(source.clone()))
        .map_err(|e| e.to_string())?;

    for snapshot in snapshots {
        handle.on_snapshot(snapshot);
        handle.synced().await;
    }

    let markers = handle.markers();
    let metrics = handle.metrics().snapshot();
    handle.stop().await;

    Ok(ReplayOutcome {
        events: renderer.drain(),
        markers,
        metrics,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedLine {
    pub id: String,
    pub reason: String,
}

impl From<ValidatedSnapshot> for ValidationReport {
    fn from(snapshot: ValidatedSnapshot) -> Self {
        Self {
            accepted: snapshot.records.into_keys().collect(),
            rejected: snapshot
                .rejected
                .into_iter()
                .map(|r| RejectedLine {
                    id: r.id,
                    reason: r.error.to_string(),
                })
                .collect(),
        }
    }
}

pub fn validate_snapshot_text(text: &str) -> Result<ValidationReport, String> {
    let payload = SnapshotPayload::from_json_str(text).map_err(|e| e.to_string())?;
    Ok(payload.validate().into())
}
