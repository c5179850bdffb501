//! JSON training report: a machine-readable record of what a run produced,
//! alongside the weights file itself.

use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::Path,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracerank_engine::Event;

#[derive(Debug, Serialize)]
pub struct TrainingReport {
    pub trained_at: DateTime<Utc>,
    pub max_cycles: u64,
    pub cycles_run: u64,
    pub worker_count: usize,
    pub stop_requested: bool,
    pub rank_total: u32,
    /// Name of the weights file this run wrote, if it trained.
    pub weights_file: Option<String>,
    pub events: Vec<EventReport>,
}

#[derive(Debug, Serialize)]
pub struct EventReport {
    pub event: String,
    pub winner: String,
    pub winner_rank: u32,
    /// All candidates, best sink first.
    pub candidates: Vec<CandidateReport>,
}

#[derive(Debug, Serialize)]
pub struct CandidateReport {
    pub name: String,
    pub sink: i64,
}

impl EventReport {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event: event.name().to_owned(),
            winner: event.winner().name().to_owned(),
            winner_rank: event.winner_rank(),
            candidates: event
                .ranked_candidates()
                .into_iter()
                .map(|candidate| CandidateReport {
                    name: candidate.name().to_owned(),
                    sink: candidate.sink(),
                })
                .collect(),
        }
    }
}

pub fn save(path: &Path, report: &TrainingReport) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating report file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .with_context(|| format!("writing report to '{}'", path.display()))?;
    writeln!(writer)?;
    Ok(())
}
