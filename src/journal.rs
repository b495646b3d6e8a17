use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::access::Verdict;

/// Append-only CSV of final decisions.
pub struct DecisionJournal<W: Write> {
    writer: Mutex<Writer<W>>,
}

impl DecisionJournal<std::fs::File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fresh = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open decision journal {}", path.display()))?;

        Self::new(file, fresh)
    }
}

impl<W: Write> DecisionJournal<W> {
    pub fn new(sink: W, write_header: bool) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(sink);

        if write_header {
            writer.write_record(["timestamp", "frame", "plate", "credential", "decision"])?;
            writer.flush()?;
        }

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn record(&self, frame_index: u64, verdict: &Verdict) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();

        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.write_record(&[
            timestamp.to_string(),
            frame_index.to_string(),
            verdict.plate.to_string(),
            verdict.credential.clone().unwrap_or_default(),
            verdict.decision.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        let writer = match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush journal: {}", e.error()))
    }
}
