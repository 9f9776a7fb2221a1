//! Files written for every run.
//!
//! Each run gets its own directory below [`Output::dir`](crate::config::Output::dir), named after
//! the start time of the run. It contains:
//!
//! - `outcomes.jsonl`: one JSON object per request outcome, if enabled
//! - `summary.json`: the terminal summary of the run

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rangebench_engine::{RequestOutcome, ResultPersistence, TerminalSummary};

/// Creates a fresh directory for a run below `base`.
pub fn create_run_dir(base: &Path) -> Result<PathBuf> {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let dir = base.join(format!("run-{started}"));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    Ok(dir)
}

/// Writes request outcomes as JSON lines.
#[derive(Debug)]
pub struct JsonLines<W: Write> {
    writer: BufWriter<W>,
}

impl JsonLines<File> {
    /// Creates `path`, replacing an existing file.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> JsonLines<W> {
    /// Writes to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> ResultPersistence for JsonLines<W> {
    fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()> {
        for outcome in batch {
            serde_json::to_writer(&mut self.writer, outcome)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Writes the summary as pretty-printed JSON to `path`.
pub fn write_summary(path: &Path, summary: &TerminalSummary) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create summary file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
