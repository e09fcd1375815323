// Output and log file naming, plus the single in-order writer of accepted rows

use crate::event_log::{EventKind, EventLog};
use crate::row::{self, Row};
use crate::shard::strip_gz;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const OUTPUT_SUFFIX: &str = "_PNGs_with_alpha.tsv";

/// Default output path for a set of shards.
/// WHY: a single shard keeps its full stem; several shards share the stem prefix
/// before the first '-' (`wit_v1.train.all-00000-of-00010` -> `wit_v1.train.all`)
pub fn output_path_for(shards: &[PathBuf]) -> Result<PathBuf> {
    let Some(first) = shards.first() else {
        bail!("No shards to name the output after");
    };
    let plain = strip_gz(first);
    let stem = plain
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("wit");
    let stem = if shards.len() > 1 {
        stem.split('-').next().unwrap_or(stem)
    } else {
        stem
    };
    let dir = plain.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("{stem}{OUTPUT_SUFFIX}")))
}

/// Log file path for an output file
pub fn log_path_for(output: &Path, log_dir: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("wikitransp");
    log_dir.join(format!("{stem}.log"))
}

/// Open the output for writing. Resumed runs append to an existing non-empty file;
/// everything else starts fresh. Returns the file and whether it needs a header.
pub fn open_output(path: &Path, resuming: bool) -> Result<(File, bool)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if resuming && has_content {
        info!("Appending to existing output {}", path.display());
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        return Ok((file, false));
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok((file, true))
}

/// Verification result of one candidate, ready to commit
#[derive(Debug, Clone)]
pub struct Settlement {
    pub seq: usize,
    pub image_url: String,
    /// The row to write, if it was accepted
    pub accepted: Option<Row>,
}

/// Writes accepted rows strictly in input order, whatever order settlements arrive in.
///
/// Each committed settlement is logged as `CheckPng ⠶ (n) @ <url>`, and each written row
/// as a `WriteRow` timed from that check, which is what the resume suggestion reads.
pub struct OrderedWriter<W: Write> {
    writer: csv::Writer<W>,
    log: Arc<EventLog>,
    next_seq: usize,
    pending: BTreeMap<usize, Settlement>,
    written: u64,
}

impl<W: Write> OrderedWriter<W> {
    pub fn new(inner: W, write_header: bool, log: Arc<EventLog>) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .terminator(csv::Terminator::Any(b'\n'))
            .flexible(true)
            .from_writer(inner);
        if write_header {
            writer.write_record(&row::header())?;
            writer.flush()?;
        }
        Ok(Self {
            writer,
            log,
            next_seq: 0,
            pending: BTreeMap::new(),
            written: 0,
        })
    }

    /// Buffer a settlement and commit every settlement that is now next in order.
    /// Returns how many were committed.
    pub fn push(&mut self, settlement: Settlement) -> Result<usize> {
        self.pending.insert(settlement.seq, settlement);
        let mut committed = 0;
        while let Some(settlement) = self.pending.remove(&self.next_seq) {
            self.commit(settlement)?;
            self.next_seq += 1;
            committed += 1;
        }
        Ok(committed)
    }

    fn commit(&mut self, settlement: Settlement) -> Result<()> {
        let url = settlement.image_url;
        self.log
            .add(EventKind::CheckPng, format!("({}) @ {}", settlement.seq + 1, url));
        if let Some(row) = settlement.accepted {
            self.writer.write_record(row.record())?;
            // WHY: an interrupted run must leave only whole rows behind
            self.writer.flush()?;
            self.written += 1;
            self.log.add_since(EventKind::WriteRow, url, EventKind::CheckPng);
        }
        Ok(())
    }

    /// Settlements waiting for a predecessor
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the inner writer; settlements still pending are dropped
    pub fn finish(mut self) -> Result<W> {
        if !self.pending.is_empty() {
            debug!(
                "Dropping {} settlements waiting on row {}",
                self.pending.len(),
                self.next_seq + 1
            );
        }
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush output: {}", e.error()))
    }
}
