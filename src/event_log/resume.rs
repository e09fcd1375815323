use crate::config::ConfigError;
use crate::reverse_lines::{ReverseLines, ScanOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

/// Marker written into the log ahead of every resume suggestion
pub const RESUME_POINT_TAG: &str = "ResumePoint ⠶ ";

const SUGGESTION_LEAD: &str = "You may want to resume ";
const URL_LEAD: &str = " the last URL: ";

/// Whether the row carrying the marker URL is processed again on resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeMode {
    /// Re-process the marker row
    At,
    /// Skip the marker row and continue with the next one
    After,
}

impl ResumeMode {
    pub fn keyword(self) -> &'static str {
        match self {
            ResumeMode::At => "AT",
            ResumeMode::After => "AFTER",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "AT" => Some(ResumeMode::At),
            "AFTER" => Some(ResumeMode::After),
            _ => None,
        }
    }
}

/// Image URL plus mode telling the pipeline where to pick up again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMarker {
    pub url: String,
    pub mode: ResumeMode,
}

impl ResumeMarker {
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: ResumeMode::At,
        }
    }

    pub fn after(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: ResumeMode::After,
        }
    }

    /// Build a marker from the two mutually exclusive CLI flags
    pub fn from_flags(
        resume_at: Option<String>,
        resume_after: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        match (resume_at, resume_after) {
            (Some(at), Some(after)) => Err(ConfigError::BothResumeModes { at, after }),
            (Some(at), None) => Ok(Some(Self::at(at))),
            (None, Some(after)) => Ok(Some(Self::after(after))),
            (None, None) => Ok(None),
        }
    }

    /// Message body of the `ResumePoint` record
    pub fn suggestion(&self) -> String {
        format!("{SUGGESTION_LEAD}{}{URL_LEAD}{}", self.mode.keyword(), self.url)
    }

    /// Parse a log line carrying a resume suggestion, whatever precedes the tag
    pub fn parse_log_line(line: &str) -> Option<Self> {
        let (_, rest) = line.split_once(RESUME_POINT_TAG)?;
        let rest = rest.trim_end().strip_prefix(SUGGESTION_LEAD)?;
        let (keyword, url) = rest.split_once(URL_LEAD)?;
        let mode = ResumeMode::from_keyword(keyword)?;
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            mode,
        })
    }
}

impl fmt::Display for ResumeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mode.keyword(), self.url)
    }
}

/// Recover the most recent resume suggestion from a previous run's log.
/// WHY: must run before the log is rotated, otherwise the previous log has moved to `.1`
pub fn recover_resume_point(log_path: &Path, chunk_size: usize) -> Result<Option<ResumeMarker>> {
    if !log_path.exists() {
        debug!("No previous log at {}, nothing to resume", log_path.display());
        return Ok(None);
    }
    let file = File::open(log_path)
        .with_context(|| format!("Failed to open previous log {}", log_path.display()))?;
    let options = ScanOptions::matching(RESUME_POINT_TAG).with_chunk_size(chunk_size);
    let lines = ReverseLines::new(file, options)
        .with_context(|| format!("Failed to scan {}", log_path.display()))?;

    for line in lines {
        let line = line.with_context(|| format!("Failed to read {}", log_path.display()))?;
        match ResumeMarker::parse_log_line(&line) {
            Some(marker) => {
                info!("Recovered resume point {} from {}", marker, log_path.display());
                return Ok(Some(marker));
            }
            None => warn!("Ignoring malformed resume line: {}", line.trim_end()),
        }
    }
    debug!("No resume point recorded in {}", log_path.display());
    Ok(None)
}
