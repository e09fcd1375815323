use crate::event_log::ResumeMarker;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// MIME type of the rows the pipeline keeps
pub const TARGET_MIME: &str = "image/png";
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 100;
pub const DEFAULT_MIN_SIZE: u32 = 1000;
/// Zero disables the upper bound
pub const DEFAULT_MAX_SIZE: u32 = 0;

/// Invalid run configuration, detected before any shard is read
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("got both resume_at ({at}) and resume_after ({after}); pass only one")]
    BothResumeModes { at: String, after: String },
    #[error("no TSV shards to filter")]
    NoShards,
    #[error("{name} must be at least 1")]
    ZeroLimit { name: &'static str },
    #[error("invalid shard pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Structural predicate settings
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub target_mime: String,
    /// Widths above this are verified through a thumbnail of this width
    pub thumbnail_width: u32,
    /// Minimum of width and height must reach this (0 disables)
    pub min_size: u32,
    /// Maximum of width and height must not exceed this (0 disables)
    pub max_size: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            target_mime: TARGET_MIME.to_string(),
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Concurrency settings for scanning and verification
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Shards scanned at once
    pub workers: usize,
    /// Verification requests in flight at once
    pub max_in_flight: usize,
    /// Upper bound on a single candidate's verification
    pub request_timeout: Duration,
    pub show_progress: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            max_in_flight: 20,
            request_timeout: Duration::from_secs(10),
            show_progress: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroLimit { name: "workers" });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "max_in_flight",
            });
        }
        Ok(())
    }
}

/// Inputs and outputs of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Shards in dataset order
    pub shards: Vec<PathBuf>,
    pub output: PathBuf,
    pub resume: Option<ResumeMarker>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards.is_empty() {
            return Err(ConfigError::NoShards);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.target_mime, "image/png");
        assert_eq!(config.thumbnail_width, 100);
        assert_eq!(config.min_size, 1000);
        assert_eq!(config.max_size, 0);
    }

    #[test]
    fn test_orchestrator_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let config = OrchestratorConfig {
            max_in_flight: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                name: "max_in_flight"
            })
        );
    }

    #[test]
    fn test_run_requires_shards() {
        let run = RunConfig {
            shards: Vec::new(),
            output: PathBuf::from("out.tsv"),
            resume: None,
        };
        assert_eq!(run.validate(), Err(ConfigError::NoShards));
    }
}
