use crate::ban_list::BanList;
use crate::config::FilterConfig;
use crate::event_log::{EventKind, EventLog, EventLogError, ResumeMarker};
use crate::filter::{self, Candidate, ShardStart};
use crate::output::Settlement;
use crate::shard::ReaderConfig;
use crate::thumbnail::{ThumbnailResolver, VerificationTarget};
use crate::verify::{Verdict, VerifyError, VisualVerifier};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{warn, Level};

/// A candidate together with the outcome of verifying it
#[derive(Debug)]
pub struct Verified {
    pub candidate: Candidate,
    /// URL whose pixels were checked, when one was resolved
    pub checked_url: Option<String>,
    pub result: Result<Verdict, VerifyError>,
    pub elapsed: Duration,
}

/// Predicate chain, verification collaborators and the run's event log.
/// WHY: everything a scan worker or verification task needs, shared behind one `Arc`
pub struct FilterPipeline {
    config: FilterConfig,
    reader_config: ReaderConfig,
    ban_list: Arc<BanList>,
    verifier: Arc<dyn VisualVerifier>,
    resolver: Arc<dyn ThumbnailResolver>,
    log: Arc<EventLog>,
}

impl FilterPipeline {
    pub fn new(
        config: FilterConfig,
        ban_list: BanList,
        verifier: Arc<dyn VisualVerifier>,
        resolver: Arc<dyn ThumbnailResolver>,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            config,
            reader_config: ReaderConfig::default(),
            ban_list: Arc::new(ban_list),
            verifier,
            resolver,
            log,
        }
    }

    pub fn with_reader_config(mut self, reader_config: ReaderConfig) -> Self {
        self.reader_config = reader_config;
        self
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn reader_config(&self) -> &ReaderConfig {
        &self.reader_config
    }

    pub fn ban_list(&self) -> Arc<BanList> {
        self.ban_list.clone()
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Work out where each shard's scan starts, locating the resume marker if there is one
    pub fn plan_shards(&self, shards: &[PathBuf], resume: Option<&ResumeMarker>) -> Result<Vec<ShardStart>> {
        let Some(marker) = resume else {
            return Ok(vec![ShardStart::From(0); shards.len()]);
        };
        let position = filter::locate_marker(shards, &marker.url, &self.reader_config)?;
        match position {
            Some(position) => self.log.record(
                EventKind::MatchResume,
                format!(
                    "Resuming {} (shard {}, row {})",
                    marker,
                    position.shard + 1,
                    position.row + 1
                ),
                Some(EventKind::Init),
                Level::INFO,
            ),
            None => {
                warn!("Resume URL {} not found in any shard", marker.url);
                self.log.warn(
                    EventKind::MatchResume,
                    format!("Resume URL never appeared, skipping every row: {}", marker.url),
                );
            }
        }
        Ok(filter::shard_starts(shards.len(), marker, position))
    }

    /// Resolve the candidate's verification URL and check it, within `timeout`
    pub async fn verify_candidate(&self, candidate: Candidate, timeout: Duration) -> Verified {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.resolve_and_verify(&candidate)).await;
        let (checked_url, result) = match outcome {
            Ok((url, result)) => (url, result),
            Err(_) => (
                None,
                Err(VerifyError::Timeout {
                    url: candidate.image_url.clone(),
                }),
            ),
        };
        Verified {
            candidate,
            checked_url,
            result,
            elapsed: started.elapsed(),
        }
    }

    async fn resolve_and_verify(&self, candidate: &Candidate) -> (Option<String>, Result<Verdict, VerifyError>) {
        let url = match &candidate.target {
            VerificationTarget::Original(url) | VerificationTarget::Thumbnail(url) => url.clone(),
            VerificationTarget::Lookup { width } => {
                match self.resolver.resolve(&candidate.image_url, *width).await {
                    Ok(url) => {
                        self.log.add(
                            EventKind::ThumbLookup,
                            format!("{} -> {}", candidate.image_url, url),
                        );
                        url
                    }
                    Err(e) => return (None, Err(e)),
                }
            }
        };
        let result = self.verifier.verify(&url).await;
        (Some(url), result)
    }

    /// Log a finished verification and update the breaker.
    ///
    /// Returns the settlement to commit, or the breaker error once too many candidates
    /// in a row have failed.
    pub fn settle(&self, verified: Verified) -> Result<Settlement, EventLogError> {
        let log = &self.log;
        let Verified {
            candidate,
            checked_url,
            result,
            elapsed,
        } = verified;
        let url = candidate.image_url.as_str();

        log.record_timed(EventKind::PngDone, url, elapsed, Level::DEBUG);
        if let Some(mean) = log.report(log.mean_duration(EventKind::AverageTime, &[elapsed])) {
            log.record_timed(
                EventKind::AverageTime,
                format!("mean {:.4}s", mean.as_secs_f64()),
                elapsed,
                Level::DEBUG,
            );
        }

        let accepted = match result {
            Ok(verdict) => {
                let checked = checked_url.as_deref().unwrap_or(url);
                if verdict.accepted() {
                    log.add(EventKind::ConfAlpha, checked);
                } else if verdict.has_four_channels {
                    log.add(EventKind::ConfAlphaNeg, checked);
                } else {
                    log.add(EventKind::DirectAlphaNeg, checked);
                }
                log.succeed();
                verdict.accepted()
            }
            Err(err) => {
                match &err {
                    VerifyError::NotFound { .. } => log.warn(
                        EventKind::BanUrl,
                        format!("Add to banned URLs (status code 404): {url}"),
                    ),
                    other => log.error(
                        EventKind::UrlException,
                        format!(
                            "{url}: {other}{}",
                            if other.is_recoverable() { "" } else { " (unexpected)" }
                        ),
                    ),
                }
                log.fail(&err)?;
                false
            }
        };

        Ok(Settlement {
            seq: candidate.seq,
            image_url: candidate.image_url,
            accepted: accepted.then_some(candidate.row),
        })
    }
}
