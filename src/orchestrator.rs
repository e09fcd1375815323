use crate::config::{OrchestratorConfig, RunConfig};
use crate::event_log::{EventKind, ResumeMarker, RunSummary};
use crate::filter::{self, ShardScan, ShardStart, ShardStats};
use crate::output::{self, OrderedWriter};
use crate::pipeline::FilterPipeline;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Level};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Run statistics, written as JSON with `--stats-out`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub output: PathBuf,
    pub shards: Vec<ShardStats>,
    pub cross_shard_duplicates: u64,
    pub candidates: u64,
    /// Candidates whose verification finished, whatever the result
    pub verified: u64,
    pub written: u64,
    pub resume: Option<ResumeMarker>,
    pub summary: Option<RunSummary>,
    pub run_time_ms: u64,
}

/// Drives a run: parallel shard scans, bounded concurrent verification, ordered output
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    fn progress_bar(&self, len: u64, message: &'static str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(message);
        bar
    }

    /// Run the pipeline over `run.shards` until completion or until `shutdown` resolves.
    ///
    /// Interruption is not an error: the log halts with a resume suggestion and the
    /// report says `Interrupted`. Tripping the failure breaker is an error.
    pub async fn run<F>(&self, pipeline: Arc<FilterPipeline>, run: &RunConfig, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        run.validate()?;
        let started = Instant::now();
        let log = pipeline.log().clone();
        log.begin();
        if let Some(marker) = &run.resume {
            // WHY: a halt before the first commit must still hand this marker on
            log.carry_resume(marker.clone());
        }
        tokio::pin!(shutdown);

        let starts = pipeline.plan_shards(&run.shards, run.resume.as_ref())?;
        let halt = Arc::new(AtomicBool::new(false));

        let scans = tokio::select! {
            biased;
            _ = &mut shutdown => {
                halt.store(true, Ordering::Relaxed);
                None
            }
            scans = self.scan_all(&pipeline, &run.shards, starts, &halt) => Some(scans?),
        };
        let Some(scans) = scans else {
            warn!("Interrupted while scanning shards");
            return Ok(self.interrupted(&pipeline, run, Vec::new(), 0, 0, 0, 0, started));
        };
        if scans.iter().any(|scan| scan.interrupted) {
            let stats = scans.into_iter().map(|scan| scan.stats).collect();
            return Ok(self.interrupted(&pipeline, run, stats, 0, 0, 0, 0, started));
        }

        let shard_stats: Vec<ShardStats> = scans.iter().map(|scan| scan.stats.clone()).collect();
        let (candidates, cross_shard_duplicates) = filter::merge_scans(scans);
        let candidate_count = candidates.len() as u64;
        log.record(
            EventKind::PreVerify,
            format!(
                "Verifying {} candidates ({} cross-shard duplicates dropped), at most {} in flight",
                candidate_count, cross_shard_duplicates, self.config.max_in_flight
            ),
            Some(EventKind::Init),
            Level::INFO,
        );

        let (file, write_header) = output::open_output(&run.output, run.resume.is_some())?;
        let mut writer = OrderedWriter::new(file, write_header, log.clone())?;
        let progress = self.progress_bar(candidate_count, "Verifying");
        let timeout = self.config.request_timeout;

        let verifications = stream::iter(candidates)
            .map(|candidate| {
                let pipeline = pipeline.clone();
                async move { pipeline.verify_candidate(candidate, timeout).await }
            })
            .buffer_unordered(self.config.max_in_flight);
        tokio::pin!(verifications);

        let mut verified = 0u64;
        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    interrupted = true;
                    break;
                }
                next = verifications.next() => {
                    let Some(result) = next else { break };
                    verified += 1;
                    progress.inc(1);
                    let settlement = match pipeline.settle(result) {
                        Ok(settlement) => settlement,
                        Err(err) => {
                            progress.abandon();
                            writer.finish()?;
                            return Err(err).context("Verification failing repeatedly, run halted");
                        }
                    };
                    writer.push(settlement)?;
                }
            }
        }

        let written = writer.written();
        writer.finish()?;
        if interrupted {
            progress.abandon();
            warn!("Interrupted with {} of {} candidates verified", verified, candidate_count);
            return Ok(self.interrupted(
                &pipeline,
                run,
                shard_stats,
                cross_shard_duplicates,
                candidate_count,
                verified,
                written,
                started,
            ));
        }
        progress.finish_and_clear();

        let ending = log.complete();
        info!(
            "Wrote {} of {} candidates to {} in {:.2}s",
            written,
            candidate_count,
            run.output.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(RunReport {
            outcome: RunOutcome::Completed,
            output: run.output.clone(),
            shards: shard_stats,
            cross_shard_duplicates,
            candidates: candidate_count,
            verified,
            written,
            resume: None,
            summary: ending.map(|e| e.summary),
            run_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn interrupted(
        &self,
        pipeline: &FilterPipeline,
        run: &RunConfig,
        shards: Vec<ShardStats>,
        cross_shard_duplicates: u64,
        candidates: u64,
        verified: u64,
        written: u64,
        started: Instant,
    ) -> RunReport {
        let ending = pipeline.log().halt();
        let (resume, summary) = match ending {
            Some(ending) => (ending.resume, Some(ending.summary)),
            None => (None, None),
        };
        RunReport {
            outcome: RunOutcome::Interrupted,
            output: run.output.clone(),
            shards,
            cross_shard_duplicates,
            candidates,
            verified,
            written,
            resume,
            summary,
            run_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Scan every shard on the blocking pool, at most `workers` at a time
    async fn scan_all(
        &self,
        pipeline: &Arc<FilterPipeline>,
        shards: &[PathBuf],
        starts: Vec<ShardStart>,
        halt: &Arc<AtomicBool>,
    ) -> Result<Vec<ShardScan>> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let progress = self.progress_bar(shards.len() as u64, "Scanning shards");
        let mut handles = Vec::with_capacity(shards.len());

        for (index, (path, start)) in shards.iter().zip(starts).enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let path = path.clone();
            let pipeline = pipeline.clone();
            let halt = halt.clone();
            let progress = progress.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let scan = filter::scan_shard(
                    index,
                    &path,
                    start,
                    pipeline.config(),
                    &pipeline.ban_list(),
                    pipeline.reader_config(),
                    &halt,
                );
                progress.inc(1);
                scan
            }));
        }

        let mut scans = Vec::with_capacity(handles.len());
        for handle in handles {
            let scan = match handle.await? {
                Ok(scan) => scan,
                Err(e) => {
                    // WHY: stop the remaining workers before reporting the failure
                    halt.store(true, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let log = pipeline.log();
            log.record_timed(
                EventKind::ScanShard,
                format!(
                    "{}: {} rows, {} candidates",
                    scan.stats.path, scan.stats.rows_read, scan.stats.candidates
                ),
                std::time::Duration::from_millis(scan.stats.scan_time_ms),
                Level::INFO,
            );
            debug!("Collected shard {} scan", scan.shard + 1);
            scans.push(scan);
        }
        progress.finish_and_clear();
        Ok(scans)
    }
}
