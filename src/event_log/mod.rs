//! Typed run log with relative timing, per-kind aggregation and a consecutive-failure
//! circuit breaker.
//!
//! Every record is kept in memory per [`EventKind`] (for durations and the summary) and
//! emitted through `tracing` under the [`EVENT_TARGET`] target, which is what ends up in
//! the run's log file and what resume recovery later scans.

mod event;
mod kind;
pub mod resume;
mod summary;

pub use event::{Event, SEPARATOR};
pub use kind::EventKind;
pub use resume::{recover_resume_point, ResumeMarker, ResumeMode, RESUME_POINT_TAG};
pub use summary::{format_elapsed, KindSummary, RunSummary};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Level;

/// `tracing` target every event record is emitted under
pub const EVENT_TARGET: &str = "wikitransp::events";

/// Prefix written ahead of each rendered record
const DEFAULT_PREFIX: &str = "    ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventLogError {
    #[error("no {0} event has been recorded")]
    NotFound(EventKind),
    #[error("last {first} event took place after the last {second} event")]
    NotOrdered { first: EventKind, second: EventKind },
    #[error("no durations recorded for {0}")]
    NoSamples(EventKind),
    #[error(
        "mis-specified timer: {since} (ordinal {}) is declared after {kind} (ordinal {})",
        .since.ordinal(),
        .kind.ordinal()
    )]
    MisorderedSince { kind: EventKind, since: EventKind },
    #[error("hit the maximum number of consecutive failures ({limit})")]
    MaxConsecutiveFailures { limit: u32 },
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Init,
    Running,
    Completed,
    Halted,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Halted)
    }
}

/// Source of timestamps for recorded events
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to, for deterministic durations in tests
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Configuration for an [`EventLog`]
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Consecutive failures tolerated before the run halts
    pub fail_limit: u32,
    /// Kinds to record; empty records everything
    pub filter: Vec<EventKind>,
    /// Render durations as `in Ns` rather than `Ns since Kind`
    pub simple: bool,
    /// Log file named in the run-level messages
    pub log_file: Option<PathBuf>,
    /// Level for records that don't specify one
    pub level: Level,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            fail_limit: 10,
            filter: Vec::new(),
            simple: true,
            log_file: None,
            level: Level::DEBUG,
        }
    }
}

/// What a terminal transition leaves behind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEnding {
    pub summary: RunSummary,
    /// Where a follow-up run should pick up (halted runs only)
    pub resume: Option<ResumeMarker>,
}

struct LogState {
    events: [Vec<Event>; EventKind::COUNT],
    next_seq: u64,
    /// Running (seconds, samples) of each kind's recorded durations
    duration_totals: [(f64, u64); EventKind::COUNT],
    consecutive_failures: u32,
    phase: RunPhase,
    /// Marker this run resumed from, suggested again until a row is settled
    carried_resume: Option<ResumeMarker>,
}

/// Append-only, internally synchronised record of a run's events.
/// WHY: shared as `Arc<EventLog>` by scanners, verifiers and the writer, so every
/// operation takes `&self` and state updates happen under one lock
pub struct EventLog {
    config: EventLogConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LogState>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish()
    }
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a log and record its `Init` event
    pub fn with_clock(config: EventLogConfig, clock: Arc<dyn Clock>) -> Self {
        let log = Self {
            config,
            clock,
            state: Mutex::new(LogState {
                events: std::array::from_fn(|_| Vec::new()),
                next_seq: 0,
                duration_totals: [(0.0, 0); EventKind::COUNT],
                consecutive_failures: 0,
                phase: RunPhase::Init,
                carried_resume: None,
            }),
        };
        log.add(EventKind::Init, "");
        log
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // WHY: a panic elsewhere must not take the log down with it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.state().phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    pub fn is_recorded(&self, kind: EventKind) -> bool {
        self.config.filter.is_empty() || self.config.filter.contains(&kind)
    }

    /// Record at the configured default level
    pub fn add(&self, kind: EventKind, message: impl Into<String>) {
        self.record(kind, message, None, self.config.level);
    }

    /// Record at the default level, timed from the last `since` event
    pub fn add_since(&self, kind: EventKind, message: impl Into<String>, since: EventKind) {
        self.record(kind, message, Some(since), self.config.level);
    }

    pub fn warn(&self, kind: EventKind, message: impl Into<String>) {
        self.record(kind, message, None, Level::WARN);
    }

    pub fn error(&self, kind: EventKind, message: impl Into<String>) {
        self.record(kind, message, None, Level::ERROR);
    }

    /// Append an event, timed from the last `since` event when given.
    ///
    /// A `since` kind declared after `kind` is a usage error: it is reported as an
    /// `InternalLogException` and nothing is appended. A `since` kind with no events yet
    /// still appends, without a duration.
    pub fn record(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        since: Option<EventKind>,
        level: Level,
    ) {
        if let Some(since) = since {
            if since.ordinal() > kind.ordinal() {
                self.report_error(EventLogError::MisorderedSince { kind, since });
                return;
            }
        }
        self.push(kind, message.into(), since, None, level);
    }

    /// Append an event carrying an explicitly measured duration
    pub fn record_timed(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        duration: Duration,
        level: Level,
    ) {
        self.push(kind, message.into(), None, Some(duration), level);
    }

    fn push(
        &self,
        kind: EventKind,
        message: String,
        since: Option<EventKind>,
        explicit: Option<Duration>,
        level: Level,
    ) {
        if !self.is_recorded(kind) {
            return;
        }
        let when = self.clock.now();
        let (event, missing_since) = {
            let mut state = self.state();
            let mut missing_since = None;
            let duration = match since {
                Some(since) => match state.events[since.ordinal()].last() {
                    Some(previous) => Some(when.saturating_duration_since(previous.when)),
                    None => {
                        missing_since = Some(since);
                        None
                    }
                },
                None => explicit,
            };
            if let Some(duration) = duration {
                let totals = &mut state.duration_totals[kind.ordinal()];
                totals.0 += duration.as_secs_f64();
                totals.1 += 1;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let event = Event {
                kind,
                when,
                seq,
                message,
                since,
                duration,
            };
            state.events[kind.ordinal()].push(event.clone());
            (event, missing_since)
        };
        // WHY: emit and report outside the lock; reporting records again
        self.emit(level, DEFAULT_PREFIX, &event);
        if let Some(since) = missing_since {
            self.report_error(EventLogError::NotFound(since));
        }
    }

    fn emit(&self, level: Level, prefix: &str, event: &Event) {
        let rendered = event.render(self.config.simple);
        for line in rendered.lines() {
            emit_line(level, &format!("{prefix}{line}"));
        }
    }

    fn report_error(&self, err: EventLogError) {
        self.record(
            EventKind::InternalLogException,
            err.to_string(),
            None,
            Level::ERROR,
        );
    }

    /// Unwrap a query result, turning an error into an `InternalLogException` record
    pub fn report<T>(&self, result: Result<T, EventLogError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.report_error(err);
                None
            }
        }
    }

    pub fn has_event(&self, kind: EventKind) -> bool {
        !self.state().events[kind.ordinal()].is_empty()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.state().events[kind.ordinal()].len()
    }

    pub fn events(&self, kind: EventKind) -> Vec<Event> {
        self.state().events[kind.ordinal()].clone()
    }

    pub fn last_event(&self, kind: EventKind) -> Result<Event, EventLogError> {
        self.state().events[kind.ordinal()]
            .last()
            .cloned()
            .ok_or(EventLogError::NotFound(kind))
    }

    /// Every recorded duration of `kind`, in record order
    pub fn durations(&self, kind: EventKind) -> Vec<Duration> {
        self.state().events[kind.ordinal()]
            .iter()
            .filter_map(|e| e.duration)
            .collect()
    }

    /// Time from the last `first` event to the last `second` event
    pub fn duration_between_last(
        &self,
        first: EventKind,
        second: EventKind,
    ) -> Result<Duration, EventLogError> {
        let t0 = self.last_event(first)?.when;
        let t1 = self.last_event(second)?.when;
        t1.checked_duration_since(t0)
            .ok_or(EventLogError::NotOrdered { first, second })
    }

    /// Mean of the recorded durations of `kind` together with `extra` samples
    pub fn mean_duration(
        &self,
        kind: EventKind,
        extra: &[Duration],
    ) -> Result<Duration, EventLogError> {
        let (recorded, count) = self.state().duration_totals[kind.ordinal()];
        let samples = count + extra.len() as u64;
        if samples == 0 {
            return Err(EventLogError::NoSamples(kind));
        }
        let total = recorded + extra.iter().map(Duration::as_secs_f64).sum::<f64>();
        Ok(Duration::from_secs_f64(total / samples as f64))
    }

    /// Time since the run's `Init` event
    pub fn elapsed(&self) -> Option<Duration> {
        let init = self.last_event(EventKind::Init).ok()?;
        Some(self.clock.now().saturating_duration_since(init.when))
    }

    /// Record a per-row failure and trip the breaker past the limit.
    ///
    /// Returns `MaxConsecutiveFailures` once more than `fail_limit` failures have happened
    /// without an intervening [`succeed`](Self::succeed); the log has halted by then.
    pub fn fail(&self, err: impl fmt::Display) -> Result<(), EventLogError> {
        let (previous, current) = {
            let mut state = self.state();
            let previous = state.consecutive_failures;
            state.consecutive_failures += 1;
            (previous, state.consecutive_failures)
        };
        let detail = err.to_string().replace('\n', " ");
        if previous > 0 {
            self.error(
                EventKind::RoutineException,
                format!("{detail} (consecutive failures: {current})"),
            );
        } else {
            self.error(EventKind::RoutineException, detail);
        }

        let limit = self.config.fail_limit;
        if current > limit {
            let err = EventLogError::MaxConsecutiveFailures { limit };
            self.error(EventKind::RoutineException, err.to_string());
            self.halt();
            return Err(err);
        }
        Ok(())
    }

    /// Record a per-row success and reset the breaker
    pub fn succeed(&self) {
        let previous = {
            let mut state = self.state();
            std::mem::replace(&mut state.consecutive_failures, 0)
        };
        if previous > 0 {
            self.add(
                EventKind::PngSuccess,
                format!("Succeeded (resetting {previous} consecutive failures)"),
            );
        } else {
            self.add(EventKind::PngSuccess, "Succeeded");
        }
    }

    /// `Init -> Running`
    pub fn begin(&self) {
        let mut state = self.state();
        if state.phase == RunPhase::Init {
            state.phase = RunPhase::Running;
        }
    }

    /// Move into a terminal phase; false if the run already ended
    fn finish(&self, phase: RunPhase) -> bool {
        let mut state = self.state();
        if state.phase.is_terminal() {
            return false;
        }
        state.phase = phase;
        true
    }

    fn log_file_display(&self) -> String {
        self.config
            .log_file
            .as_ref()
            .map_or_else(|| "the console output".to_string(), |p| p.display().to_string())
    }

    fn elapsed_display(&self) -> String {
        self.elapsed()
            .map_or_else(|| "an unknown time".to_string(), format_elapsed)
    }

    /// Finish successfully; `None` if the run had already ended
    pub fn complete(&self) -> Option<RunEnding> {
        if !self.finish(RunPhase::Completed) {
            return None;
        }
        self.record(
            EventKind::HaltFinished,
            format!("Successful completion in {}.", self.elapsed_display()),
            None,
            Level::INFO,
        );
        self.record(
            EventKind::LogNotify,
            format!("See {} for full log.", self.log_file_display()),
            None,
            Level::INFO,
        );
        Some(RunEnding {
            summary: self.summarise(),
            resume: None,
        })
    }

    /// Stop early, leaving a resume suggestion behind; idempotent once the run ended
    pub fn halt(&self) -> Option<RunEnding> {
        if !self.finish(RunPhase::Halted) {
            return None;
        }
        self.record(
            EventKind::EarlyHalt,
            format!(
                "Early halt after {}. For the full log see {}",
                self.elapsed_display(),
                self.log_file_display()
            ),
            None,
            Level::WARN,
        );
        let resume = self.suggest_resume();
        Some(RunEnding {
            summary: self.summarise(),
            resume,
        })
    }

    /// Remember the marker this run resumed from. Until a row has been settled,
    /// [`suggest_resume`](Self::suggest_resume) hands it on unchanged.
    pub fn carry_resume(&self, marker: ResumeMarker) {
        self.state().carried_resume = Some(marker);
    }

    /// Derive where a follow-up run should resume from the last settled row.
    ///
    /// Reads the URL from the last `CheckPng` record (`(n) @ <url>`); if a `WriteRow`
    /// was recorded after that check the row is done and the mode is `After`, otherwise
    /// `At`. With nothing settled yet the carried marker, if any, is suggested again.
    pub fn suggest_resume(&self) -> Option<ResumeMarker> {
        let marker = self
            .resume_from_checks()
            .or_else(|| self.state().carried_resume.clone())?;
        self.warn(EventKind::ResumePoint, marker.suggestion());
        Some(marker)
    }

    fn resume_from_checks(&self) -> Option<ResumeMarker> {
        let checked = self.last_event(EventKind::CheckPng).ok()?;
        let url = checked
            .message
            .rsplit_once(" @ ")
            .map(|(_, url)| url.trim())
            .filter(|url| !url.is_empty())?;
        let mode = match self.last_event(EventKind::WriteRow) {
            Ok(written) if written.seq > checked.seq => ResumeMode::After,
            _ => ResumeMode::At,
        };
        Some(ResumeMarker {
            url: url.to_string(),
            mode,
        })
    }

    /// Aggregate every recorded kind and emit the table as a `BonVoyage` record
    pub fn summarise(&self) -> RunSummary {
        let (kinds, phase) = {
            let state = self.state();
            let kinds = EventKind::ALL
                .iter()
                .filter(|kind| !state.events[kind.ordinal()].is_empty())
                .map(|kind| KindSummary::from_events(*kind, &state.events[kind.ordinal()]))
                .collect();
            (kinds, state.phase)
        };
        let summary = RunSummary {
            phase,
            elapsed_secs: self.elapsed().map(|d| d.as_secs_f64()),
            kinds,
        };
        self.record(EventKind::BonVoyage, summary.render(), None, Level::INFO);
        summary
    }
}

fn emit_line(level: Level, line: &str) {
    if level == Level::ERROR {
        tracing::error!(target: EVENT_TARGET, "{line}");
    } else if level == Level::WARN {
        tracing::warn!(target: EVENT_TARGET, "{line}");
    } else if level == Level::INFO {
        tracing::info!(target: EVENT_TARGET, "{line}");
    } else if level == Level::DEBUG {
        tracing::debug!(target: EVENT_TARGET, "{line}");
    } else {
        tracing::trace!(target: EVENT_TARGET, "{line}");
    }
}
