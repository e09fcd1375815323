use super::event::Event;
use super::kind::EventKind;
use super::RunPhase;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RULE: &str = "----------------------------------------------------------";

/// Aggregate of every recorded event of one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSummary {
    pub kind: EventKind,
    pub count: usize,
    pub mean_secs: Option<f64>,
    pub min_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

impl KindSummary {
    pub(crate) fn from_events(kind: EventKind, events: &[Event]) -> Self {
        let secs: Vec<f64> = events
            .iter()
            .filter_map(|e| e.duration.map(|d| d.as_secs_f64()))
            .collect();
        let (mean_secs, min_secs, max_secs) = if secs.is_empty() {
            (None, None, None)
        } else {
            let total: f64 = secs.iter().sum();
            (
                Some(total / secs.len() as f64),
                secs.iter().copied().reduce(f64::min),
                secs.iter().copied().reduce(f64::max),
            )
        };
        Self {
            kind,
            count: events.len(),
            mean_secs,
            min_secs,
            max_secs,
        }
    }

    fn render(&self, name_width: usize) -> String {
        let mut line = format!("{:<name_width$} : n={}", self.kind.name(), self.count);
        if let (Some(mean), Some(min), Some(max)) = (self.mean_secs, self.min_secs, self.max_secs)
        {
            line.push_str(&format!(", μ={mean:.4}s, min={min:.4}s, max={max:.4}s"));
        }
        line
    }
}

/// End-of-run report: phase, elapsed time and per-kind aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub phase: RunPhase,
    pub elapsed_secs: Option<f64>,
    pub kinds: Vec<KindSummary>,
}

impl RunSummary {
    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .map_or(0, |k| k.count)
    }

    pub fn kind(&self, kind: EventKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Multi-line table emitted as the run's final record
    pub fn render(&self) -> String {
        let name_width = self
            .kinds
            .iter()
            .map(|k| k.kind.name().len())
            .max()
            .unwrap_or(0);
        let mut lines = vec!["Thank you for scraping with wikitransp".to_string(), RULE.to_string()];
        lines.extend(self.kinds.iter().map(|k| k.render(name_width)));
        lines.push(RULE.to_string());
        lines.join("\n")
    }
}

/// Human-readable elapsed time, e.g. `42.17 seconds` or `1h 02m 03s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2} seconds");
    }
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}
