use super::kind::EventKind;
use std::time::{Duration, Instant};

/// Separator between an event kind and its message in rendered output
pub const SEPARATOR: &str = " ⠶ ";

/// A single recorded occurrence of an [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub when: Instant,
    /// Position in the run's global record order
    pub seq: u64,
    pub message: String,
    /// Kind the duration was measured from, if any
    pub since: Option<EventKind>,
    pub duration: Option<Duration>,
}

impl Event {
    /// Render as `Kind[ ⠶ message][ in 0.1234s]`.
    /// With `simple == false` the timing reads `0.1234s since Reference` instead.
    pub fn render(&self, simple: bool) -> String {
        let mut out = String::from(self.kind.name());
        if !self.message.is_empty() {
            out.push_str(SEPARATOR);
            out.push_str(&self.message);
        }
        if let Some(duration) = self.duration {
            let secs = duration.as_secs_f64();
            match self.since {
                Some(since) if !simple => out.push_str(&format!(" {secs:.4}s since {since}")),
                _ => out.push_str(&format!(" in {secs:.4}s")),
            }
        }
        out
    }
}
