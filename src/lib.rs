pub mod ban_list;
pub mod config;
pub mod discovery;
pub mod event_log;
pub mod filter;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod reverse_lines;
pub mod row;
pub mod shard;
pub mod thumbnail;
pub mod verify;

// Re-export the types most callers need
pub use ban_list::BanList;
pub use config::{ConfigError, FilterConfig, OrchestratorConfig, RunConfig};
pub use event_log::{
    recover_resume_point, EventKind, EventLog, EventLogConfig, EventLogError, ResumeMarker,
    ResumeMode, RunPhase, RunSummary,
};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport};
pub use pipeline::FilterPipeline;
pub use reverse_lines::{grep_backwards, ReverseLines, ScanOptions};
pub use row::Row;
pub use thumbnail::{ThumbnailResolver, VerificationTarget, WikimediaApiResolver};
pub use verify::{HttpPngVerifier, Verdict, VerifyError, VisualVerifier};
