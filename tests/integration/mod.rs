// Integration test utilities shared by the pipeline tests
// WHY: scripted verifiers stand in for the network so runs are deterministic

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wikitransp::config::TARGET_MIME;
use wikitransp::row::{Field, FIELD_COUNT};
use wikitransp::{
    BanList, EventLog, EventLogConfig, FilterConfig, FilterPipeline, OrchestratorConfig, ThumbnailResolver,
    Verdict, VerifyError, VisualVerifier,
};

/// Header line of a WIT shard
pub fn shard_header() -> String {
    Field::ALL
        .iter()
        .map(|f| f.column_name())
        .collect::<Vec<_>>()
        .join("\t")
}

/// One dataset row as TSV fields
pub fn row_fields(url: &str, mime: &str, width: u32, height: u32) -> Vec<String> {
    let mut fields: Vec<String> = (0..FIELD_COUNT).map(|i| format!("text{i}")).collect();
    fields[Field::Language.index()] = "en".into();
    fields[Field::PageUrl.index()] = "https://en.wikipedia.org/wiki/Test".into();
    fields[Field::ImageUrl.index()] = url.into();
    fields[Field::MimeType.index()] = mime.into();
    fields[Field::OriginalWidth.index()] = width.to_string();
    fields[Field::OriginalHeight.index()] = height.to_string();
    fields
}

/// A PNG row at a size that passes the default test filter
pub fn png_line(url: &str) -> String {
    row_fields(url, TARGET_MIME, 1200, 800).join("\t")
}

pub fn sized_png_line(url: &str, width: u32, height: u32) -> String {
    row_fields(url, TARGET_MIME, width, height).join("\t")
}

pub fn jpeg_line(url: &str) -> String {
    row_fields(url, "image/jpeg", 1200, 800).join("\t")
}

/// Test fixture holding shards, output and logs in one temporary directory
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub root_path: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().to_path_buf();
        Self { temp_dir, root_path }
    }

    /// Write a plain shard with a header followed by `lines`
    pub fn create_shard(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.root_path.join(name);
        fs::write(&path, shard_contents(lines)).expect("Failed to write shard");
        path
    }

    /// Write a gzip shard with a header followed by `lines`
    pub fn create_gz_shard(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.root_path.join(name);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(shard_contents(lines).as_bytes())
            .expect("Failed to compress shard");
        fs::write(&path, encoder.finish().expect("Failed to finish gzip")).expect("Failed to write shard");
        path
    }

    pub fn output_path(&self) -> PathBuf {
        self.root_path.join("out_PNGs_with_alpha.tsv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root_path.join("logs").join("out_PNGs_with_alpha.log")
    }
}

fn shard_contents(lines: &[String]) -> String {
    let mut contents = shard_header();
    contents.push('\n');
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    contents
}

/// Image URLs of the data rows in an output file
pub fn output_urls(path: &Path) -> Vec<String> {
    let contents = fs::read_to_string(path).expect("Failed to read output");
    contents
        .lines()
        .filter(|line| !line.starts_with("language\t"))
        .map(|line| {
            line.split('\t')
                .nth(Field::ImageUrl.index())
                .expect("Output row too short")
                .to_string()
        })
        .collect()
}

/// Number of header lines in an output file
pub fn header_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .expect("Failed to read output")
        .lines()
        .filter(|line| line.starts_with("language\t"))
        .count()
}

/// What a [`ScriptedVerifier`] does for a URL
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Accept,
    /// RGBA but fully opaque
    Opaque,
    /// Not stored with an alpha channel
    NoAlpha,
    NotFound,
    ServerError,
    /// Never finishes
    Hang,
}

/// Verifier answering from a per-URL script, recording every URL it was asked about
#[derive(Default)]
pub struct ScriptedVerifier {
    scripts: HashMap<String, (Script, Duration)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), (script, Duration::ZERO));
        self
    }

    pub fn with_delay(mut self, url: &str, script: Script, delay: Duration) -> Self {
        self.scripts.insert(url.to_string(), (script, delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisualVerifier for ScriptedVerifier {
    async fn verify(&self, url: &str) -> Result<Verdict, VerifyError> {
        self.calls.lock().unwrap().push(url.to_string());
        let (script, delay) = self
            .scripts
            .get(url)
            .copied()
            .unwrap_or((Script::Accept, Duration::ZERO));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match script {
            Script::Accept => Ok(Verdict {
                has_four_channels: true,
                uses_alpha: true,
            }),
            Script::Opaque => Ok(Verdict {
                has_four_channels: true,
                uses_alpha: false,
            }),
            Script::NoAlpha => Ok(Verdict::default()),
            Script::NotFound => Err(VerifyError::NotFound { url: url.to_string() }),
            Script::ServerError => Err(VerifyError::Status {
                status: 500,
                url: url.to_string(),
            }),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Resolver mapping `<url>` to `<url>.thumb`, or failing for every URL
pub struct SuffixResolver {
    pub fail: bool,
}

#[async_trait]
impl ThumbnailResolver for SuffixResolver {
    async fn resolve(&self, image_url: &str, width: u32) -> Result<String, VerifyError> {
        if self.fail {
            return Err(VerifyError::Lookup {
                url: image_url.to_string(),
                reason: "no thumbnail".to_string(),
            });
        }
        Ok(format!("{image_url}.{width}px.thumb"))
    }
}

/// Filter settings that verify every image at its original URL
pub fn filter_config() -> FilterConfig {
    FilterConfig {
        target_mime: TARGET_MIME.to_string(),
        thumbnail_width: 100_000,
        min_size: 0,
        max_size: 0,
    }
}

pub fn orchestrator_config(max_in_flight: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 2,
        max_in_flight,
        request_timeout: Duration::from_secs(30),
        show_progress: false,
    }
}

pub fn event_log(fail_limit: u32) -> Arc<EventLog> {
    Arc::new(EventLog::new(EventLogConfig {
        fail_limit,
        ..EventLogConfig::default()
    }))
}

pub struct PipelineBuilder {
    pub config: FilterConfig,
    pub ban_list: BanList,
    pub fail_limit: u32,
    pub resolver_fails: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            config: filter_config(),
            ban_list: BanList::default(),
            fail_limit: 10,
            resolver_fails: false,
        }
    }
}

impl PipelineBuilder {
    pub fn build(self, verifier: Arc<ScriptedVerifier>) -> Arc<FilterPipeline> {
        Arc::new(FilterPipeline::new(
            self.config,
            self.ban_list,
            verifier,
            Arc::new(SuffixResolver {
                fail: self.resolver_fails,
            }),
            event_log(self.fail_limit),
        ))
    }
}

/// Pipeline with the default test settings
pub fn pipeline(verifier: Arc<ScriptedVerifier>) -> Arc<FilterPipeline> {
    PipelineBuilder::default().build(verifier)
}
