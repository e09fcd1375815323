use crate::ban_list::BanList;
use crate::config::FilterConfig;
use crate::event_log::{ResumeMarker, ResumeMode};
use crate::row::{Field, Row};
use crate::shard::{ReaderConfig, ShardReader};
use crate::thumbnail::{verification_target, VerificationTarget};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows between checks of the halt flag while scanning
const HALT_CHECK_INTERVAL: usize = 1024;

/// Why a row was dropped before verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    WrongMime,
    Duplicate,
    Banned,
    TooSmall,
    TooLarge,
    Malformed,
}

/// A row that passed the structural predicates and awaits verification
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Position across all shards, assigned at merge
    pub seq: usize,
    pub shard: usize,
    pub row_index: usize,
    pub image_url: String,
    pub target: VerificationTarget,
    pub row: Row,
}

/// Per-shard filtering counts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardStats {
    pub path: String,
    pub rows_read: u64,
    pub skipped_before_resume: u64,
    pub wrong_mime: u64,
    pub duplicates: u64,
    pub banned: u64,
    pub too_small: u64,
    pub too_large: u64,
    pub malformed: u64,
    pub candidates: u64,
    pub scan_time_ms: u64,
}

impl ShardStats {
    fn count(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::WrongMime => self.wrong_mime += 1,
            Rejection::Duplicate => self.duplicates += 1,
            Rejection::Banned => self.banned += 1,
            Rejection::TooSmall => self.too_small += 1,
            Rejection::TooLarge => self.too_large += 1,
            Rejection::Malformed => self.malformed += 1,
        }
    }
}

/// Applies MIME, dedup, ban and size predicates to one shard's rows in order
pub struct RowFilter<'a> {
    config: &'a FilterConfig,
    ban_list: &'a BanList,
    /// URLs that passed the MIME check
    seen: HashSet<String>,
    /// Seen URLs dropped for size or bad dimensions; they still shadow later shards
    shadowed: HashSet<String>,
}

impl<'a> RowFilter<'a> {
    pub fn new(config: &'a FilterConfig, ban_list: &'a BanList) -> Self {
        Self {
            config,
            ban_list,
            seen: HashSet::new(),
            shadowed: HashSet::new(),
        }
    }

    /// Run a row through the predicates, returning its verification target if it passes
    pub fn check(&mut self, row: &Row) -> Result<VerificationTarget, Rejection> {
        if row.mime_type() != self.config.target_mime {
            return Err(Rejection::WrongMime);
        }
        let url = row.image_url();
        if !self.seen.insert(url.to_string()) {
            return Err(Rejection::Duplicate);
        }
        if self.ban_list.contains(url) {
            return Err(Rejection::Banned);
        }
        let (width, height) = match (row.width(), row.height()) {
            (Ok(width), Ok(height)) => (width, height),
            _ => {
                self.shadowed.insert(url.to_string());
                return Err(Rejection::Malformed);
            }
        };
        if self.config.min_size > 0 && width.min(height) < self.config.min_size {
            self.shadowed.insert(url.to_string());
            return Err(Rejection::TooSmall);
        }
        if self.config.max_size > 0 && width.max(height) > self.config.max_size {
            self.shadowed.insert(url.to_string());
            return Err(Rejection::TooLarge);
        }
        Ok(verification_target(url, width, self.config.thumbnail_width))
    }

    pub fn into_shadowed(self) -> HashSet<String> {
        self.shadowed
    }
}

/// Where scanning of a shard begins relative to a resume marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStart {
    /// The whole shard precedes the marker
    Skip,
    /// Rows before this index precede the marker
    From(usize),
}

/// Position of a resume marker's row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPosition {
    pub shard: usize,
    pub row: usize,
}

/// Find the first row whose image URL equals `url`, reading only that column
pub fn locate_marker(shards: &[PathBuf], url: &str, config: &ReaderConfig) -> Result<Option<MarkerPosition>> {
    for (shard, path) in shards.iter().enumerate() {
        for raw in ShardReader::open(path, config)? {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) if e.is_io_error() => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
                Err(_) => continue,
            };
            if raw.record.get(Field::ImageUrl.index()) == Some(url) {
                debug!("Resume marker found in {} at row {}", path.display(), raw.index);
                return Ok(Some(MarkerPosition { shard, row: raw.index }));
            }
        }
    }
    Ok(None)
}

/// Per-shard start positions for resuming at `marker` found at `position`.
/// A marker that was never found skips every shard.
pub fn shard_starts(shard_count: usize, marker: &ResumeMarker, position: Option<MarkerPosition>) -> Vec<ShardStart> {
    let Some(position) = position else {
        return vec![ShardStart::Skip; shard_count];
    };
    (0..shard_count)
        .map(|shard| {
            if shard < position.shard {
                ShardStart::Skip
            } else if shard > position.shard {
                ShardStart::From(0)
            } else {
                match marker.mode {
                    ResumeMode::At => ShardStart::From(position.row),
                    ResumeMode::After => ShardStart::From(position.row + 1),
                }
            }
        })
        .collect()
}

/// Candidates and bookkeeping from one shard
#[derive(Debug)]
pub struct ShardScan {
    pub shard: usize,
    pub candidates: Vec<Candidate>,
    pub shadowed: HashSet<String>,
    pub stats: ShardStats,
    /// Scanning stopped early because a halt was requested
    pub interrupted: bool,
}

/// Filter one shard. Dedup here is shard-local; [`merge_scans`] extends it across shards.
pub fn scan_shard(
    shard: usize,
    path: &Path,
    start: ShardStart,
    config: &FilterConfig,
    ban_list: &BanList,
    reader_config: &ReaderConfig,
    halt: &AtomicBool,
) -> Result<ShardScan> {
    let started = Instant::now();
    let mut stats = ShardStats {
        path: path.display().to_string(),
        ..ShardStats::default()
    };
    let first_row = match start {
        ShardStart::Skip => {
            debug!("Skipping {}: precedes the resume point", path.display());
            return Ok(ShardScan {
                shard,
                candidates: Vec::new(),
                shadowed: HashSet::new(),
                stats,
                interrupted: false,
            });
        }
        ShardStart::From(row) => row,
    };

    let mut filter = RowFilter::new(config, ban_list);
    let mut candidates = Vec::new();
    let mut interrupted = false;

    for (n, raw) in ShardReader::open(path, reader_config)?.enumerate() {
        if n % HALT_CHECK_INTERVAL == 0 && halt.load(Ordering::Relaxed) {
            interrupted = true;
            break;
        }
        stats.rows_read += 1;
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) if e.is_io_error() => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
            Err(e) => {
                warn!("Malformed row in {}: {}", path.display(), e);
                stats.malformed += 1;
                continue;
            }
        };
        if raw.index < first_row {
            stats.skipped_before_resume += 1;
            continue;
        }
        let row = match Row::from_record(raw.record) {
            Ok(row) => row,
            Err(e) => {
                warn!("Malformed row {} in {}: {}", raw.index, path.display(), e);
                stats.malformed += 1;
                continue;
            }
        };
        match filter.check(&row) {
            Ok(target) => candidates.push(Candidate {
                seq: 0,
                shard,
                row_index: raw.index,
                image_url: row.image_url().to_string(),
                target,
                row,
            }),
            Err(Rejection::Malformed) => {
                warn!("Row {} in {} has non-integer dimensions", raw.index, path.display());
                stats.malformed += 1;
            }
            Err(rejection) => stats.count(rejection),
        }
    }

    stats.candidates = candidates.len() as u64;
    stats.scan_time_ms = started.elapsed().as_millis() as u64;
    info!(
        "Scanned {}: {} rows, {} candidates in {}ms",
        path.display(),
        stats.rows_read,
        stats.candidates,
        stats.scan_time_ms
    );
    Ok(ShardScan {
        shard,
        candidates,
        shadowed: filter.into_shadowed(),
        stats,
        interrupted,
    })
}

/// Concatenate shard results in shard order, dropping candidates whose URL was already
/// seen in an earlier shard, and number the survivors.
/// Returns the candidates and the number of cross-shard duplicates dropped.
pub fn merge_scans(mut scans: Vec<ShardScan>) -> (Vec<Candidate>, u64) {
    scans.sort_by_key(|scan| scan.shard);
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    let mut duplicates = 0;

    for scan in scans {
        let mut shard_urls = Vec::with_capacity(scan.candidates.len());
        for candidate in scan.candidates {
            if seen.contains(&candidate.image_url) {
                duplicates += 1;
                continue;
            }
            shard_urls.push(candidate.image_url.clone());
            merged.push(candidate);
        }
        seen.extend(shard_urls);
        seen.extend(scan.shadowed);
    }
    for (seq, candidate) in merged.iter_mut().enumerate() {
        candidate.seq = seq;
    }
    (merged, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FIELD_COUNT;

    fn row(url: &str, mime: &str, width: u32, height: u32) -> Row {
        let mut fields = vec![String::from("x"); FIELD_COUNT];
        fields[Field::Language.index()] = "en".into();
        fields[Field::ImageUrl.index()] = url.into();
        fields[Field::MimeType.index()] = mime.into();
        fields[Field::OriginalWidth.index()] = width.to_string();
        fields[Field::OriginalHeight.index()] = height.to_string();
        Row::from_fields(fields).unwrap()
    }

    fn config() -> FilterConfig {
        FilterConfig {
            min_size: 1000,
            max_size: 0,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn test_first_seen_wins() {
        let config = config();
        let bans = BanList::default();
        let mut filter = RowFilter::new(&config, &bans);
        assert!(filter.check(&row("u1", "image/png", 2000, 2000)).is_ok());
        assert_eq!(
            filter.check(&row("u1", "image/png", 2000, 2000)),
            Err(Rejection::Duplicate)
        );
    }

    #[test]
    fn test_wrong_mime_is_not_marked_seen() {
        let config = config();
        let bans = BanList::default();
        let mut filter = RowFilter::new(&config, &bans);
        assert_eq!(
            filter.check(&row("u1", "image/jpeg", 2000, 2000)),
            Err(Rejection::WrongMime)
        );
        assert!(filter.check(&row("u1", "image/png", 2000, 2000)).is_ok());
    }

    #[test]
    fn test_banned_url_is_dropped() {
        let config = config();
        let bans = BanList::from_urls(["u2"]);
        let mut filter = RowFilter::new(&config, &bans);
        assert_eq!(
            filter.check(&row("u2", "image/png", 2000, 2000)),
            Err(Rejection::Banned)
        );
    }

    #[test]
    fn test_size_bounds() {
        let config = FilterConfig {
            min_size: 1000,
            max_size: 3000,
            ..FilterConfig::default()
        };
        let bans = BanList::default();
        let mut filter = RowFilter::new(&config, &bans);
        assert!(filter.check(&row("a", "image/png", 1200, 1000)).is_ok());
        assert_eq!(
            filter.check(&row("b", "image/png", 999, 5000)),
            Err(Rejection::TooSmall)
        );
        assert_eq!(
            filter.check(&row("c", "image/png", 3001, 1500)),
            Err(Rejection::TooLarge)
        );

        let shadowed = filter.into_shadowed();
        assert!(shadowed.contains("b") && shadowed.contains("c"));
        assert!(!shadowed.contains("a"));
    }

    #[test]
    fn test_zero_bounds_disable_size_checks() {
        let config = FilterConfig {
            min_size: 0,
            max_size: 0,
            ..FilterConfig::default()
        };
        let bans = BanList::default();
        let mut filter = RowFilter::new(&config, &bans);
        assert!(filter.check(&row("a", "image/png", 1, 1)).is_ok());
    }

    #[test]
    fn test_shard_starts() {
        let marker = ResumeMarker::after("u");
        let position = Some(MarkerPosition { shard: 1, row: 4 });
        assert_eq!(
            shard_starts(3, &marker, position),
            vec![ShardStart::Skip, ShardStart::From(5), ShardStart::From(0)]
        );
        let marker = ResumeMarker::at("u");
        assert_eq!(
            shard_starts(2, &marker, position),
            vec![ShardStart::Skip, ShardStart::From(4)]
        );
        assert_eq!(
            shard_starts(2, &marker, None),
            vec![ShardStart::Skip, ShardStart::Skip]
        );
    }

    fn candidate(shard: usize, url: &str) -> Candidate {
        Candidate {
            seq: 0,
            shard,
            row_index: 0,
            image_url: url.to_string(),
            target: VerificationTarget::Original(url.to_string()),
            row: row(url, "image/png", 2000, 2000),
        }
    }

    fn scan(shard: usize, urls: &[&str], shadowed: &[&str]) -> ShardScan {
        ShardScan {
            shard,
            candidates: urls.iter().map(|u| candidate(shard, u)).collect(),
            shadowed: shadowed.iter().map(|s| s.to_string()).collect(),
            stats: ShardStats::default(),
            interrupted: false,
        }
    }

    #[test]
    fn test_merge_applies_cross_shard_dedup() {
        // Out of order on purpose: merge sorts by shard
        let scans = vec![
            scan(2, &["d", "a"], &[]),
            scan(0, &["a", "b"], &["s"]),
            scan(1, &["b", "c", "s"], &[]),
        ];
        let (merged, duplicates) = merge_scans(scans);
        let urls: Vec<&str> = merged.iter().map(|c| c.image_url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b", "c", "d"]);
        assert_eq!(duplicates, 3);
        let seqs: Vec<usize> = merged.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }
}
