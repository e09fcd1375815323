use anyhow::{bail, Context, Result};
use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// First column name of a WIT shard header
pub const HEADER_LEAD: &str = "language";

/// Configuration for shard reading
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Buffer size for file reads (default: 64KB)
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            // WHY: shards are hundreds of MB of long caption text; larger reads cut syscalls
            buffer_size: 64 * 1024,
        }
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Path with a trailing `.gz` removed
pub fn strip_gz(path: &Path) -> PathBuf {
    if is_gzip(path) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    }
}

fn open_source(path: &Path, config: &ReaderConfig) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open shard {}", path.display()))?;
    let buffered = BufReader::with_capacity(config.buffer_size, file);
    if is_gzip(path) {
        // WHY: the published shards are concatenated gzip members
        Ok(Box::new(MultiGzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// One raw data record with its position in the shard (header excluded)
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub index: usize,
    pub record: StringRecord,
}

/// Streams the data records of one TSV shard, plain or gzip
pub struct ShardReader {
    path: PathBuf,
    records: csv::StringRecordsIntoIter<Box<dyn Read + Send>>,
    next_index: usize,
}

impl ShardReader {
    /// Open a shard and validate its header row
    pub fn open(path: &Path, config: &ReaderConfig) -> Result<Self> {
        let source = open_source(path, config)?;
        let mut records = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(source)
            .into_records();

        let header = match records.next() {
            Some(header) => header.with_context(|| format!("Failed to read header of {}", path.display()))?,
            None => bail!("Shard {} is empty", path.display()),
        };
        if header.get(0) != Some(HEADER_LEAD) {
            bail!(
                "{} is not a WIT shard: header starts with {:?}",
                path.display(),
                header.get(0).unwrap_or_default()
            );
        }
        debug!("Opened shard {} ({} header fields)", path.display(), header.len());
        Ok(Self {
            path: path.to_path_buf(),
            records,
            next_index: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ShardReader {
    /// Non-I/O errors (bad UTF-8) cover a single record; the index still advances
    type Item = csv::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.records.next()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(result.map(|record| RawRecord { index, record }))
    }
}

/// Decompress `<name>.gz` into the sibling `<name>` unless that already exists.
/// Returns the decompressed path.
pub fn decompress_gz_file(gz_path: &Path) -> Result<PathBuf> {
    if !is_gzip(gz_path) {
        bail!("{} is not a .gz file", gz_path.display());
    }
    let out_path = strip_gz(gz_path);
    if out_path.exists() {
        debug!("{} already decompressed", gz_path.display());
        return Ok(out_path);
    }

    // WHY: write under a temporary name so an interrupted run never leaves a truncated
    // shard that a later run would take as complete
    let mut partial_name = out_path.as_os_str().to_os_string();
    partial_name.push(".partial");
    let partial_path = PathBuf::from(partial_name);

    let input = File::open(gz_path).with_context(|| format!("Failed to open {}", gz_path.display()))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut output = File::create(&partial_path)
        .with_context(|| format!("Failed to create {}", partial_path.display()))?;
    let bytes = io::copy(&mut decoder, &mut output)
        .with_context(|| format!("Failed to decompress {}", gz_path.display()))?;
    output.sync_all()?;
    std::fs::rename(&partial_path, &out_path)
        .with_context(|| format!("Failed to move {} into place", out_path.display()))?;

    info!("Decompressed {} ({} bytes)", gz_path.display(), bytes);
    Ok(out_path)
}

/// Decompress every `.gz` shard, passing other paths through unchanged
pub fn decompress_gz_files(paths: &[PathBuf], show_progress: bool) -> Result<Vec<PathBuf>> {
    let progress = if show_progress {
        ProgressBar::new(paths.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    progress.set_message("Decompressing shards");

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        out.push(if is_gzip(path) {
            decompress_gz_file(path)?
        } else {
            path.clone()
        });
        progress.inc(1);
    }
    progress.finish_and_clear();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const SHARD: &str = "language\tpage_url\timage_url\nen\thttps://p/1\thttps://i/1.png\nfr\thttps://p/2\thttps://i/2.png\n";

    fn write_gz(path: &Path, content: &str) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    fn image_urls(path: &Path) -> Vec<String> {
        ShardReader::open(path, &ReaderConfig::default())
            .unwrap()
            .map(|r| r.unwrap().record.get(2).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_reads_plain_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard.tsv");
        std::fs::write(&path, SHARD).unwrap();
        assert_eq!(image_urls(&path), vec!["https://i/1.png", "https://i/2.png"]);

        let indices: Vec<usize> = ShardReader::open(&path, &ReaderConfig::default())
            .unwrap()
            .map(|r| r.unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_reads_gzip_shard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard.tsv.gz");
        write_gz(&path, SHARD);
        assert_eq!(image_urls(&path), vec!["https://i/1.png", "https://i/2.png"]);
    }

    #[test]
    fn test_rejects_foreign_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.tsv");
        std::fs::write(&path, "id\tname\n1\tx\n").unwrap();
        assert!(ShardReader::open(&path, &ReaderConfig::default()).is_err());

        let empty = dir.path().join("empty.tsv");
        std::fs::write(&empty, "").unwrap();
        assert!(ShardReader::open(&empty, &ReaderConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_utf8_record_keeps_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, b"language\ta\tb\nen\t\xFF\tx\nen\tok\ty\n").unwrap();

        let items: Vec<_> = ShardReader::open(&path, &ReaderConfig::default()).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().index, 1);
    }

    #[test]
    fn test_decompress_once() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("wit_v1.train.all-00000-of-00010.tsv.gz");
        write_gz(&gz, SHARD);

        let out = decompress_gz_file(&gz).unwrap();
        assert_eq!(out, dir.path().join("wit_v1.train.all-00000-of-00010.tsv"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), SHARD);

        // An existing sibling is left alone
        std::fs::write(&out, "kept").unwrap();
        decompress_gz_file(&gz).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "kept");
    }

    #[test]
    fn test_decompress_files_passes_plain_paths() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("a.tsv.gz");
        write_gz(&gz, SHARD);
        let plain = dir.path().join("b.tsv");
        std::fs::write(&plain, SHARD).unwrap();

        let out = decompress_gz_files(&[gz, plain.clone()], false).unwrap();
        assert_eq!(out, vec![dir.path().join("a.tsv"), plain]);
    }
}
