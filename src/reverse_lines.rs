// WHY: resume points sit near the tail of logs that can grow very large, so lines are
// recovered by reading fixed-size chunks backwards from the end of the source

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::path::Path;

/// Default number of bytes loaded per backward read
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Options for a backward scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Substring a line must contain to be yielded (empty matches every line)
    pub match_substr: String,
    /// Line terminator to split on
    pub line_ending: String,
    /// Whether yielded lines have their terminator removed
    pub strip_eol: bool,
    /// Bytes read per seek; trades memory against the number of read calls
    pub chunk_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            match_substr: String::new(),
            line_ending: "\n".to_string(),
            strip_eol: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ScanOptions {
    /// Scan for lines containing `substr`
    pub fn matching(substr: impl Into<String>) -> Self {
        Self {
            match_substr: substr.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_line_ending(mut self, line_ending: impl Into<String>) -> Self {
        self.line_ending = line_ending.into();
        self
    }

    pub fn with_strip_eol(mut self, strip_eol: bool) -> Self {
        self.strip_eol = strip_eol;
        self
    }
}

/// Lazily yields the lines of a seekable source from last to first.
///
/// The output equals splitting the whole source into terminator-inclusive lines,
/// reversing them and keeping those containing `match_substr`, but only one chunk plus
/// the line being assembled is ever held in memory. A terminator at the very end of the
/// source does not produce an extra empty line, and an unterminated final line is
/// yielded without a synthetic terminator.
pub struct ReverseLines<R> {
    source: R,
    /// Start of the region not yet read; everything at or after it is in `pending`
    cursor: u64,
    /// Bytes read but not yet yielded, always ending at a line boundary
    pending: Vec<u8>,
    line_ending: Vec<u8>,
    match_substr: Vec<u8>,
    strip_eol: bool,
    chunk_size: usize,
    finished: bool,
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(mut source: R, options: ScanOptions) -> io::Result<Self> {
        if options.line_ending.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line ending must not be empty",
            ));
        }
        let cursor = source.seek(SeekFrom::End(0))?;
        Ok(Self {
            source,
            cursor,
            pending: Vec::new(),
            line_ending: options.line_ending.into_bytes(),
            match_substr: options.match_substr.into_bytes(),
            strip_eol: options.strip_eol,
            chunk_size: options.chunk_size.max(1),
            finished: false,
        })
    }

    /// Read the chunk preceding the cursor and prepend it to `pending`.
    /// Returns the number of bytes added.
    fn read_chunk(&mut self) -> io::Result<usize> {
        let step = (self.chunk_size as u64).min(self.cursor) as usize;
        self.cursor -= step as u64;
        self.source.seek(SeekFrom::Start(self.cursor))?;
        let mut chunk = vec![0u8; step];
        self.source.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&self.pending);
        self.pending = chunk;
        Ok(step)
    }

    /// Split the last complete line (terminator included, if any) off `pending`
    fn next_raw_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let eol_len = self.line_ending.len();
        while self.pending.len() < eol_len && self.cursor > 0 {
            self.read_chunk()?;
        }
        if self.pending.is_empty() {
            return Ok(None);
        }

        let own_eol = if self.pending.ends_with(&self.line_ending) {
            eol_len
        } else {
            0
        };
        // Only bytes left of the line's own terminator can hold the previous boundary
        let mut search_end = self.pending.len() - own_eol;
        loop {
            if let Some(pos) = rfind(&self.pending[..search_end], &self.line_ending) {
                return Ok(Some(self.pending.split_off(pos + eol_len)));
            }
            if self.cursor == 0 {
                // Reached the start of the source: the remainder is the first line
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            let added = self.read_chunk()?;
            // Already-searched bytes moved right by `added`; rescan the new bytes plus
            // enough overlap to catch a terminator straddling the chunk boundary
            search_end = (added + eol_len - 1).min(added + search_end);
        }
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let mut line = match self.next_raw_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            if !self.match_substr.is_empty() && find(&line, &self.match_substr).is_none() {
                continue;
            }
            if self.strip_eol && line.ends_with(&self.line_ending) {
                line.truncate(line.len() - self.line_ending.len());
            }
            return Some(
                String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            );
        }
    }
}

impl<R: Read + Seek> FusedIterator for ReverseLines<R> {}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Collect up to `max_count` lines containing `match_substr` from the end of a file
/// (`max_count == 0` collects every match)
pub fn grep_backwards<P: AsRef<Path>>(
    path: P,
    match_substr: &str,
    chunk_size: usize,
    max_count: usize,
) -> io::Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let options = ScanOptions::matching(match_substr).with_chunk_size(chunk_size);
    let limit = if max_count == 0 { usize::MAX } else { max_count };
    ReverseLines::new(file, options)?.take(limit).collect()
}
