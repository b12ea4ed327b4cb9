use std::path::{Path, PathBuf};

use crate::types::WalError;

const WAL_EXT: &str = "wal";
const TAIL_MARK: &str = "_END";

/// One on-disk segment: an append-only file of encoded records, plus an
/// in-memory shadow of its bytes. The shadow is only populated for the tail
/// (warmed on open, extended on every append); sealed segments keep an
/// empty shadow and are read straight from disk.
#[derive(Debug)]
pub struct Segment {
    index: i64,
    path: PathBuf,
    size: u64,
    data: Vec<u8>,
}

impl Segment {
    pub fn new(index: i64, path: PathBuf, size: u64) -> Self {
        Self {
            index,
            path,
            size,
            data: Vec::new(),
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Extend the in-memory shadow. Persistence is the tail file's job;
    /// callers append here only after the durable write succeeded.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.size += bytes.len() as u64;
    }

    /// Replace the shadow with the file's current content. Used on open to
    /// warm the tail segment.
    pub async fn load(&mut self) -> std::io::Result<()> {
        self.data = tokio::fs::read(&self.path).await?;
        self.size = self.data.len() as u64;
        Ok(())
    }

    /// Full file read of a sealed segment.
    pub async fn read_all(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Record the rename performed when this segment was sealed.
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }
}

/// Filename of a sealed segment, e.g. `00000000000000000042.wal`.
pub fn segment_filename(index: i64) -> String {
    format!("{index:020}.{WAL_EXT}")
}

/// Filename of the tail segment, e.g. `00000000000000000042_END.wal`.
pub fn tail_filename(index: i64) -> String {
    format!("{index:020}{TAIL_MARK}.{WAL_EXT}")
}

/// Sealed counterpart of a tail path: the same name with the `_END` mark
/// removed. Paths without the mark come back unchanged.
pub fn sealed_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .replace(TAIL_MARK, "");
    path.with_file_name(name)
}

/// Parse a `.wal` filename into `(index, is_tail)`.
///
/// Fails with [`WalError::MalformedName`] when the stem (minus an optional
/// `_END` suffix) is not a decimal integer.
pub fn parse_segment_name(name: &str) -> Result<(i64, bool), WalError> {
    let stem = name
        .strip_suffix(".wal")
        .ok_or_else(|| WalError::MalformedName(name.to_string()))?;
    let (digits, is_tail) = match stem.strip_suffix(TAIL_MARK) {
        Some(rest) => (rest, true),
        None => (stem, false),
    };
    let index = digits
        .parse::<i64>()
        .map_err(|_| WalError::MalformedName(name.to_string()))?;
    Ok((index, is_tail))
}

/// Scan `dir` (non-recursively) for segment files and return them sorted by
/// index ascending, together with the resolved tail index: the index of the
/// `_END`-marked file, or the highest observed index when no marker exists,
/// or -1 for an empty directory.
///
/// Non-`.wal` entries and subdirectories are ignored; a `.wal` file whose
/// name does not parse aborts discovery.
pub fn discover_segments(dir: &Path) -> Result<(Vec<Segment>, i64), WalError> {
    let mut segments = Vec::new();
    let mut tail_index = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if !name.ends_with(".wal") {
            continue;
        }

        let (index, is_tail) = parse_segment_name(&name)?;
        if is_tail {
            tail_index = Some(index);
        }
        let size = entry.metadata()?.len();
        segments.push(Segment::new(index, entry.path(), size));
    }

    segments.sort_by_key(|s| s.index());

    let last_index = tail_index
        .or_else(|| segments.last().map(|s| s.index()))
        .unwrap_or(-1);
    Ok((segments, last_index))
}
