use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::{
    reader::SegmentCache,
    segment::{discover_segments, sealed_path, tail_filename, Segment},
    types::{WalCommon, WalError},
    writer::TailFile,
};

/// Segmented write-ahead log rooted at one directory.
///
/// All state lives behind a single coarse mutex: `set`, `read`, `close` and
/// the retention sweep serialize against each other, and the order in which
/// `set` calls acquire the lock is the order of their bytes on disk.
pub struct SegmentedWal {
    pub(crate) root: PathBuf,
    pub(crate) retention_period: Duration,
    pub(crate) low_mark: usize,
    pub(crate) inner: Mutex<WalInner>,
}

pub(crate) struct WalInner {
    /// Discovered segments, sorted by index ascending. Indices are strictly
    /// increasing but not necessarily contiguous once retention has run.
    pub(crate) segments: Vec<Segment>,
    /// Index of the current tail segment; -1 until the log is opened for
    /// the first time.
    pub(crate) last_index: i64,
    pub(crate) tail: Option<TailFile>,
    pub(crate) cache: SegmentCache,
}

impl SegmentedWal {
    /// Construct the coordinator without touching the filesystem. `period`
    /// is the retention sweep interval, `low_mark` the number of newest
    /// segments a sweep preserves, and `cache_cap` the read-cache capacity
    /// in segments.
    pub fn new(root: PathBuf, period: Duration, low_mark: usize, cache_cap: usize) -> Self {
        Self {
            root,
            retention_period: period,
            low_mark,
            inner: Mutex::new(WalInner {
                segments: Vec::new(),
                last_index: -1,
                tail: None,
                cache: SegmentCache::new(cache_cap),
            }),
        }
    }

    /// Discover existing segments under the root directory (creating it if
    /// needed), then open the tail: the `_END`-marked segment when one
    /// exists, the highest-indexed segment otherwise, or a fresh segment 0
    /// on a first run.
    pub async fn open(&self) -> Result<(), WalError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        tokio::fs::create_dir_all(&self.root).await?;
        let (segments, last_index) = discover_segments(&self.root)?;
        inner.segments = segments;
        inner.last_index = last_index;
        inner.tail = None;

        match inner
            .segments
            .binary_search_by_key(&inner.last_index, |s| s.index())
        {
            Ok(pos) => {
                let tail = TailFile::open(inner.segments[pos].path())?;
                // Warm the tail's in-memory shadow with what is already on
                // disk so its size stays coherent with the file.
                inner.segments[pos].load().await?;
                inner.tail = Some(tail);
            }
            Err(_) => Self::rollover(&self.root, inner).await?,
        }

        info!(
            "opened wal at {:?}: {} segment(s), tail index {} ({} bytes)",
            self.root,
            inner.segments.len(),
            inner.last_index,
            inner.tail.as_ref().map_or(0, |t| t.len())
        );
        Ok(())
    }

    /// Flush and drop the tail handle. Callers must have quiesced writers;
    /// the log can be reopened afterwards.
    pub async fn close(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        if let Some(tail) = inner.tail.take() {
            tail.close()?;
        }
        Ok(())
    }

    /// Seal the current tail and start a new one.
    ///
    /// The prior tail is unmapped first, then renamed to its sealed name
    /// (dropping the `_END` mark); only afterwards is the new tail file
    /// created, so at every step at most one `_END` file exists.
    pub(crate) async fn rollover(root: &Path, inner: &mut WalInner) -> Result<(), WalError> {
        if let Some(tail) = &mut inner.tail {
            // Flush through the live handle before giving it up: a failure
            // here leaves the tail installed and still accepting appends.
            tail.flush()?;
            let old_path = tail.path().to_path_buf();
            // Confirmed durable; unmap so the file can be renamed.
            inner.tail = None;
            let sealed = sealed_path(&old_path);
            if sealed != old_path {
                if let Err(e) = tokio::fs::rename(&old_path, &sealed).await {
                    // The file under its `_END` name is intact; remap it so
                    // the log keeps writing to the old tail.
                    inner.tail = Some(TailFile::open(&old_path)?);
                    return Err(e.into());
                }
            }
            if let Ok(pos) = inner
                .segments
                .binary_search_by_key(&inner.last_index, |s| s.index())
            {
                inner.segments[pos].set_path(sealed);
            }
        }

        let new_index = inner.last_index + 1;
        let path = root.join(tail_filename(new_index));
        let tail = TailFile::open(&path)?;
        inner.segments.push(Segment::new(new_index, path, 0));
        inner.last_index = new_index;
        inner.tail = Some(tail);
        info!("rolled over to tail segment {new_index}");
        Ok(())
    }

    /// Seal the tail and open the next segment. Exposed for tests; appends
    /// roll over only through this path.
    pub(crate) async fn roll(&self) -> Result<(), WalError> {
        let mut guard = self.inner.lock().await;
        Self::rollover(&self.root, &mut guard).await
    }

    /// Index of the current tail segment (-1 before `open`).
    pub async fn last_index(&self) -> i64 {
        self.inner.lock().await.last_index
    }

    /// Number of segments currently tracked, tail included.
    pub async fn segment_count(&self) -> usize {
        self.inner.lock().await.segments.len()
    }

    /// Path of the current tail segment file.
    pub async fn tail_path(&self) -> Result<PathBuf, WalError> {
        let inner = self.inner.lock().await;
        match &inner.tail {
            Some(tail) => Ok(tail.path().to_path_buf()),
            None => Err(WalError::NotOpen),
        }
    }

    /// Spawn the background retention task. Each tick of the configured
    /// period removes expired segments; the task exits when `true` is sent
    /// on `shutdown` or the sender is dropped.
    pub fn spawn_retention(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let wal = Arc::clone(self);
        tokio::spawn(async move {
            let period = wal.retention_period;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => wal.clean_once().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One retention sweep: keep the newest `low_mark` segments, remove the
    /// files of everything older. The tail is never removed. A failed
    /// removal is logged and skipped so one stuck file cannot wedge the
    /// sweep; the segment stays listed and is retried on the next tick.
    pub(crate) async fn clean_once(&self) {
        let mut inner = self.inner.lock().await;

        let excess = inner.segments.len().saturating_sub(self.low_mark);
        if excess == 0 {
            return;
        }
        let last_index = inner.last_index;
        let victims: Vec<i64> = inner
            .segments
            .iter()
            .take(excess)
            .map(|s| s.index())
            .filter(|i| *i != last_index)
            .collect();

        for index in victims {
            let Ok(pos) = inner.segments.binary_search_by_key(&index, |s| s.index()) else {
                continue;
            };
            let path = inner.segments[pos].path().to_path_buf();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    inner.segments.remove(pos);
                    inner.cache.evict(index);
                    info!("removed expired segment {path:?}");
                }
                Err(e) => warn!("failed to remove segment {path:?}: {e}"),
            }
        }
    }
}

#[async_trait::async_trait]
impl WalCommon for SegmentedWal {
    async fn io_sync(&self) -> Result<(), WalError> {
        let inner = self.inner.lock().await;
        match &inner.tail {
            Some(tail) => tail.flush(),
            None => Ok(()),
        }
    }
}
