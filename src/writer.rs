use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::{
    record,
    types::{Mutation, WalError, WalWriter},
    wal::SegmentedWal,
};

/// Growable, memory-mapped handle over the tail segment file. The sole
/// point of durable appends: `update` extends the file, remaps, copies and
/// syncs before returning.
///
/// The map is absent while the file is empty (a zero-length mapping is not
/// portable); the first append creates it.
#[derive(Debug)]
pub(crate) struct TailFile {
    file: File,
    map: Option<MmapMut>,
    len: usize,
    path: PathBuf,
}

impl TailFile {
    /// Open `path` read/write, creating it if absent, and map its current
    /// content.
    pub(crate) fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len() as usize;
        let map = if len > 0 {
            // SAFETY: the WAL owns its directory exclusively; the file
            // stays open and untouched by others for the map's lifetime.
            Some(unsafe { MmapMut::map_mut(&file)? })
        } else {
            None
        };
        Ok(Self {
            file,
            map,
            len,
            path: path.to_path_buf(),
        })
    }

    /// Durably append `data` at the end of the mapped region.
    ///
    /// Grows the file, maps the new extent, copies the bytes in and flushes
    /// both the written range and the size change. When this returns `Ok`,
    /// the bytes survive a crash.
    ///
    /// The prior map stays installed until every step has succeeded: it
    /// remains valid for the old extent while the file grows, so a failed
    /// append leaves the handle serving exactly the previously durable
    /// bytes. A file grown by a failed attempt is re-truncated to the right
    /// length by the next `set_len` here.
    pub(crate) fn update(&mut self, data: &[u8]) -> Result<(), WalError> {
        if data.is_empty() {
            return Ok(());
        }
        let new_len = self.len + data.len();

        self.file.set_len(new_len as u64)?;
        // SAFETY: same exclusivity argument as in `open`.
        let mut map = unsafe { MmapMut::map_mut(&self.file)? };
        map[self.len..new_len].copy_from_slice(data);
        map.flush_range(self.len, data.len())?;
        self.file.sync_data()?;

        // Commit only now that the write and both syncs went through.
        self.map = Some(map);
        self.len = new_len;
        Ok(())
    }

    /// Borrowed view of the currently mapped content.
    pub(crate) fn get(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the full mapping to durable storage.
    pub(crate) fn flush(&self) -> Result<(), WalError> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Flush and unmap. The file must be closed before its path is renamed
    /// on rollover.
    pub(crate) fn close(self) -> Result<(), WalError> {
        self.flush()
    }
}

#[async_trait::async_trait]
impl WalWriter for SegmentedWal {
    async fn set(&self, batch: &[Mutation]) -> Result<(), WalError> {
        if batch.is_empty() {
            return Ok(());
        }

        let total: usize = batch
            .iter()
            .map(|m| record::HEADER_SIZE + m.key.len() + m.value.len())
            .sum();
        let mut buf = Vec::with_capacity(total);
        for m in batch {
            record::encode_into(&mut buf, &m.key, &m.value, m.deleted);
        }

        let mut inner = self.inner.lock().await;
        let tail = inner.tail.as_mut().ok_or(WalError::NotOpen)?;
        // Blocking grow+sync syscalls under the log mutex: batch order on
        // disk is exactly the lock acquisition order, at the cost of
        // stalling the worker thread for the duration of the append.
        tail.update(&buf)?;

        // Mirror into the shadow only once the durable append succeeded, so
        // a failed write is never observable in memory.
        let last_index = inner.last_index;
        let pos = inner
            .segments
            .binary_search_by_key(&last_index, |s| s.index())
            .map_err(|_| WalError::SegmentNotFound(last_index))?;
        inner.segments[pos].append(&buf);
        Ok(())
    }
}
