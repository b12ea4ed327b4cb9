//! A segmented, crash-recoverable Write-Ahead Log (WAL).
//!
//! [`SegmentedWal`](wal::SegmentedWal) stores key/value mutation records on
//! disk as a series of numbered segment files. Appends go through a
//! memory-mapped tail segment and are durable when `set` returns; sealed
//! segments are immutable and served through a bounded read cache.
//!
//! # Features
//!
//! - **Segmented** – the log is a directory of `<20-digit-index>.wal`
//!   files; the unique tail carries an `_END` mark in its name and is
//!   sealed by an atomic rename on rollover.
//! - **Durable** – every append extends the tail's memory map and flushes
//!   it before returning, so a completed `set` survives a process crash.
//! - **Recoverable** – reopening the directory rediscovers all segments,
//!   resumes the tail and replays its records.
//! - **Self-trimming** – a background retention task periodically removes
//!   the oldest segments, keeping a configurable number of recent ones.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use segwal::wal::SegmentedWal;
//! use segwal::{Mutation, WalReader, WalWriter};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Create the WAL handle (no filesystem access yet).
//!     //    • `period`   → retention sweep interval.
//!     //    • `low_mark` → newest segments a sweep preserves.
//!     //    • `cap`      → read-cache capacity, in segments.
//!     let wal = Arc::new(SegmentedWal::new(
//!         PathBuf::from("./wal_data"),
//!         Duration::from_secs(60),
//!         4,
//!         16,
//!     ));
//!
//!     // 2. Discover existing segments (or create segment 0) and open the
//!     //    tail for appends.
//!     wal.open().await?;
//!
//!     // 3. Append a batch – written as one contiguous, durable region.
//!     wal.set(&[
//!         Mutation::put(b"hello".to_vec(), b"world".to_vec()),
//!         Mutation::delete(b"stale".to_vec()),
//!     ])
//!     .await?;
//!
//!     // 4. Read a segment back as decoded records.
//!     for entry in wal.read_converted(0).await? {
//!         println!("{:?} deleted={}", entry.key, entry.deleted);
//!     }
//!
//!     // 5. Run retention in the background; stop it via the watch channel.
//!     let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//!     let sweeper = wal.spawn_retention(stop_rx);
//!
//!     stop_tx.send(true)?;
//!     sweeper.await?;
//!     wal.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Recovery
//!
//! To resume after a restart, construct a new [`SegmentedWal`](wal::SegmentedWal)
//! over the same directory and call `open`. Discovery parses every `.wal`
//! filename, picks the `_END`-marked file as the tail (falling back to the
//! highest index when the mark is missing) and warms the tail's in-memory
//! shadow from disk. Partial trailing bytes in the tail surface as a
//! [`WalError::CorruptRecord`] when decoded; records before the corruption
//! point remain readable through [`record::records`].

#[cfg(test)]
mod tests;

mod reader;
mod segment;
mod types;
mod writer;
pub mod record;
pub mod wal;

pub use types::*;
