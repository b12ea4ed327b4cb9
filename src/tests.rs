use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;

use crate::{
    record,
    segment::{segment_filename, tail_filename},
    types::{Mutation, WalError, WalReader, WalWriter},
    wal::SegmentedWal,
};

fn new_wal(root: &Path) -> SegmentedWal {
    SegmentedWal::new(root.to_path_buf(), Duration::from_secs(60), 2, 8)
}

fn end_marked_files(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.unwrap().file_name().into_string().ok())
        .filter(|n| n.ends_with("_END.wal"))
        .collect()
}

#[tokio::test]
async fn fresh_open_creates_segment_zero() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();

    let tail = dir.path().join(tail_filename(0));
    assert!(tail.exists());
    assert_eq!(std::fs::metadata(&tail).unwrap().len(), 0);
    assert_eq!(wal.segment_count().await, 1);
    assert_eq!(wal.last_index().await, 0);
    assert_eq!(wal.tail_path().await.unwrap(), tail);
}

#[tokio::test]
async fn single_append_is_durable_and_decodable() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();

    wal.set(&[Mutation::put(b"k".to_vec(), b"v".to_vec())])
        .await
        .unwrap();

    let tail = dir.path().join(tail_filename(0));
    assert_eq!(
        std::fs::metadata(&tail).unwrap().len() as usize,
        record::HEADER_SIZE + 2
    );

    let entries = wal.read_converted(0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, b"k");
    assert_eq!(entries[0].value, vec![0x76]);
    assert!(!entries[0].deleted);
    assert_eq!(entries[0].crc, crc32fast::hash(b"v"));
}

#[tokio::test]
async fn batch_append_is_one_contiguous_region() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();

    wal.set(&[
        Mutation::put(b"a".to_vec(), b"1".to_vec()),
        Mutation {
            key: b"b".to_vec(),
            value: b"2".to_vec(),
            deleted: true,
        },
    ])
    .await
    .unwrap();

    let tail = dir.path().join(tail_filename(0));
    assert_eq!(
        std::fs::metadata(&tail).unwrap().len() as usize,
        2 * (record::HEADER_SIZE + 2)
    );

    let entries = wal.read_converted(0).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, b"a");
    assert!(!entries[0].deleted);
    assert_eq!(entries[1].key, b"b");
    assert!(entries[1].deleted);
}

#[tokio::test]
async fn rollover_seals_the_tail_and_starts_a_new_one() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    wal.set(&[Mutation::put(b"k".to_vec(), b"v".to_vec())])
        .await
        .unwrap();

    wal.roll().await.unwrap();

    let sealed = dir.path().join(segment_filename(0));
    let new_tail = dir.path().join(tail_filename(1));
    assert!(sealed.exists());
    assert!(!dir.path().join(tail_filename(0)).exists());
    assert!(new_tail.exists());
    assert_eq!(std::fs::metadata(&new_tail).unwrap().len(), 0);
    assert_eq!(wal.segment_count().await, 2);
    assert_eq!(wal.last_index().await, 1);
    assert_eq!(end_marked_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn sealed_segments_are_read_through_the_cache() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    wal.set(&[Mutation::put(b"old".to_vec(), b"data".to_vec())])
        .await
        .unwrap();
    wal.roll().await.unwrap();
    wal.set(&[Mutation::put(b"new".to_vec(), b"data".to_vec())])
        .await
        .unwrap();

    let from_disk = wal.read(0).await.unwrap();
    let entries = record::decode(&from_disk).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, b"old");

    // A second read must not touch the file again: remove it and expect the
    // cached bytes back.
    std::fs::remove_file(dir.path().join(segment_filename(0))).unwrap();
    let from_cache = wal.read(0).await.unwrap();
    assert_eq!(from_cache, from_disk);
}

#[tokio::test]
async fn tail_shadow_stays_coherent_with_disk() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    wal.set(&[Mutation::put(b"k1".to_vec(), b"v1".to_vec())])
        .await
        .unwrap();
    wal.set(&[Mutation::put(b"k2".to_vec(), b"v2".to_vec())])
        .await
        .unwrap();

    let on_disk = std::fs::read(wal.tail_path().await.unwrap()).unwrap();
    let inner = wal.inner.lock().await;
    let tail_segment = inner.segments.last().unwrap();
    assert_eq!(tail_segment.size(), on_disk.len() as u64);
    assert_eq!(tail_segment.data(), on_disk.as_slice());
}

#[tokio::test]
async fn read_beyond_the_tail_returns_tail_bytes() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    wal.set(&[Mutation::put(b"k".to_vec(), b"v".to_vec())])
        .await
        .unwrap();

    let tail_bytes = wal.read(0).await.unwrap();
    assert_eq!(wal.read(99).await.unwrap(), tail_bytes);
}

#[tokio::test]
async fn read_of_missing_sealed_index_fails() {
    let dir = tempdir().unwrap();
    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    wal.roll().await.unwrap();
    wal.roll().await.unwrap();

    // Indices below the tail that were never written are not found.
    assert!(matches!(
        wal.read(-3).await,
        Err(WalError::SegmentNotFound(-3))
    ));
}

#[tokio::test]
async fn reopen_recovers_tail_and_records() {
    let dir = tempdir().unwrap();
    {
        let wal = new_wal(dir.path());
        wal.open().await.unwrap();
        wal.set(&[
            Mutation::put(b"a".to_vec(), b"1".to_vec()),
            Mutation::put(b"b".to_vec(), b"2".to_vec()),
        ])
        .await
        .unwrap();
        wal.close().await.unwrap();
    }

    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    assert_eq!(wal.last_index().await, 0);
    assert_eq!(wal.segment_count().await, 1);

    let entries = wal.read_converted(0).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, b"a");
    assert_eq!(entries[1].key, b"b");

    // The recovered tail keeps accepting appends.
    wal.set(&[Mutation::put(b"c".to_vec(), b"3".to_vec())])
        .await
        .unwrap();
    assert_eq!(wal.read_converted(0).await.unwrap().len(), 3);
}

#[tokio::test]
async fn reopen_across_rollover_reads_sealed_segments() {
    let dir = tempdir().unwrap();
    {
        let wal = new_wal(dir.path());
        wal.open().await.unwrap();
        wal.set(&[Mutation::put(b"sealed".to_vec(), b"x".to_vec())])
            .await
            .unwrap();
        wal.roll().await.unwrap();
        wal.set(&[Mutation::put(b"tail".to_vec(), b"y".to_vec())])
            .await
            .unwrap();
        wal.close().await.unwrap();
    }

    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    assert_eq!(wal.last_index().await, 1);
    assert_eq!(wal.segment_count().await, 2);
    assert_eq!(wal.read_converted(0).await.unwrap()[0].key, b"sealed");
    assert_eq!(wal.read_converted(1).await.unwrap()[0].key, b"tail");
}

#[tokio::test]
async fn truncated_tail_surfaces_corruption() {
    let dir = tempdir().unwrap();
    {
        let wal = new_wal(dir.path());
        wal.open().await.unwrap();
        wal.set(&[
            Mutation::put(b"a".to_vec(), b"1".to_vec()),
            Mutation::put(b"b".to_vec(), b"2".to_vec()),
        ])
        .await
        .unwrap();
        wal.close().await.unwrap();
    }

    // Chop the second record in half.
    let tail = dir.path().join(tail_filename(0));
    let file = std::fs::OpenOptions::new().write(true).open(&tail).unwrap();
    file.set_len(50).unwrap();
    drop(file);

    let wal = new_wal(dir.path());
    wal.open().await.unwrap();
    let err = wal.read_converted(0).await.unwrap_err();
    assert!(matches!(err, WalError::CorruptRecord(_)));

    // The intact first record is still salvageable from the raw bytes.
    let bytes = wal.read(0).await.unwrap();
    let mut iter = record::records(&bytes);
    assert_eq!(iter.next().unwrap().unwrap().key, b"a");
    assert!(iter.next().unwrap().is_err());
}
