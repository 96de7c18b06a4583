mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use liveset_index::core::models::{MatchTier, ProjectStatus};
use liveset_index::indexer::{path_key, Indexer};
use liveset_index::progress::NoProgress;
use liveset_index::scan;
use liveset_index::watch::{self, WatchEvent, WatchKind};

use common::{live_set, write_set, TestEnv};

async fn indexed(env: &TestEnv) -> Indexer {
    let indexer = Indexer::open(&env.config()).await.unwrap();
    scan::scan(&indexer, None, Arc::new(NoProgress), &CancellationToken::new())
        .await
        .unwrap();
    indexer
}

/// Feeds `events` through the consumer and waits for it to drain. Closing
/// the channel flushes the pending batch and stops the consumer.
async fn drain(indexer: &Indexer, events: Vec<(&PathBuf, WatchKind)>) {
    let (tx, rx) = mpsc::channel(16);
    let consumer = tokio::spawn(watch::consume(
        indexer.clone(),
        rx,
        Duration::from_millis(20),
        CancellationToken::new(),
    ));
    for (path, kind) in events {
        tx.send(WatchEvent {
            path: path.clone(),
            kind,
        })
        .await
        .unwrap();
    }
    drop(tx);
    consumer.await.unwrap();
}

async fn status_of(indexer: &Indexer, path: &Path) -> Option<ProjectStatus> {
    indexer
        .store()
        .get_project_by_path(&path_key(path))
        .await
        .unwrap()
        .map(|r| r.status)
}

#[tokio::test]
async fn deleted_file_is_kept_as_missing() {
    let env = TestEnv::new("");
    let path = env.music.join("Song/Song.als");
    write_set(&path, &live_set(120.0, &["Serum"], &[]));
    let indexer = indexed(&env).await;

    fs::remove_file(&path).unwrap();
    drain(&indexer, vec![(&path, WatchKind::Deleted)]).await;

    assert_eq!(status_of(&indexer, &path).await, Some(ProjectStatus::Missing));
}

#[tokio::test]
async fn deleted_directory_expands_to_its_records() {
    let env = TestEnv::new("");
    let dir = env.music.join("Album");
    let one = dir.join("One/One.als");
    let two = dir.join("Two/Two.als");
    let kept = env.music.join("Single/Single.als");
    write_set(&one, &live_set(120.0, &[], &[]));
    write_set(&two, &live_set(96.0, &[], &[]));
    write_set(&kept, &live_set(140.0, &[], &[]));
    let indexer = indexed(&env).await;

    fs::remove_dir_all(&dir).unwrap();
    drain(&indexer, vec![(&dir, WatchKind::Deleted)]).await;

    assert_eq!(status_of(&indexer, &one).await, Some(ProjectStatus::Missing));
    assert_eq!(status_of(&indexer, &two).await, Some(ProjectStatus::Missing));
    assert_eq!(status_of(&indexer, &kept).await, Some(ProjectStatus::Active));
}

#[tokio::test]
async fn created_directory_is_walked() {
    let env = TestEnv::new("");
    let indexer = indexed(&env).await;

    let dir = env.music.join("Fresh");
    let a = dir.join("A/A.als");
    let b = dir.join("B.als");
    write_set(&a, &live_set(120.0, &[], &[]));
    write_set(&b, &live_set(100.0, &[], &[]));
    drain(&indexer, vec![(&dir, WatchKind::Created)]).await;

    assert_eq!(status_of(&indexer, &a).await, Some(ProjectStatus::Active));
    assert_eq!(status_of(&indexer, &b).await, Some(ProjectStatus::Active));
}

#[tokio::test]
async fn burst_on_one_path_settles_on_the_last_state() {
    let env = TestEnv::new("");
    let path = env.music.join("Draft/Draft.als");
    write_set(&path, &live_set(120.0, &[], &[]));
    let indexer = indexed(&env).await;

    write_set(&path, &live_set(87.0, &[], &[]));
    drain(
        &indexer,
        vec![
            (&path, WatchKind::Modified),
            (&path, WatchKind::Modified),
            (&path, WatchKind::Modified),
        ],
    )
    .await;

    let record = indexer
        .store()
        .get_project_by_path(&path_key(&path))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.metadata.unwrap().tempo, Some(87.0));
}

#[tokio::test]
async fn new_audio_file_is_linked_without_a_scan() {
    let env = TestEnv::new("");
    let set = env.music.join("MySong/MySong.als");
    write_set(&set, &live_set(120.0, &[], &[]));
    let indexer = indexed(&env).await;
    let id = indexer.snapshot().await.unwrap()[0].id;
    assert!(indexer.store().exports_for_project(id).await.unwrap().is_empty());

    let wav = env.music.join("MySong/MySong.wav");
    fs::write(&wav, b"RIFF").unwrap();
    drain(&indexer, vec![(&wav, WatchKind::Created)]).await;

    let exports = indexer.store().exports_for_project(id).await.unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].tier, Some(MatchTier::Exact));
}

#[tokio::test]
async fn events_outside_locations_are_ignored() {
    let env = TestEnv::new("");
    let indexer = indexed(&env).await;
    let outside = env.tmp.path().join("elsewhere.als");
    write_set(&outside, &live_set(120.0, &[], &[]));

    drain(&indexer, vec![(&outside, WatchKind::Created)]).await;
    assert!(indexer.snapshot().await.unwrap().is_empty());
}
