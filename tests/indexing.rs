mod common;

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use liveset_index::analysis::{self, SimilarityPass};
use liveset_index::core::models::{MatchTier, ProjectStatus};
use liveset_index::core::similarity::ClusterKind;
use liveset_index::core::store::ProjectFilter;
use liveset_index::indexer::{Indexer, ScanSummary};
use liveset_index::progress::NoProgress;
use liveset_index::scan;

use common::{live_set, write_set, TestEnv};

async fn open(env: &TestEnv) -> Indexer {
    Indexer::open(&env.config()).await.unwrap()
}

async fn full_scan(indexer: &Indexer) -> ScanSummary {
    let report = scan::scan(indexer, None, Arc::new(NoProgress), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.locations.iter().all(|l| l.error.is_none()));
    report.total
}

async fn by_status(indexer: &Indexer, status: ProjectStatus) -> usize {
    indexer
        .store()
        .list_projects(&ProjectFilter {
            status: Some(status),
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn rescanning_unchanged_tree_commits_nothing() {
    let env = TestEnv::new("");
    write_set(&env.music.join("One/One.als"), &live_set(120.0, &["Serum"], &[]));
    write_set(&env.music.join("Two/Two.als"), &live_set(90.0, &[], &["Reverb"]));

    let indexer = open(&env).await;
    let first = full_scan(&indexer).await;
    assert_eq!(first.added, 2);

    let second = full_scan(&indexer).await;
    assert_eq!(second.mutations(), 0);
    assert_eq!(second.unchanged, 2);

    // A fresh process rebuilds its fingerprint cache from the database.
    drop(indexer);
    let reopened = open(&env).await;
    let third = full_scan(&reopened).await;
    assert_eq!(third.mutations(), 0);
    assert_eq!(third.unchanged, 2);
}

#[tokio::test]
async fn scanning_never_modifies_project_files() {
    let env = TestEnv::new("");
    let path = env.music.join("Song/Song.als");
    write_set(&path, &live_set(128.0, &["Serum"], &["Eq8"]));
    let before_bytes = fs::read(&path).unwrap();
    let before_mtime = fs::metadata(&path).unwrap().modified().unwrap();

    let indexer = open(&env).await;
    full_scan(&indexer).await;

    assert_eq!(fs::read(&path).unwrap(), before_bytes);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before_mtime);

    let records = indexer.snapshot().await.unwrap();
    assert_eq!(records.len(), 1);
    let meta = records[0].metadata.as_ref().unwrap();
    assert_eq!(meta.tempo, Some(128.0));
    assert!(meta.plugins.contains("serum"));
    assert!(meta.devices.contains("eq8"));
    assert_eq!(meta.tracks.audio, 1);
    assert_eq!(meta.tracks.midi, 1);
}

#[tokio::test]
async fn byte_identical_copies_form_an_exact_cluster() {
    let env = TestEnv::new("");
    let xml = live_set(124.0, &["Serum"], &["Compressor2"]);
    write_set(&env.music.join("Song/Song.als"), &xml);
    write_set(&env.music.join("Copies/Song copy.als"), &xml);
    write_set(&env.music.join("Other/Other.als"), &live_set(70.0, &["Kontakt"], &[]));

    let indexer = open(&env).await;
    full_scan(&indexer).await;

    let clusters = analysis::duplicates(&indexer).await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].kind, ClusterKind::Exact);
    assert_eq!(clusters[0].members.len(), 2);
    assert_eq!(
        clusters[0].members[0].content_hash,
        clusters[0].members[1].content_hash
    );
}

#[tokio::test]
async fn deleted_file_goes_missing_and_can_be_purged() {
    let env = TestEnv::new("");
    let path = env.music.join("Gone/Gone.als");
    write_set(&path, &live_set(100.0, &[], &[]));

    let indexer = open(&env).await;
    full_scan(&indexer).await;
    assert_eq!(by_status(&indexer, ProjectStatus::Active).await, 1);

    fs::remove_file(&path).unwrap();
    let summary = full_scan(&indexer).await;
    assert_eq!(summary.removed, 1);
    assert_eq!(by_status(&indexer, ProjectStatus::Missing).await, 1);

    let purged = indexer.purge(&path).await.unwrap();
    assert_eq!(purged.status, ProjectStatus::Missing);
    assert!(indexer.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_container_is_recorded_as_parse_failed() {
    let env = TestEnv::new("");
    fs::create_dir_all(env.music.join("Broken")).unwrap();
    fs::write(env.music.join("Broken/Broken.als"), b"definitely not gzip").unwrap();
    write_set(&env.music.join("Fine/Fine.als"), &live_set(120.0, &[], &[]));

    let indexer = open(&env).await;
    let summary = full_scan(&indexer).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.added, 1);

    let failed = indexer
        .store()
        .list_projects(&ProjectFilter {
            status: Some(ProjectStatus::ParseFailed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].metadata.is_none());
    assert!(failed[0].parse_error.is_some());

    // Unchanged bytes are not decoded again.
    let again = full_scan(&indexer).await;
    assert_eq!(again.mutations(), 0);
}

#[tokio::test]
async fn versioned_master_links_to_its_project() {
    let env = TestEnv::new("");
    write_set(&env.music.join("MySong/MySong.als"), &live_set(120.0, &[], &[]));
    fs::write(env.music.join("MySong/MySong_v2_master.wav"), b"RIFF").unwrap();
    fs::write(env.music.join("Unrelated Jam.wav"), b"RIFF").unwrap();

    let indexer = open(&env).await;
    full_scan(&indexer).await;

    let project = indexer.snapshot().await.unwrap().remove(0);
    let exports = indexer.store().exports_for_project(project.id).await.unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].name, "MySong_v2_master");
    assert_eq!(exports[0].tier, Some(MatchTier::Normalized));
    assert!(exports[0].confidence > 0.9);

    let orphans = indexer.store().list_exports(true).await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].name, "Unrelated Jam");
}

#[tokio::test]
async fn similar_ranks_shared_plugins_first() {
    let env = TestEnv::new("");
    write_set(
        &env.music.join("A/A.als"),
        &live_set(120.0, &["Serum", "ValhallaRoom"], &["Eq8"]),
    );
    write_set(
        &env.music.join("B/B.als"),
        &live_set(122.0, &["Serum", "ValhallaRoom"], &["Eq8"]),
    );
    write_set(
        &env.music.join("C/C.als"),
        &live_set(80.0, &["Serum"], &["Saturator", "Chorus2"]),
    );

    let indexer = open(&env).await;
    full_scan(&indexer).await;
    let pass = SimilarityPass::new(&indexer).run(&indexer).await.unwrap();
    assert_eq!(pass.scored, 3);

    let records = indexer.snapshot().await.unwrap();
    let a = records.iter().find(|r| r.name == "A").unwrap();
    let matches = analysis::similar(&indexer, a.id, 5, 0.0).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].name, "B");
    assert!(matches[0].score > matches[1].score);

    let strict = analysis::similar(&indexer, a.id, 5, 0.9).await.unwrap();
    assert_eq!(strict.len(), 1);
}

#[tokio::test]
async fn content_change_invalidates_cached_scores() {
    let env = TestEnv::new("");
    let a = env.music.join("A/A.als");
    write_set(&a, &live_set(120.0, &["Serum"], &[]));
    write_set(&env.music.join("B/B.als"), &live_set(120.0, &["Serum"], &[]));

    let indexer = open(&env).await;
    full_scan(&indexer).await;
    let pass = SimilarityPass::new(&indexer);
    assert_eq!(pass.run(&indexer).await.unwrap().scored, 1);
    assert_eq!(pass.run(&indexer).await.unwrap().kept, 1);

    write_set(&a, &live_set(140.0, &["Serum", "Massive"], &["Eq8"]));
    let summary = indexer.rescan_single(&a).await.unwrap();
    assert_eq!(summary.changed, 1);

    let after = pass.run(&indexer).await.unwrap();
    assert_eq!(after.kept, 0);
    assert_eq!(after.scored, 1);
}

#[tokio::test]
async fn rescan_rejects_paths_outside_locations() {
    let env = TestEnv::new("");
    let outside = env.tmp.path().join("elsewhere.als");
    write_set(&outside, &live_set(120.0, &[], &[]));

    let indexer = open(&env).await;
    let err = indexer.rescan_single(&outside).await.unwrap_err();
    assert!(err.to_string().contains("not under an active location"));
}
