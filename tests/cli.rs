mod common;

use std::path::Path;
use std::process::Command;

use common::{live_set, write_set, TestEnv};

fn run_lsi(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_lsi");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lsi binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_idempotent() {
    let env = TestEnv::new("");

    let (stdout, stderr, success) = run_lsi(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_lsi(&env.config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");

    let (stdout, _, success) = run_lsi(&env.config_path, &["locations", "--json"]);
    assert!(success);
    let locations = json(&stdout);
    assert_eq!(locations.as_array().unwrap().len(), 1);
    assert_eq!(locations[0]["name"], "music");
}

#[test]
fn test_scan_then_rescan_is_unchanged() {
    let env = TestEnv::new("");
    write_set(&env.music.join("A/A.als"), &live_set(120.0, &["Serum"], &[]));
    write_set(&env.music.join("B/B.als"), &live_set(124.0, &["Serum"], &[]));

    let (stdout, stderr, success) =
        run_lsi(&env.config_path, &["scan", "--progress", "off", "--json"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    let first = json(&stdout);
    assert_eq!(first["scan"]["total"]["added"], 2);
    assert_eq!(first["similarity"]["scored"], 1);

    let (stdout, _, success) = run_lsi(&env.config_path, &["scan", "--progress", "off", "--json"]);
    assert!(success);
    let second = json(&stdout);
    assert_eq!(second["scan"]["total"]["added"], 0);
    assert_eq!(second["scan"]["total"]["changed"], 0);
    assert_eq!(second["scan"]["total"]["unchanged"], 2);
}

#[test]
fn test_scan_unknown_location_fails() {
    let env = TestEnv::new("");
    let (_, stderr, success) = run_lsi(
        &env.config_path,
        &["scan", "--location", "nope", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("nope"), "stderr: {}", stderr);
}

#[test]
fn test_list_get_and_similar() {
    let env = TestEnv::new("");
    write_set(&env.music.join("A/A.als"), &live_set(120.0, &["Serum"], &["Eq8"]));
    write_set(&env.music.join("B/B.als"), &live_set(121.0, &["Serum"], &["Eq8"]));
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (stdout, _, success) = run_lsi(&env.config_path, &["list", "--status", "active", "--json"]);
    assert!(success);
    let records = json(&stdout);
    assert_eq!(records.as_array().unwrap().len(), 2);
    let id = records[0]["id"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_lsi(&env.config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("tempo:        120.00"), "got: {}", stdout);

    let path = env.music.join("A/A.als");
    let (stdout, _, success) = run_lsi(&env.config_path, &["get", path.to_str().unwrap(), "--json"]);
    assert!(success);
    assert_eq!(json(&stdout)["project"]["id"], id.as_str());

    let (stdout, _, success) = run_lsi(&env.config_path, &["similar", &id, "--k", "1", "--json"]);
    assert!(success);
    let matches = json(&stdout);
    assert_eq!(matches.as_array().unwrap().len(), 1);
    assert_eq!(matches[0]["name"], "B");

    let (_, stderr, success) = run_lsi(&env.config_path, &["similar", &id, "--min-score", "1.5"]);
    assert!(!success);
    assert!(stderr.contains("min-score"));
}

#[test]
fn test_exports_and_export_name_alias() {
    let env = TestEnv::new("");
    write_set(&env.music.join("Track 7/Track 7.als"), &live_set(120.0, &[], &[]));
    std::fs::write(env.music.join("Track 7/Night Drive.wav"), b"RIFF").unwrap();
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (stdout, _, success) = run_lsi(&env.config_path, &["exports", "--orphans", "--json"]);
    assert!(success);
    assert_eq!(json(&stdout).as_array().unwrap().len(), 1);

    let (stdout, _, _) = run_lsi(&env.config_path, &["list", "--json"]);
    let id = json(&stdout)[0]["id"].as_str().unwrap().to_string();
    let (stdout, stderr, success) =
        run_lsi(&env.config_path, &["set-export-name", &id, "Night Drive"]);
    assert!(success, "set-export-name failed: {} {}", stdout, stderr);

    let (stdout, _, _) = run_lsi(&env.config_path, &["exports", "--orphans", "--json"]);
    assert!(json(&stdout).as_array().unwrap().is_empty());
    let (stdout, _, _) = run_lsi(&env.config_path, &["exports", "--json"]);
    let exports = json(&stdout);
    assert_eq!(exports[0]["project_id"], id.as_str());
    assert_eq!(exports[0]["tier"], "exact");
}

#[test]
fn test_missing_then_purge() {
    let env = TestEnv::new("");
    let path = env.music.join("Old/Old.als");
    write_set(&path, &live_set(120.0, &[], &[]));
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (_, stderr, success) = run_lsi(&env.config_path, &["purge", path.to_str().unwrap()]);
    assert!(!success, "purging a live record must fail");
    assert!(stderr.contains("MISSING"), "stderr: {}", stderr);

    std::fs::remove_file(&path).unwrap();
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);
    let (stdout, _, _) = run_lsi(&env.config_path, &["list", "--status", "missing", "--json"]);
    assert_eq!(json(&stdout).as_array().unwrap().len(), 1);

    let (stdout, stderr, success) = run_lsi(&env.config_path, &["purge", path.to_str().unwrap()]);
    assert!(success, "purge failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Purged"));

    let (stdout, _, _) = run_lsi(&env.config_path, &["stats", "--json"]);
    assert_eq!(json(&stdout)["counts"]["projects"], 0);
}

#[test]
fn test_duplicates_text_output() {
    let env = TestEnv::new("");
    let xml = live_set(120.0, &["Serum"], &[]);
    write_set(&env.music.join("A/Song.als"), &xml);
    write_set(&env.music.join("B/Song.als"), &xml);
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (stdout, _, success) = run_lsi(&env.config_path, &["duplicates"]);
    assert!(success);
    assert!(stdout.contains("exact, 2 projects"), "got: {}", stdout);
}

#[test]
fn test_markers_text_and_csv() {
    let env = TestEnv::new("");
    let path = env.music.join("Song/Song.als");
    let xml = live_set(120.0, &[], &[]).replace(
        "</LiveSet>",
        r#"<Locators><Locators>
             <Locator Id="0"><Time Value="32"/><Name Value="Drop, big"/></Locator>
             <Locator Id="1"><Time Value="8"/><Name Value="Intro"/></Locator>
           </Locators></Locators></LiveSet>"#,
    );
    write_set(&path, &xml);
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (stdout, stderr, success) = run_lsi(&env.config_path, &["markers", path.to_str().unwrap()]);
    assert!(success, "markers failed: {} {}", stdout, stderr);
    assert_eq!(stdout, "00:04.000  Intro\n00:16.000  Drop, big\n");

    let out = env.tmp.path().join("song.csv");
    let (_, _, success) = run_lsi(
        &env.config_path,
        &[
            "markers",
            path.to_str().unwrap(),
            "--format",
            "csv",
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert!(success);
    let csv = std::fs::read_to_string(&out).unwrap();
    assert_eq!(csv, "Time,Text\n4.0,Intro\n16.0,\"Drop, big\"\n");
}

#[test]
fn test_markers_without_locators_fails() {
    let env = TestEnv::new("");
    let path = env.music.join("Bare/Bare.als");
    write_set(&path, &live_set(120.0, &[], &[]));
    run_lsi(&env.config_path, &["scan", "--progress", "off"]);

    let (_, stderr, success) = run_lsi(&env.config_path, &["markers", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("no markers"), "stderr: {}", stderr);
}
