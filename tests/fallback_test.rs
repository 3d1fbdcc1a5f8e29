use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use std::process::Command;

fn manifest() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(
        file.as_file(),
        &json!({
            "machines": [{
                "id": "toggle",
                "name": "Toggle",
                "states": ["off", "on"],
                "transitions": {"off": ["on"]},
                "initial_state": "off",
                "terminal_states": ["on"]
            }],
            "entities": [{"alias": "switch", "machine": "toggle"}],
            "events": [{"entity": "switch", "event_type": "flip"}]
        }),
    )
    .unwrap();
    file
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let manifest = manifest();

    let mut cmd = Command::new(cargo_bin!("evolvd"));
    cmd.arg(manifest.path()).arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("switch,toggle,on,"))
        .stderr(predicate::str::contains(
            "'storage-rocksdb' feature is not enabled; falling back to in-memory storage",
        ));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let manifest = manifest();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("evolvd"));
    cmd.arg(manifest.path()).arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("falling back").not());
}
