// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn file_storage_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let storage = FileStorage::new(tmp.path().join("state"));

    assert_eq!(storage.get("tenure.session")?, None);
    storage.set("tenure.session", r#"{"a":1}"#)?;
    assert_eq!(storage.get("tenure.session")?.as_deref(), Some(r#"{"a":1}"#));

    storage.set("tenure.session", "{}")?;
    assert_eq!(storage.get("tenure.session")?.as_deref(), Some("{}"));
    Ok(())
}

#[test]
fn file_storage_leaves_no_tmp_files() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let storage = FileStorage::new(tmp.path());
    for i in 0..5 {
        storage.set("k", &format!("{i}"))?;
    }
    let names: Vec<String> = std::fs::read_dir(tmp.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["k.json".to_owned()]);
    Ok(())
}

#[test]
fn file_storage_remove_is_idempotent() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let storage = FileStorage::new(tmp.path());
    storage.set("k", "v")?;
    storage.remove("k")?;
    storage.remove("k")?;
    assert_eq!(storage.get("k")?, None);
    Ok(())
}

#[yare::parameterized(
    empty = { "" },
    traversal = { "../escape" },
    hidden = { ".hidden" },
    slash = { "a/b" },
)]
fn file_storage_rejects_bad_keys(key: &str) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let storage = FileStorage::new(tmp.path());
    assert!(storage.set(key, "v").is_err());
    assert!(storage.get(key).is_err());
}

#[test]
fn memory_storage_round_trip() -> anyhow::Result<()> {
    let storage = MemoryStorage::new();
    assert!(storage.is_empty());
    storage.set("k", "v")?;
    assert_eq!(storage.get("k")?.as_deref(), Some("v"));
    assert_eq!(storage.len(), 1);
    storage.remove("k")?;
    assert!(storage.is_empty());
    Ok(())
}
