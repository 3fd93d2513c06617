use chrono::{DateTime, Duration, TimeZone, Utc};
use sagecache::backup::{snapshot_name, BackupManager, RetentionPolicy};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

const PREFIX: &str = "sage_cache_info";

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

fn write_snapshot(dir: &std::path::Path, ts: DateTime<Utc>) -> PathBuf {
    let path = dir.join(snapshot_name(PREFIX, ts));
    fs::write(&path, format!("{{\"taken\":\"{ts}\"}}")).unwrap();
    path
}

#[test]
fn test_retention_over_thirty_days() {
    let dir = tempdir().unwrap();
    let now = at(30, 23);

    // Two per day for the last seven days, plus six older ones.
    let mut recent = Vec::new();
    for day in 24..=30 {
        for hour in [0, 1] {
            recent.push(write_snapshot(dir.path(), at(day, hour)));
        }
    }
    let mut old = Vec::new();
    for day in 1..=6 {
        old.push(write_snapshot(dir.path(), at(day, 12)));
    }
    assert_eq!(recent.len() + old.len(), 20);

    let manager = BackupManager::new(dir.path());
    let policy = RetentionPolicy {
        min_count: 7,
        min_days: 7,
    };
    let report = manager.prune(PREFIX, policy, now).unwrap();

    let expected_kept: Vec<PathBuf> = [
        at(30, 1),
        at(30, 0),
        at(29, 1),
        at(29, 0),
        at(28, 1),
        at(28, 0),
        at(27, 1),
        // Beyond the newest seven: one per day while younger than seven days
        at(27, 0),
        at(26, 1),
        at(25, 1),
        at(24, 1),
    ]
    .iter()
    .map(|ts| dir.path().join(snapshot_name(PREFIX, *ts)))
    .collect();

    let mut kept = report.retained.clone();
    kept.sort();
    let mut expected_sorted = expected_kept.clone();
    expected_sorted.sort();
    assert_eq!(kept, expected_sorted);
    assert_eq!(report.deleted.len(), 9);

    for path in &expected_kept {
        assert!(path.exists(), "{} should be kept", path.display());
    }
    for path in &old {
        assert!(!path.exists(), "{} should be deleted", path.display());
    }
}

#[test]
fn test_min_count_keeps_old_snapshots() {
    let dir = tempdir().unwrap();
    let now = at(30, 0);
    let files: Vec<PathBuf> = (1..=3).map(|day| write_snapshot(dir.path(), at(day, 0))).collect();

    let report = BackupManager::new(dir.path())
        .prune(PREFIX, RetentionPolicy::default(), now)
        .unwrap();

    assert!(report.deleted.is_empty());
    for path in files {
        assert!(path.exists());
    }
}

#[test]
fn test_backup_prunes_with_configured_policy() {
    let dir = tempdir().unwrap();
    let manager = BackupManager::new(dir.path()).with_policy(RetentionPolicy {
        min_count: 2,
        min_days: 0,
    });

    let start = at(1, 0);
    for i in 0..5 {
        manager
            .backup(PREFIX, &serde_json::json!({"rev": i}), start + Duration::hours(i))
            .unwrap();
    }

    let listed = manager.list(PREFIX).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].timestamp, start + Duration::hours(4));
    assert_eq!(listed[1].timestamp, start + Duration::hours(3));
}

#[test]
fn test_unparseable_names_are_left_alone() {
    let dir = tempdir().unwrap();
    let stray = dir.path().join(format!("{PREFIX}-latest.json"));
    fs::write(&stray, "{}").unwrap();
    write_snapshot(dir.path(), at(1, 0));

    let report = BackupManager::new(dir.path())
        .prune(
            PREFIX,
            RetentionPolicy {
                min_count: 0,
                min_days: 0,
            },
            at(30, 0),
        )
        .unwrap();

    assert_eq!(report.deleted.len(), 1);
    assert!(stray.exists());
}
