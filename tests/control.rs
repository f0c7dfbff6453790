use std::sync::Barrier;
use std::thread;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use catalog_sync::control::{ControlStore, MemoryControlStore};
use catalog_sync::domain::{Claim, DownloadStatus};
use catalog_sync::error::SyncError;
use catalog_sync::store::SqliteControlStore;

fn sqlite_store(temp: &tempfile::TempDir) -> SqliteControlStore {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("control.db")).unwrap();
    SqliteControlStore::open(path).unwrap()
}

fn exercise_lifecycle(store: &dyn ControlStore) {
    assert_eq!(store.status("xubh-q36u", "2024-01-01").unwrap(), None);

    assert_eq!(store.claim("xubh-q36u", "2024-01-01").unwrap(), Claim::Inserted);
    assert_eq!(
        store.status("xubh-q36u", "2024-01-01").unwrap(),
        Some(DownloadStatus::Processing)
    );
    assert_eq!(
        store.claim("xubh-q36u", "2024-01-01").unwrap(),
        Claim::Busy(DownloadStatus::Processing)
    );

    assert!(
        store
            .transition(
                "xubh-q36u",
                "2024-01-01",
                DownloadStatus::Processing,
                DownloadStatus::Failed
            )
            .unwrap()
    );
    assert_eq!(store.claim("xubh-q36u", "2024-01-01").unwrap(), Claim::Retried);
    assert!(
        store
            .transition(
                "xubh-q36u",
                "2024-01-01",
                DownloadStatus::Processing,
                DownloadStatus::Completed
            )
            .unwrap()
    );
    assert_eq!(
        store.claim("xubh-q36u", "2024-01-01").unwrap(),
        Claim::Busy(DownloadStatus::Completed)
    );

    // A guarded transition from the wrong state does nothing.
    assert!(
        !store
            .transition(
                "xubh-q36u",
                "2024-01-01",
                DownloadStatus::Processing,
                DownloadStatus::Failed
            )
            .unwrap()
    );

    let rows = store.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DownloadStatus::Completed);
    assert_eq!(
        store.latest_completed("xubh-q36u").unwrap().as_deref(),
        Some("2024-01-01")
    );
}

fn exercise_insert_and_update(store: &dyn ControlStore) {
    store
        .insert("a", "2024-01-01", DownloadStatus::Processing)
        .unwrap();
    assert_matches!(
        store.insert("a", "2024-01-01", DownloadStatus::Processing),
        Err(SyncError::DuplicateControlRow { .. })
    );
    store
        .insert("a", "2024-02-01", DownloadStatus::Processing)
        .unwrap();

    store
        .update("a", "2024-01-01", DownloadStatus::Completed)
        .unwrap();
    assert_matches!(
        store.update("a", "2099-01-01", DownloadStatus::Completed),
        Err(SyncError::MissingControlRow { .. })
    );

    assert_eq!(store.rows().unwrap().len(), 2);
    assert_eq!(
        store.latest_completed("a").unwrap().as_deref(),
        Some("2024-01-01")
    );
}

fn exercise_latest_completed(store: &dyn ControlStore) {
    for (last_modified, status) in [
        ("2023-11-30", DownloadStatus::Completed),
        ("2024-04-15", DownloadStatus::Completed),
        ("2024-02-01", DownloadStatus::Completed),
        ("2024-09-01", DownloadStatus::Failed),
        ("2024-10-01", DownloadStatus::Processing),
    ] {
        store.insert("dataset", last_modified, status).unwrap();
    }
    assert_eq!(
        store.latest_completed("dataset").unwrap().as_deref(),
        Some("2024-04-15")
    );
    assert_eq!(store.latest_completed("other").unwrap(), None);
}

#[test]
fn memory_store_lifecycle() {
    exercise_lifecycle(&MemoryControlStore::new());
}

#[test]
fn sqlite_store_lifecycle() {
    let temp = tempfile::tempdir().unwrap();
    exercise_lifecycle(&sqlite_store(&temp));
}

#[test]
fn memory_store_insert_and_update() {
    exercise_insert_and_update(&MemoryControlStore::new());
}

#[test]
fn sqlite_store_insert_and_update() {
    let temp = tempfile::tempdir().unwrap();
    exercise_insert_and_update(&sqlite_store(&temp));
}

#[test]
fn memory_store_latest_completed() {
    exercise_latest_completed(&MemoryControlStore::new());
}

#[test]
fn sqlite_store_latest_completed() {
    let temp = tempfile::tempdir().unwrap();
    exercise_latest_completed(&sqlite_store(&temp));
}

#[test]
fn sqlite_rows_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    {
        let store = sqlite_store(&temp);
        store.claim("a", "2024-01-01").unwrap();
        store
            .transition(
                "a",
                "2024-01-01",
                DownloadStatus::Processing,
                DownloadStatus::Completed,
            )
            .unwrap();
    }
    let store = sqlite_store(&temp);
    assert_eq!(
        store.status("a", "2024-01-01").unwrap(),
        Some(DownloadStatus::Completed)
    );
}

fn race_claims(store: &dyn ControlStore, contenders: usize) -> Vec<Claim> {
    let barrier = Barrier::new(contenders);
    thread::scope(|scope| {
        let handles = (0..contenders)
            .map(|_| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    store.claim("race", "2024-07-01").unwrap()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}

#[test]
fn concurrent_claims_on_sqlite_have_one_winner() {
    let temp = tempfile::tempdir().unwrap();
    let store = sqlite_store(&temp);

    let claims = race_claims(&store, 8);
    let winners = claims
        .iter()
        .filter(|claim| **claim == Claim::Inserted)
        .count();
    assert_eq!(winners, 1);
    assert!(
        claims
            .iter()
            .all(|claim| matches!(claim, Claim::Inserted | Claim::Busy(DownloadStatus::Processing)))
    );
    assert_eq!(store.rows().unwrap().len(), 1);
}

#[test]
fn concurrent_claims_in_memory_have_one_winner() {
    let store = MemoryControlStore::new();
    let claims = race_claims(&store, 8);
    assert_eq!(
        claims
            .iter()
            .filter(|claim| **claim == Claim::Inserted)
            .count(),
        1
    );
    assert_eq!(store.rows().unwrap().len(), 1);
}

#[test]
fn concurrent_retries_of_a_failed_version_have_one_winner() {
    let temp = tempfile::tempdir().unwrap();
    let store = sqlite_store(&temp);
    store
        .insert("race", "2024-07-01", DownloadStatus::Failed)
        .unwrap();

    let claims = race_claims(&store, 6);
    assert_eq!(
        claims
            .iter()
            .filter(|claim| **claim == Claim::Retried)
            .count(),
        1
    );
    assert_eq!(store.rows().unwrap().len(), 1);
}
