use chrono::Utc;
use proctab_daemon::error::StoreError;
use proctab_daemon::record::{ProcessRecord, ValidationErrors, UNKNOWN_NAME};
use proctab_daemon::retry::{Sleeper, DEFAULT_DELAY};
use proctab_daemon::store::memory::MemoryBackend;
use proctab_daemon::store::SnapshotStore;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

fn memory_store() -> (SnapshotStore, Arc<MemoryBackend>, RecordingSleeper) {
    let backend = Arc::new(MemoryBackend::new());
    let sleeper = RecordingSleeper::default();
    let store = SnapshotStore::new(Arc::clone(&backend)).with_sleeper(sleeper.clone());
    (store, backend, sleeper)
}

fn record(hostname: &str, pid: i64, name: &str) -> ProcessRecord {
    ProcessRecord::new(hostname, pid).with_name(name).with_usage(0.5, 1.0)
}

fn host_rows(store: &SnapshotStore, hostname: &str) -> Vec<ProcessRecord> {
    store
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|r| r.hostname == hostname)
        .collect()
}

#[test]
fn test_replace_succeeds_when_contention_clears_in_time() {
    let (store, backend, sleeper) = memory_store();
    backend.contend_next(3);

    let snapshot = vec![record("alpha", 1, "init"), record("alpha", 2, "sshd")];
    assert_eq!(store.replace_snapshot("alpha", snapshot.clone()).unwrap(), 2);

    assert_eq!(backend.write_attempts(), 4);
    assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![DEFAULT_DELAY; 3]);
    assert_eq!(host_rows(&store, "alpha"), snapshot);
}

#[test]
fn test_replace_gives_up_after_five_attempts() {
    let (store, backend, sleeper) = memory_store();
    let before = vec![record("alpha", 1, "init")];
    store.replace_snapshot("alpha", before.clone()).unwrap();

    backend.contend_always();
    let result = store.replace_snapshot("alpha", vec![record("alpha", 9, "new")]);

    assert!(matches!(result, Err(StoreError::Unavailable { attempts: 5 })));
    assert_eq!(backend.write_attempts(), 1 + 5);
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 4);

    backend.contend_next(0);
    assert_eq!(host_rows(&store, "alpha"), before);
}

#[test]
fn test_append_is_retried_on_contention() {
    let (store, backend, sleeper) = memory_store();
    backend.contend_next(2);

    let batch = vec![record("alpha", 1, "init"), record("beta", 2, "cron")];
    assert_eq!(store.append_records(batch.clone()).unwrap(), 2);

    assert_eq!(backend.write_attempts(), 3);
    assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![DEFAULT_DELAY; 2]);
    assert_eq!(store.list_all().unwrap(), batch);
}

#[test]
fn test_unavailable_is_distinct_from_validation() {
    let (store, backend, _) = memory_store();
    backend.contend_always();
    let err = store.replace_snapshot("alpha", vec![record("alpha", 1, "init")]).unwrap_err();
    assert!(!matches!(err, StoreError::Validation(_)));
    assert!(!err.is_transient());

    let err = store.replace_snapshot("", vec![]).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn test_upload_rejects_whole_batch() {
    let (store, backend, _) = memory_store();
    let body = json!([
        {"hostname": "alpha", "pid": 1, "name": "init"},
        {"hostname": "alpha", "pid": 2, "name": "kthreadd"},
        {"hostname": "alpha", "pid": "not-a-pid", "name": "broken"},
        {"hostname": "alpha", "pid": 4, "name": "sshd"},
        {"hostname": "alpha", "pid": 5, "name": "cron"},
    ]);

    let err = store.upload(&body).unwrap_err();
    let StoreError::Validation(ValidationErrors::Records(errors)) = err else {
        panic!("expected per-record validation errors");
    };
    assert_eq!(errors.len(), 5);
    assert_eq!(errors[2]["pid"], vec!["A valid integer is required.".to_string()]);
    assert!(errors.iter().enumerate().all(|(i, e)| i == 2 || e.is_empty()));

    assert!(store.list_all().unwrap().is_empty());
    assert_eq!(backend.write_attempts(), 0);
}

#[test]
fn test_upload_reports_every_bad_field() {
    let (store, _, _) = memory_store();
    let body = json!([{"hostname": "", "cpu_usage": -1.0, "memory_usage": "lots", "timestamp": "soon"}]);

    let StoreError::Validation(errors) = store.upload(&body).unwrap_err() else {
        panic!("expected validation error");
    };
    assert_eq!(
        serde_json::to_value(&errors).unwrap(),
        json!([{
            "hostname": ["This field may not be blank."],
            "pid": ["This field is required."],
            "cpu_usage": ["Ensure this value is greater than or equal to 0."],
            "memory_usage": ["A valid number is required."],
            "timestamp": ["Datetime has wrong format. Use one of these formats instead: YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z]."],
        }])
    );
}

#[test]
fn test_upload_rejects_non_list_body() {
    let (store, _, _) = memory_store();
    let err = store.upload(&json!({"hostname": "alpha", "pid": 1})).unwrap_err();
    let StoreError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(
        serde_json::to_value(&errors).unwrap(),
        json!({"non_field_errors": ["Expected a list of items but got type \"dict\"."]})
    );
}

#[test]
fn test_upload_applies_defaults() {
    let (store, _, _) = memory_store();
    let before = Utc::now();
    let body = json!([
        {"hostname": "alpha", "pid": 42, "name": null, "parent_pid": null},
        {"hostname": "alpha", "pid": "43", "name": "", "cpu_usage": "2.5", "timestamp": "2024-05-01T12:30:00.500000"},
    ]);
    assert_eq!(store.upload(&body).unwrap(), 2);
    let after = Utc::now();

    let rows = store.list_all().unwrap();
    assert_eq!(rows[0].name, UNKNOWN_NAME);
    assert_eq!(rows[0].parent_pid, None);
    assert_eq!(rows[0].cpu_usage, 0.0);
    assert_eq!(rows[0].memory_usage, 0.0);
    assert!(rows[0].timestamp >= before && rows[0].timestamp <= after);

    assert_eq!(rows[1].pid, 43);
    assert_eq!(rows[1].name, UNKNOWN_NAME);
    assert_eq!(rows[1].cpu_usage, 2.5);
    assert_eq!(rows[1].timestamp.to_rfc3339(), "2024-05-01T12:30:00.500+00:00");
}

#[test]
fn test_empty_upload_is_accepted() {
    let (store, backend, _) = memory_store();
    assert_eq!(store.upload(&json!([])).unwrap(), 0);
    assert_eq!(backend.write_attempts(), 1);
}

#[test]
fn test_replace_rejects_foreign_hostname() {
    let (store, backend, _) = memory_store();
    let err = store
        .replace_snapshot("alpha", vec![record("alpha", 1, "init"), record("beta", 2, "cron")])
        .unwrap_err();
    let StoreError::Validation(ValidationErrors::Records(errors)) = err else {
        panic!("expected per-record validation errors");
    };
    assert!(errors[0].is_empty());
    assert_eq!(errors[1]["hostname"], vec!["Expected \"alpha\".".to_string()]);
    assert_eq!(backend.write_attempts(), 0);
}

#[test]
fn test_replace_normalizes_blank_names() {
    let (store, _, _) = memory_store();
    store.replace_snapshot("alpha", vec![record("alpha", 1, "  ")]).unwrap();
    assert_eq!(host_rows(&store, "alpha")[0].name, UNKNOWN_NAME);
}

#[test]
fn test_replace_rejects_invalid_usage() {
    let (store, _, _) = memory_store();
    let bad = ProcessRecord::new("alpha", 1).with_usage(f64::NAN, -3.0);
    let StoreError::Validation(ValidationErrors::Records(errors)) =
        store.replace_snapshot("alpha", vec![bad]).unwrap_err()
    else {
        panic!("expected per-record validation errors");
    };
    assert!(errors[0].contains_key("cpu_usage"));
    assert!(errors[0].contains_key("memory_usage"));
}

#[test]
fn test_duplicate_pids_are_kept() {
    let (store, _, _) = memory_store();
    let snapshot = vec![record("alpha", 7, "first"), record("alpha", 7, "second")];
    assert_eq!(store.replace_snapshot("alpha", snapshot).unwrap(), 2);
    assert_eq!(host_rows(&store, "alpha").len(), 2);
}

#[test]
fn test_clear_all_scope() {
    let (store, backend, _) = memory_store();
    store.replace_snapshot("alpha", vec![record("alpha", 1, "a")]).unwrap();
    store.replace_snapshot("beta", vec![record("beta", 1, "b"), record("beta", 2, "c")]).unwrap();

    backend.contend_next(1);
    assert_eq!(store.clear_all().unwrap(), 3);
    assert!(host_rows(&store, "alpha").is_empty());
    assert!(host_rows(&store, "beta").is_empty());
}

#[test]
fn test_closed_store_is_not_retried() {
    let (store, backend, sleeper) = memory_store();
    store.close().unwrap();
    assert!(matches!(store.append_records(vec![record("alpha", 1, "a")]), Err(StoreError::Closed)));
    assert!(matches!(store.list_all(), Err(StoreError::Closed)));
    assert_eq!(backend.write_attempts(), 0);
    assert!(sleeper.sleeps.lock().unwrap().is_empty());
}
