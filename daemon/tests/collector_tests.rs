use proctab_daemon::collector::{take_snapshot, FixedCollector, ProcessSample, SkipReason};
use proctab_daemon::record::UNKNOWN_NAME;

#[test]
fn test_take_snapshot_drops_skipped_entries() {
    let collector = FixedCollector::new(vec![
        Ok(ProcessSample { name: Some("init".to_string()), ..ProcessSample::new(1) }),
        Err(SkipReason::Gone(2)),
        Err(SkipReason::AccessDenied(3)),
        Ok(ProcessSample::new(4)),
    ]);
    let snapshot = take_snapshot(&collector, "node1");
    let pids: Vec<i64> = snapshot.iter().map(|r| r.pid).collect();
    assert_eq!(pids, vec![1, 4]);
    assert!(snapshot.iter().all(|r| r.hostname == "node1"));
    assert_eq!(snapshot[0].name, "init");
}

#[test]
fn test_take_snapshot_applies_defaults() {
    let collector = FixedCollector::new(vec![Ok(ProcessSample {
        name: Some(String::new()),
        cpu_usage: Some(f64::NAN),
        memory_usage: None,
        ..ProcessSample::new(9)
    })]);
    let record = &take_snapshot(&collector, "node1")[0];
    assert_eq!(record.name, UNKNOWN_NAME);
    assert_eq!(record.cpu_usage, 0.0);
    assert_eq!(record.memory_usage, 0.0);
    assert_eq!(record.parent_pid, None);
}

#[test]
fn test_empty_scan_is_valid() {
    let collector = FixedCollector::default();
    assert!(take_snapshot(&collector, "node1").is_empty());
}

#[cfg(target_os = "linux")]
mod linux {
    use proctab_daemon::collector::{take_snapshot, LinuxProcessCollector, ProcessCollector, SkipReason};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_includes_current_process() {
        let collector = LinuxProcessCollector::new();
        let current_pid = std::process::id() as i64;
        let found = collector
            .scan()
            .filter_map(Result::ok)
            .any(|p| p.pid == current_pid);
        assert!(found, "Current process should be in the scan");
    }

    #[test]
    fn test_read_process_returns_current_process() {
        let collector = LinuxProcessCollector::new();
        let current_pid = std::process::id();
        let sample = collector.read_process(current_pid).unwrap();
        assert_eq!(sample.pid, current_pid as i64);
        assert!(sample.name.is_some());
        assert!(sample.parent_pid.is_some());
        assert!(sample.memory_usage.unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn test_read_process_reports_missing_pid_as_gone() {
        let collector = LinuxProcessCollector::new();
        assert_eq!(collector.read_process(999_999_999), Err(SkipReason::Gone(999_999_999)));
    }

    #[test]
    fn test_scan_of_fake_procfs() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("meminfo"), "MemTotal:        1000 kB\nMemFree: 10 kB\n").unwrap();
        fs::create_dir(root.path().join("1")).unwrap();
        fs::write(
            root.path().join("1/stat"),
            "1 (my (odd) init) S 0 1 1 0 -1 4194560 0 0 0 0 10 5 0 0 20 0 1 0 5 1000 25 0",
        )
        .unwrap();
        // Listed but exited before it could be read
        fs::create_dir(root.path().join("2")).unwrap();
        fs::create_dir(root.path().join("self")).unwrap();

        let collector = LinuxProcessCollector::with_root(root.path());
        let entries: Vec<_> = collector.scan().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], Err(SkipReason::Gone(2)));

        let snapshot = take_snapshot(&collector, "fake");
        assert_eq!(snapshot.len(), 1);
        let init = &snapshot[0];
        assert_eq!(init.pid, 1);
        assert_eq!(init.parent_pid, Some(0));
        assert_eq!(init.name, "my (odd) init");

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as f64;
        let expected = 25.0 * page_size / (1000.0 * 1024.0) * 100.0;
        assert!((init.memory_usage - expected).abs() < 1e-9);
    }

    #[test]
    fn test_huge_counters_do_not_overflow() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("meminfo"), format!("MemTotal: {} kB\n", u64::MAX)).unwrap();
        fs::create_dir(root.path().join("7")).unwrap();
        let max = u64::MAX;
        fs::write(
            root.path().join("7/stat"),
            format!("7 (hog) R 1 7 7 0 -1 0 0 0 0 0 {max} {max} 0 0 20 0 1 0 5 1000 {max} 0"),
        )
        .unwrap();

        let collector = LinuxProcessCollector::with_root(root.path());
        let sample = collector.read_process(7).unwrap();
        assert_eq!(sample.parent_pid, Some(1));
        let memory = sample.memory_usage.unwrap();
        assert!(memory.is_finite() && memory >= 0.0);
        // Second read takes the CPU delta path
        let sample = collector.read_process(7).unwrap();
        assert_eq!(sample.cpu_usage, Some(0.0));
    }
}
