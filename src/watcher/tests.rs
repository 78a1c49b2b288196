//! Tests for the watcher module

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind};
use proptest::prelude::*;
use tempfile::tempdir;

use crate::error::{DockhandError, DockhandResult};

use super::event::{WatchEvent, WatchOptions};
use super::executor::RestartExecutor;
use super::map::ServiceMap;
use super::tracker::ChangeTracker;
use super::watch::WatchSession;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Restart(String),
    RebuildAgent,
}

/// Executor that records calls instead of touching a container
#[derive(Clone, Default)]
struct RecordingExecutor {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: HashSet<String>,
}

impl RecordingExecutor {
    fn failing(services: &[&str]) -> Self {
        Self {
            failing: services.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl RestartExecutor for RecordingExecutor {
    fn restart(&self, service: &str) -> DockhandResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Restart(service.to_string()));
        if self.failing.contains(service) {
            return Err(DockhandError::CommandFailed {
                command: format!("systemctl restart {}", service),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }

    fn rebuild_agent(&self) -> DockhandResult<()> {
        self.calls.lock().unwrap().push(Call::RebuildAgent);
        Ok(())
    }
}

fn services(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn two_package_map(root: &std::path::Path) -> ServiceMap {
    ServiceMap::from_parts([
        (
            "pkg_a".to_string(),
            root.join("pkg_a"),
            services(&["svc1"]),
        ),
        (
            "pkg_b".to_string(),
            root.join("pkg_b"),
            services(&["svc1", "svc2"]),
        ),
    ])
}

fn options(interval_ms: u64, rebuild_agent: bool) -> WatchOptions {
    WatchOptions {
        interval: Duration::from_millis(interval_ms),
        rebuild_agent,
        agent_service: "agent".to_string(),
    }
}

// --- ChangeTracker ---

#[test]
fn test_tracker_drain_on_empty_returns_empty() {
    let tracker = ChangeTracker::new();
    assert!(tracker.drain().is_empty());
    assert!(tracker.is_empty());
}

#[test]
fn test_tracker_double_mark_dedupes() {
    let tracker = ChangeTracker::new();
    tracker.mark(["svc1"]);
    tracker.mark(["svc1"]);
    assert_eq!(tracker.len(), 1);

    let drained = tracker.drain();
    assert_eq!(drained.len(), 1);
    assert!(drained.contains("svc1"));
}

#[test]
fn test_tracker_merges_marks_from_multiple_packages() {
    let tracker = ChangeTracker::new();
    tracker.mark(["svc1"]);
    tracker.mark(["svc1", "svc2"]);

    let drained = tracker.drain();
    assert_eq!(drained, HashSet::from(["svc1".to_string(), "svc2".to_string()]));
    assert!(tracker.drain().is_empty());
}

#[test]
fn test_tracker_mark_after_drain_lands_in_next_drain() {
    let tracker = ChangeTracker::new();
    tracker.mark(["svc1"]);
    assert!(tracker.drain().contains("svc1"));

    tracker.mark(["svc1"]);
    assert!(tracker.drain().contains("svc1"));
}

#[test]
fn test_tracker_concurrent_marks_are_never_lost() {
    let tracker = Arc::new(ChangeTracker::new());
    let mut handles = Vec::new();
    for i in 0..8 {
        let tracker = Arc::clone(&tracker);
        handles.push(thread::spawn(move || {
            for j in 0..50 {
                tracker.mark([format!("svc-{}-{}", i, j)]);
            }
        }));
    }

    // Drain concurrently with the producers
    let mut seen: HashSet<String> = HashSet::new();
    for _ in 0..20 {
        seen.extend(tracker.drain());
        thread::sleep(Duration::from_millis(1));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    seen.extend(tracker.drain());

    assert_eq!(seen.len(), 8 * 50);
}

proptest! {
    /// Sequential marks and drains behave like a set: every drain returns
    /// exactly what was marked since the previous drain.
    #[test]
    fn prop_tracker_matches_set_model(ops in proptest::collection::vec((any::<bool>(), 0u8..8), 0..64)) {
        let tracker = ChangeTracker::new();
        let mut model: HashSet<String> = HashSet::new();

        for (is_drain, service) in ops {
            if is_drain {
                let drained = tracker.drain();
                prop_assert_eq!(&drained, &model);
                model.clear();
            } else {
                let name = format!("svc{}", service);
                tracker.mark([name.clone()]);
                model.insert(name);
            }
        }
        prop_assert_eq!(tracker.drain(), model);
    }
}

// --- ServiceMap ---

#[test]
fn test_map_lookups() {
    let map = two_package_map(std::path::Path::new("/src"));
    assert_eq!(map.len(), 2);
    assert_eq!(
        map.services_for("pkg_b").unwrap(),
        &services(&["svc1", "svc2"])
    );
    assert_eq!(map.path_for("pkg_a").unwrap(), PathBuf::from("/src/pkg_a"));
}

#[test]
fn test_map_unknown_package() {
    let map = two_package_map(std::path::Path::new("/src"));
    assert!(matches!(
        map.services_for("nope"),
        Err(DockhandError::UnknownPackage { .. })
    ));
}

#[test]
fn test_map_package_for_path_prefers_deepest_root() {
    let map = ServiceMap::from_parts([
        (
            "outer".to_string(),
            PathBuf::from("/src/tree"),
            services(&["svc1"]),
        ),
        (
            "inner".to_string(),
            PathBuf::from("/src/tree/nested"),
            services(&["svc2"]),
        ),
    ]);
    assert_eq!(
        map.package_for_path(std::path::Path::new("/src/tree/nested/sub")),
        Some("inner")
    );
    assert_eq!(
        map.package_for_path(std::path::Path::new("/src/tree/other")),
        Some("outer")
    );
    assert_eq!(map.package_for_path(std::path::Path::new("/elsewhere")), None);
}

#[test]
fn test_map_from_config_joins_source_root() {
    let mut config = crate::config::Config::default();
    config.source_root = PathBuf::from("/checkout");
    let map = ServiceMap::from_config(&config);

    assert!(!map.is_empty());
    let path = map.path_for("rest_service").unwrap();
    assert!(path.starts_with("/checkout"));
}

// --- note_event classification ---

#[test]
fn test_directory_modify_event_marks_services() {
    let dir = tempdir().unwrap();
    let pkg_a = dir.path().join("pkg_a").join("sub");
    std::fs::create_dir_all(&pkg_a).unwrap();

    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(2000, false),
        RecordingExecutor::default(),
    );

    let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(pkg_a);
    session.note_event(&event, &|_| {});

    assert_eq!(session.tracker().drain(), HashSet::from(["svc1".to_string()]));
}

#[test]
fn test_file_modify_event_marks_nothing() {
    let dir = tempdir().unwrap();
    let pkg_a = dir.path().join("pkg_a");
    std::fs::create_dir_all(&pkg_a).unwrap();
    let file = pkg_a.join("module.py");
    std::fs::write(&file, "x = 1\n").unwrap();

    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(2000, false),
        RecordingExecutor::default(),
    );

    let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(file);
    session.note_event(&event, &|_| {});

    assert!(session.tracker().is_empty());
}

#[test]
fn test_non_modify_event_marks_nothing() {
    let dir = tempdir().unwrap();
    let pkg_a = dir.path().join("pkg_a");
    std::fs::create_dir_all(&pkg_a).unwrap();

    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(2000, false),
        RecordingExecutor::default(),
    );

    let event = Event::new(EventKind::Create(CreateKind::Folder)).add_path(pkg_a);
    session.note_event(&event, &|_| {});

    assert!(session.tracker().is_empty());
}

#[test]
fn test_event_outside_watched_roots_marks_nothing() {
    let dir = tempdir().unwrap();
    let elsewhere = dir.path().join("elsewhere");
    std::fs::create_dir_all(&elsewhere).unwrap();

    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(2000, false),
        RecordingExecutor::default(),
    );

    let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(elsewhere);
    session.note_event(&event, &|_| {});

    assert!(session.tracker().is_empty());
}

// --- run_batch ---

#[test]
fn test_batch_restarts_each_pending_service_once() {
    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, false),
        executor.clone(),
    );

    // Events under pkg_a then pkg_b before the tick
    session.tracker().mark(["svc1"]);
    session.tracker().mark(["svc1", "svc2"]);
    session.run_batch(&|_| {});

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&Call::Restart("svc1".to_string())));
    assert!(calls.contains(&Call::Restart("svc2".to_string())));
    assert!(session.tracker().is_empty());
}

#[test]
fn test_empty_batch_is_a_no_op() {
    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, false),
        executor.clone(),
    );

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    session.run_batch(&move |event| events_clone.lock().unwrap().push(event.to_json()));

    assert!(executor.calls().is_empty());
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn test_restart_failure_does_not_abort_the_batch() {
    let executor = RecordingExecutor::failing(&["svc1"]);
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, false),
        executor.clone(),
    );

    session.tracker().mark(["svc1", "svc2"]);

    let events: Arc<Mutex<Vec<WatchEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    session.run_batch(&move |event| events_clone.lock().unwrap().push(event));

    // Both services were attempted despite svc1 failing
    assert_eq!(executor.calls().len(), 2);

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::RestartFailed { service, .. } if service == "svc1")));
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::ServiceRestarted { service } if service == "svc2")));
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::BatchComplete { restarted: 1, failed: 1 })));
}

#[test]
fn test_failed_service_is_retried_when_marked_again() {
    let executor = RecordingExecutor::failing(&["svc1"]);
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, false),
        executor.clone(),
    );

    session.tracker().mark(["svc1"]);
    session.run_batch(&|_| {});
    // Not retried within the batch; marked again on the next change
    session.tracker().mark(["svc1"]);
    session.run_batch(&|_| {});

    assert_eq!(
        executor.calls(),
        vec![
            Call::Restart("svc1".to_string()),
            Call::Restart("svc1".to_string())
        ]
    );
}

#[test]
fn test_agent_pseudo_service_rebuilds_when_flag_set() {
    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, true),
        executor.clone(),
    );

    session.tracker().mark(["agent", "svc2"]);
    session.run_batch(&|_| {});

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&Call::RebuildAgent));
    assert!(calls.contains(&Call::Restart("svc2".to_string())));
}

#[test]
fn test_agent_pseudo_service_restarts_when_flag_unset() {
    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(std::path::Path::new("/src")),
        options(2000, false),
        executor.clone(),
    );

    session.tracker().mark(["agent"]);
    session.run_batch(&|_| {});

    assert_eq!(executor.calls(), vec![Call::Restart("agent".to_string())]);
}

// --- session loop ---

#[test]
fn test_run_flushes_pending_state_immediately() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg_a")).unwrap();
    std::fs::create_dir_all(dir.path().join("pkg_b")).unwrap();

    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(60_000, false),
        executor.clone(),
    );
    session.tracker().mark(["svc2"]);

    let events: Arc<Mutex<Vec<WatchEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);

    // Flag already false: the session still runs the first batch and exits
    let running = Arc::new(AtomicBool::new(false));
    session
        .run(running, move |event| {
            events_clone.lock().unwrap().push(event)
        })
        .unwrap();

    assert_eq!(executor.calls(), vec![Call::Restart("svc2".to_string())]);
    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(WatchEvent::WatchStarted { packages: 2, .. })));
    assert!(matches!(events.last(), Some(WatchEvent::Shutdown)));
}

#[test]
fn test_run_skips_missing_package_paths() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg_a")).unwrap();
    // pkg_b's path never exists

    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(60_000, false),
        RecordingExecutor::default(),
    );

    let events: Arc<Mutex<Vec<WatchEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    let running = Arc::new(AtomicBool::new(false));
    session
        .run(running, move |event| {
            events_clone.lock().unwrap().push(event)
        })
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::PackageSkipped { package, .. } if package == "pkg_b")));
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::WatchStarted { packages: 1, .. })));
}

#[test]
fn test_run_batches_marks_on_the_next_tick() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg_a")).unwrap();
    std::fs::create_dir_all(dir.path().join("pkg_b")).unwrap();

    let executor = RecordingExecutor::default();
    let session = WatchSession::new(
        two_package_map(dir.path()),
        options(200, false),
        executor.clone(),
    );
    let tracker = session.tracker();
    let running = Arc::new(AtomicBool::new(true));
    let running_loop = Arc::clone(&running);

    thread::scope(|scope| {
        let handle = scope.spawn(|| session.run(running_loop, |_| {}));

        // Mark after the immediate first batch, then wait past one interval
        thread::sleep(Duration::from_millis(100));
        tracker.mark(["svc1"]);
        thread::sleep(Duration::from_millis(500));

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    });

    assert_eq!(executor.calls(), vec![Call::Restart("svc1".to_string())]);
}

// --- events ---

#[test]
fn test_watch_event_json_started() {
    let event = WatchEvent::WatchStarted {
        packages: 3,
        interval_secs: 2,
    };
    let json = event.to_json();
    assert!(json.contains("\"event\":\"watch_started\""));
    assert!(json.contains("\"packages\":3"));
    assert!(json.contains("\"interval_secs\":2"));
}

#[test]
fn test_watch_event_json_restart_failed() {
    let event = WatchEvent::RestartFailed {
        service: "restservice".to_string(),
        message: "exec \"failed\"".to_string(),
    };
    let json = event.to_json();
    assert!(json.contains("\"event\":\"restart_failed\""));
    assert!(json.contains("\"service\":\"restservice\""));
    assert!(json.contains("\\\"failed\\\""));
}

#[test]
fn test_watch_event_json_shutdown() {
    assert_eq!(WatchEvent::Shutdown.to_json(), r#"{"event":"shutdown"}"#);
}
