//! The watch session: subscriptions, batching loop, restart dispatch
//!
//! One `notify` watcher delivers events from its own thread into an mpsc
//! channel; the session loop is the single consumer. It marks services on
//! directory modifications and drains the tracker on a fixed tick, so bursts
//! of events collapse into one restart per service per batch.
//!
//! A package subtree that disappears mid-session simply stops producing
//! events (the OS drops the subscription); remaining subscriptions continue.
//! This mirrors the skip-and-warn policy used for paths missing at startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::DockhandResult;

use super::event::{WatchEvent, WatchOptions};
use super::executor::RestartExecutor;
use super::map::ServiceMap;
use super::tracker::ChangeTracker;

/// How long the loop blocks on the event channel before checking the tick
/// deadline and the run flag
const POLL_MS: u64 = 50;

/// Runtime state for one invocation of the watch command
pub struct WatchSession<E: RestartExecutor> {
    map: ServiceMap,
    options: WatchOptions,
    executor: E,
    tracker: Arc<ChangeTracker>,
}

impl<E: RestartExecutor> WatchSession<E> {
    pub fn new(map: ServiceMap, options: WatchOptions, executor: E) -> Self {
        Self {
            map,
            options,
            executor,
            tracker: Arc::new(ChangeTracker::new()),
        }
    }

    /// Shared handle on the pending-restart set
    pub fn tracker(&self) -> Arc<ChangeTracker> {
        Arc::clone(&self.tracker)
    }

    /// Run until `running` goes false. Only watcher construction failures
    /// are fatal; everything inside the loop is reported and survived.
    pub fn run(
        &self,
        running: Arc<AtomicBool>,
        event_callback: impl Fn(WatchEvent),
    ) -> DockhandResult<()> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;

        let mut subscribed = 0usize;
        for package in self.map.package_ids() {
            let root = self.map.path_for(package)?;
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => subscribed += 1,
                Err(err) => event_callback(WatchEvent::PackageSkipped {
                    package: package.to_string(),
                    path: root.display().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        event_callback(WatchEvent::WatchStarted {
            packages: subscribed,
            interval_secs: self.options.interval.as_secs(),
        });

        // First batch runs at session start so latent pending state is
        // flushed promptly; later batches follow at interval boundaries.
        self.run_batch(&event_callback);
        let mut next_tick = Instant::now() + self.options.interval;

        while running.load(Ordering::SeqCst) {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(POLL_MS)) {
                self.note_event(&event, &event_callback);
            }

            if Instant::now() >= next_tick {
                self.run_batch(&event_callback);
                next_tick = Instant::now() + self.options.interval;
            }
        }

        event_callback(WatchEvent::Shutdown);
        Ok(())
    }

    /// Map a filesystem event to pending services. Only modification events
    /// on paths that are themselves directories count: editors and build
    /// tools touch many files in a burst, and the directory-level trigger
    /// collapses those bursts before batching dedupes them again.
    pub(crate) fn note_event(&self, event: &Event, event_callback: &impl Fn(WatchEvent)) {
        if !matches!(event.kind, EventKind::Modify(_)) {
            return;
        }
        for path in &event.paths {
            if !path.is_dir() {
                continue;
            }
            if let Some(package) = self.map.package_for_path(path) {
                if let Ok(services) = self.map.services_for(package) {
                    self.tracker.mark(services.iter().cloned());
                    event_callback(WatchEvent::ChangeDetected {
                        package: package.to_string(),
                    });
                }
            }
        }
    }

    /// Drain the tracker and restart each pending service once. Individual
    /// failures are reported and skipped; a persistently failing service is
    /// simply retried on the next detected change.
    pub(crate) fn run_batch(&self, event_callback: &impl Fn(WatchEvent)) {
        let pending = self.tracker.drain();
        if pending.is_empty() {
            return;
        }

        let mut restarted = 0usize;
        let mut failed = 0usize;
        for service in &pending {
            if *service == self.options.agent_service && self.options.rebuild_agent {
                match self.executor.rebuild_agent() {
                    Ok(()) => {
                        restarted += 1;
                        event_callback(WatchEvent::AgentRebuilt);
                    }
                    Err(err) => {
                        failed += 1;
                        event_callback(WatchEvent::AgentRebuildFailed {
                            message: err.to_string(),
                        });
                    }
                }
            } else {
                match self.executor.restart(service) {
                    Ok(()) => {
                        restarted += 1;
                        event_callback(WatchEvent::ServiceRestarted {
                            service: service.clone(),
                        });
                    }
                    Err(err) => {
                        failed += 1;
                        event_callback(WatchEvent::RestartFailed {
                            service: service.clone(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        event_callback(WatchEvent::BatchComplete { restarted, failed });
    }
}
