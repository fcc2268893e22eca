//! Background status monitor.
//!
//! One worker thread owns the [`StatusEvaluator`] and re-evaluates on every
//! poll interval and whenever a file under a log root changes (debounced).
//! Evaluations never overlap: a trigger that arrives while one is in flight
//! is dropped, since the running evaluation already sees the newest bytes.
//!
//! Snapshots are published through a `tokio::sync::watch` channel; receivers
//! are woken only when the snapshot actually changed.

use crate::config::StatusConfig;
use crate::error::Result;
use crate::status::{StatusEvaluator, StatusSnapshot};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Quiet period before a burst of filesystem events becomes one trigger.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

enum Command {
    Evaluate,
    Stop,
}

/// Cloneable handle that requests an out-of-band evaluation.
#[derive(Clone)]
struct Trigger {
    tx: SyncSender<Command>,
    in_flight: Arc<AtomicBool>,
}

impl Trigger {
    /// Request an evaluation. Returns `false` if the request was dropped.
    fn fire(&self) -> bool {
        if self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(Command::Evaluate) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Running status monitor. Stops its worker when dropped.
pub struct StatusMonitor {
    receiver: watch::Receiver<StatusSnapshot>,
    trigger: Trigger,
    worker: Option<JoinHandle<()>>,
    _debouncer: Option<Debouncer<notify::RecommendedWatcher>>,
}

impl StatusMonitor {
    /// Spawn the worker and, if enabled, a filesystem watcher on `watch_roots`.
    ///
    /// Roots that do not exist are skipped. The first evaluation runs
    /// immediately.
    pub fn start(
        mut evaluator: StatusEvaluator,
        config: &StatusConfig,
        watch_roots: Vec<PathBuf>,
    ) -> Result<Self> {
        let (snapshot_tx, receiver) = watch::channel(StatusSnapshot::default());
        let (tx, rx) = mpsc::sync_channel::<Command>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let trigger = Trigger {
            tx,
            in_flight: Arc::clone(&in_flight),
        };
        let interval = Duration::from_millis(config.poll_interval_ms.max(1));

        let worker = std::thread::Builder::new()
            .name("agentpulse-status".to_string())
            .spawn(move || {
                loop {
                    in_flight.store(true, Ordering::Release);
                    let snapshot = evaluator.evaluate();
                    in_flight.store(false, Ordering::Release);

                    snapshot_tx.send_if_modified(|current| {
                        if *current != snapshot {
                            *current = snapshot;
                            true
                        } else {
                            false
                        }
                    });

                    match rx.recv_timeout(interval) {
                        Ok(Command::Evaluate) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Status worker stopped");
            })?;

        let debouncer = if config.watch_filesystem {
            Some(Self::watch(&trigger, watch_roots)?)
        } else {
            None
        };

        tracing::info!(
            poll_interval_ms = config.poll_interval_ms,
            watch_filesystem = config.watch_filesystem,
            "Status monitor started"
        );

        Ok(Self {
            receiver,
            trigger,
            worker: Some(worker),
            _debouncer: debouncer,
        })
    }

    fn watch(
        trigger: &Trigger,
        roots: Vec<PathBuf>,
    ) -> Result<Debouncer<notify::RecommendedWatcher>> {
        let handler_trigger = trigger.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let relevant = events
                        .iter()
                        .any(|e| e.path.extension().map(|ext| ext == "jsonl").unwrap_or(false));
                    if relevant {
                        handler_trigger.fire();
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "File watcher error"),
            }
        })?;

        for root in roots {
            if !root.exists() {
                tracing::debug!(path = %root.display(), "Log root missing, not watching");
                continue;
            }
            debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
            tracing::info!(path = %root.display(), "Watching log root");
        }

        Ok(debouncer)
    }

    /// A fresh receiver for snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.receiver.clone()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> StatusSnapshot {
        self.receiver.borrow().clone()
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        // Blocking send: the worker drains the queue between evaluations
        let _ = self.trigger.tx.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClaudeCodeFormat, LogSourceProvider, StaticProcessTable};
    use std::io::Write;
    use std::time::Instant;

    #[test]
    fn test_monitor_publishes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".claude");
        let log = root.join("projects/-repo/s.jsonl");
        std::fs::create_dir_all(log.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(&log).unwrap();
        writeln!(
            f,
            "{}",
            serde_json::json!({
                "type": "user",
                "timestamp": "2025-11-25T10:00:00Z",
                "message": {"content": "go"}
            })
        )
        .unwrap();

        let table = StaticProcessTable::new().with_process(77, "claude", vec![log]);
        let provider = LogSourceProvider::new(
            Arc::new(ClaudeCodeFormat::with_root(root.clone())),
            Arc::new(table),
        );
        let config = StatusConfig {
            poll_interval_ms: 20,
            watch_filesystem: false,
        };

        let monitor =
            StatusMonitor::start(StatusEvaluator::new(vec![provider]), &config, vec![root]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.latest().total_count == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let snapshot = monitor.latest();
        assert_eq!(snapshot.running_count, 1);
        assert_eq!(snapshot.running_agents[0].pid, 77);
        drop(monitor);
    }

    #[test]
    fn test_trigger_dropped_while_in_flight() {
        let (tx, _rx) = mpsc::sync_channel::<Command>(1);
        let in_flight = Arc::new(AtomicBool::new(true));
        let trigger = Trigger {
            tx,
            in_flight: Arc::clone(&in_flight),
        };
        assert!(!trigger.fire());

        in_flight.store(false, Ordering::Release);
        assert!(trigger.fire());
        // Queue holds one pending request; the next is coalesced
        assert!(!trigger.fire());
    }
}
