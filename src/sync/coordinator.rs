//! Per-directory coalescing state machine.
//!
//! Each watched directory runs one coordinator task that multiplexes its
//! watcher's event stream against the in-flight sync, if any. Events that
//! arrive while a sync is running are dropped, not queued: the next
//! qualifying event after the run resolves triggers a fresh tree comparison,
//! so nothing is lost to the drop.

use crate::config::WatchSpec;
use crate::logging::LogSink;
use crate::sync::{ActiveSyncRegistry, SyncRunner, WatchEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Sync state for one watched directory. Owned and mutated exclusively by
/// that directory's coordinator task.
///
/// `syncing` goes false -> true only when no sync is in flight for the
/// directory, and true -> false only after the triggering run has resolved
/// and, for the first run, the initial scan has also completed.
#[derive(Debug, Default)]
pub struct DirectorySyncStatus {
    pub syncing: bool,
    pub first_scan_complete: bool,
}

/// Drive one directory's sync lifecycle until its event channel closes.
///
/// Transition rules:
/// - idle + actionable event: dispatch a sync through the runner.
/// - syncing + actionable event: drop the event (coalescing).
/// - sync resolves with the initial scan already complete: back to idle.
/// - sync resolves before the scan-complete signal: stay in `syncing` until
///   that signal arrives, so the scan's event burst cannot stack up
///   overlapping runs at startup.
/// - scan completes with no sync in flight: just record it.
pub async fn coordinator_task<R: SyncRunner>(
    spec: WatchSpec,
    runner: Arc<R>,
    mut events: mpsc::Receiver<WatchEvent>,
    registry: ActiveSyncRegistry,
    slot: usize,
    sink: Arc<LogSink>,
) {
    let mut status = DirectorySyncStatus::default();
    let mut inflight: Option<JoinHandle<()>> = None;
    // Set when a sync resolved before the initial scan finished; the
    // scan-complete signal performs the deferred release.
    let mut awaiting_scan_release = false;

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    break;
                };

                match event {
                    WatchEvent::ScanComplete => {
                        debug!(source = %spec.source.display(), "initial scan complete");
                        status.first_scan_complete = true;
                        if awaiting_scan_release {
                            awaiting_scan_release = false;
                            status.syncing = false;
                            registry.set_syncing(slot, false);
                        }
                    }
                    event => {
                        if status.syncing {
                            trace!(
                                source = %spec.source.display(),
                                ?event,
                                "sync already in flight, dropping event"
                            );
                            continue;
                        }

                        // Visually separate this burst from earlier output
                        // when the whole app is quiet. Cosmetic only.
                        if !registry.any_syncing() {
                            sink.line("", None).await;
                        }

                        status.syncing = true;
                        registry.set_syncing(slot, true);

                        let runner = runner.clone();
                        let spec = spec.clone();
                        inflight = Some(tokio::spawn(async move {
                            runner.sync(&spec).await;
                        }));
                    }
                }
            }
            _ = async {
                match &mut inflight {
                    Some(handle) => {
                        if let Err(join_error) = handle.await {
                            error!(
                                source = %spec.source.display(),
                                %join_error,
                                "sync task failed to join"
                            );
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                inflight = None;
                if status.first_scan_complete {
                    status.syncing = false;
                    registry.set_syncing(slot, false);
                } else {
                    awaiting_scan_release = true;
                }
            }
        }
    }

    // The watcher went away; wait out any last run so its logging finishes.
    if let Some(handle) = inflight {
        let _ = handle.await;
        registry.set_syncing(slot, false);
    }
}
