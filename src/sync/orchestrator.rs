//! Application sync orchestrator.
//!
//! Expands the merged configuration into per-directory watch specs,
//! validates everything up front, and spawns one watcher task plus one
//! coordinator task per directory. Validation is fail-fast at the process
//! level: no watcher starts until every directory of every app has resolved
//! cleanly.

use crate::config::{
    compile_ignored, resolve_rsync_options, resolve_watch_options, Config, ConfigError, WatchSpec,
};
use crate::logging::LogSink;
use crate::rsync::RsyncRunner;
use crate::sync::{
    coordinator_task, watch_directory_task, ActiveSyncRegistry, SyncRunner,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Event channel depth between a watcher and its coordinator. Bursts beyond
/// this apply backpressure to the watcher bridge, never drop silently.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// The resolved watch specs of one application.
#[derive(Debug)]
pub struct AppWatchSpecs {
    pub name: String,
    pub specs: Vec<WatchSpec>,
}

/// Expand and validate the whole configuration into watch specs.
///
/// Destination URIs gain the app's `user@host:` prefix; rsync and watch
/// options resolve across the three layers; ignore patterns compile; and
/// every source path must exist on disk. The first failure aborts the whole
/// expansion.
pub fn expand_config(config: &Config) -> Result<Vec<AppWatchSpecs>, ConfigError> {
    if config.apps.is_empty() {
        return Err(ConfigError::EmptyApps);
    }

    let mut apps = Vec::with_capacity(config.apps.len());
    for app in &config.apps {
        if app.directories.is_empty() {
            return Err(ConfigError::EmptyDirectories {
                app: app.name.clone(),
            });
        }

        let uri_prefix = app.host.remote_uri_prefix();
        let shell = app.host.ssh_shell(&app.name)?;

        let mut specs = Vec::with_capacity(app.directories.len());
        for (index, dir) in app.directories.iter().enumerate() {
            if dir.source.as_os_str().is_empty() {
                return Err(ConfigError::MissingSource {
                    app: app.name.clone(),
                    index,
                });
            }
            if dir.destination.is_empty() {
                return Err(ConfigError::MissingDestination {
                    app: app.name.clone(),
                    index,
                });
            }
            if !dir.source.exists() {
                return Err(ConfigError::SourceNotFound {
                    path: dir.source.clone(),
                });
            }

            let watch = resolve_watch_options(&config.watch, &app.watch, &dir.watch);
            let rsync = resolve_rsync_options(&config.rsync, &app.rsync, &dir.rsync);
            let ignored = compile_ignored(&watch.ignored)?;

            let tag = if app.name.is_empty() {
                String::new()
            } else {
                format!(" {}:[{}]", app.name, index + 1)
            };

            specs.push(WatchSpec {
                source: dir.source.clone(),
                destination: format!("{}{}", uri_prefix, dir.destination),
                flags: rsync.flags,
                exclude: rsync.exclude,
                shell: shell.clone(),
                ignore_initial: watch.ignore_initial,
                ignored,
                tag,
                color_index: index,
            });
        }

        apps.push(AppWatchSpecs {
            name: app.name.clone(),
            specs,
        });
    }

    Ok(apps)
}

/// Spawn watcher and coordinator tasks for every resolved directory.
pub fn spawn_apps<R: SyncRunner>(
    apps: Vec<AppWatchSpecs>,
    runner: Arc<R>,
    sink: Arc<LogSink>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for app in apps {
        let registry = ActiveSyncRegistry::new(app.specs.len());
        info!(
            "Starting app '{}' with {} watched director{}",
            app.name,
            app.specs.len(),
            if app.specs.len() == 1 { "y" } else { "ies" }
        );

        for (slot, spec) in app.specs.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            handles.push(tokio::spawn(watch_directory_task(spec.clone(), tx)));
            handles.push(tokio::spawn(coordinator_task(
                spec,
                runner.clone(),
                rx,
                registry.clone(),
                slot,
                sink.clone(),
            )));
        }
    }
    handles
}

/// Validate the configuration and start all watchers and coordinators.
///
/// Called once at process startup. Any returned error is fatal; no watcher
/// exists when it is returned.
pub fn start(config: &Config, sink: Arc<LogSink>) -> Result<Vec<JoinHandle<()>>, ConfigError> {
    let apps = expand_config(config)?;
    let runner = Arc::new(RsyncRunner::new(sink.clone(), config.debug));
    Ok(spawn_apps(apps, runner, sink))
}
