//! Filesystem watcher task for one watched directory.
//!
//! Bridges the `notify` callback API into the coordinator's event channel,
//! performs the synthetic startup enumeration, and reduces raw notify events
//! to the three actionable kinds. Deletions, renames away, and metadata-only
//! touches are dropped here: this engine never propagates deletes.

use crate::config::WatchSpec;
use crate::sync::WatchEvent;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Watch `spec.source` recursively and forward events until the receiver is
/// dropped.
///
/// When `ignore_initial` is false, the task first walks the tree and emits
/// synthetic add events for everything already present (including the root
/// itself, which guarantees one startup sync), then [`WatchEvent::ScanComplete`].
/// When `ignore_initial` is true, `ScanComplete` is emitted immediately.
/// Exactly one `ScanComplete` is emitted per watch root either way.
pub async fn watch_directory_task(spec: WatchSpec, tx: mpsc::Sender<WatchEvent>) {
    // Bridge notify's callback thread into this task.
    let (notify_tx, mut notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(100);

    let mut watcher = match RecommendedWatcher::new(
        move |res| {
            let _ = notify_tx.blocking_send(res);
        },
        Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("Failed to create watcher for {}: {}", spec.source.display(), e);
            return;
        }
    };

    if let Err(e) = watcher.watch(&spec.source, RecursiveMode::Recursive) {
        error!("Failed to watch directory {}: {}", spec.source.display(), e);
        return;
    }

    info!("Watching directory: {}", spec.source.display());

    // The scan runs after the watcher is registered so changes made during
    // the walk are not lost; they arrive as live events afterwards.
    if !spec.ignore_initial {
        let mut initial = vec![WatchEvent::AddDir(spec.source.clone())];
        if let Err(e) = scan_tree(&spec.source, &spec, &mut initial) {
            warn!(
                "Initial scan of {} incomplete: {}",
                spec.source.display(),
                e
            );
        }
        for event in initial {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
    if tx.send(WatchEvent::ScanComplete).await.is_err() {
        return;
    }

    while let Some(result) = notify_rx.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Watcher error for {}: {}", spec.source.display(), e);
                continue;
            }
        };

        for path in &event.paths {
            if spec.is_ignored(path) {
                continue;
            }
            if let Some(mapped) = map_notify_event(&event.kind, path) {
                if tx.send(mapped).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Reduce a notify event to an actionable watch event, or drop it.
fn map_notify_event(kind: &EventKind, path: &Path) -> Option<WatchEvent> {
    match kind {
        EventKind::Create(CreateKind::Folder) => Some(WatchEvent::AddDir(path.to_path_buf())),
        EventKind::Create(CreateKind::File) => Some(WatchEvent::AddFile(path.to_path_buf())),
        // Platform couldn't say what was created; ask the filesystem.
        EventKind::Create(_) => add_from_metadata(path),
        EventKind::Modify(ModifyKind::Name(rename)) => match rename {
            // Destination of a rename: something new appeared here.
            RenameMode::To => add_from_metadata(path),
            // Source of a rename: the path is gone, nothing to sync.
            RenameMode::From => None,
            // Direction unknown; only a still-existing path is an addition.
            RenameMode::Both | RenameMode::Any | RenameMode::Other => {
                if path.exists() {
                    add_from_metadata(path)
                } else {
                    None
                }
            }
        },
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(WatchEvent::ModifyFile(path.to_path_buf()))
        }
        // Metadata-only touches, removals, access events.
        _ => None,
    }
}

fn add_from_metadata(path: &Path) -> Option<WatchEvent> {
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.is_dir() {
        Some(WatchEvent::AddDir(path.to_path_buf()))
    } else {
        Some(WatchEvent::AddFile(path.to_path_buf()))
    }
}

/// Recursive startup enumeration, depth-first, honoring ignore predicates.
fn scan_tree(
    dir: &Path,
    spec: &WatchSpec,
    out: &mut Vec<WatchEvent>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if spec.is_ignored(&path) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            out.push(WatchEvent::AddDir(path.clone()));
            scan_tree(&path, spec, out)?;
        } else if file_type.is_file() {
            out.push(WatchEvent::AddFile(path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::compile_ignored;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec_for(source: PathBuf, ignore_initial: bool, ignored: &[&str]) -> WatchSpec {
        let patterns: Vec<String> = ignored.iter().map(|s| s.to_string()).collect();
        WatchSpec {
            source,
            destination: "/dst".to_string(),
            flags: vec!['a', 'O', 'i'],
            exclude: vec![],
            shell: None,
            ignore_initial,
            ignored: compile_ignored(&patterns).unwrap(),
            tag: String::new(),
            color_index: 0,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<WatchEvent>) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for watch event")
            .expect("watcher task ended unexpectedly")
    }

    fn file_name(event: &WatchEvent) -> Option<String> {
        event
            .path()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn test_scan_complete_is_immediate_with_ignore_initial() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("existing.txt"), "x").unwrap();

        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_directory_task(
            spec_for(temp_dir.path().to_path_buf(), true, &[]),
            tx,
        ));

        // No synthetic adds for pre-existing entries; the scan signal leads.
        assert_eq!(next_event(&mut rx).await, WatchEvent::ScanComplete);

        handle.abort();
    }

    #[tokio::test]
    async fn test_initial_scan_enumerates_existing_tree() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("sub").join("b.txt"), "b").unwrap();

        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_directory_task(
            spec_for(temp_dir.path().to_path_buf(), false, &[]),
            tx,
        ));

        let mut adds = Vec::new();
        loop {
            let event = next_event(&mut rx).await;
            if event == WatchEvent::ScanComplete {
                break;
            }
            adds.push(event);
        }

        // Root directory always leads so an initial sync fires.
        assert!(matches!(&adds[0], WatchEvent::AddDir(p) if *p == temp_dir.path()));
        let names: Vec<Option<String>> = adds.iter().map(file_name).collect();
        assert!(names.contains(&Some("a.txt".to_string())));
        assert!(names.contains(&Some("sub".to_string())));
        assert!(names.contains(&Some("b.txt".to_string())));

        handle.abort();
    }

    #[tokio::test]
    async fn test_create_emits_add_file() {
        let temp_dir = TempDir::new().unwrap();

        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_directory_task(
            spec_for(temp_dir.path().to_path_buf(), true, &[]),
            tx,
        ));
        assert_eq!(next_event(&mut rx).await, WatchEvent::ScanComplete);
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(temp_dir.path().join("new.txt"), "content").unwrap();

        let event = next_event(&mut rx).await;
        assert!(event.is_actionable());
        assert_eq!(file_name(&event), Some("new.txt".to_string()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_ignored_paths_are_filtered() {
        let temp_dir = TempDir::new().unwrap();

        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_directory_task(
            spec_for(temp_dir.path().to_path_buf(), true, &["ignored_dir"]),
            tx,
        ));
        assert_eq!(next_event(&mut rx).await, WatchEvent::ScanComplete);
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::create_dir(temp_dir.path().join("ignored_dir")).unwrap();
        fs::write(temp_dir.path().join("ignored_dir").join("x.txt"), "x").unwrap();
        fs::write(temp_dir.path().join("kept.txt"), "k").unwrap();

        // The first event to come through must already be the non-ignored
        // path; everything under ignored_dir was filtered.
        let event = next_event(&mut rx).await;
        assert_eq!(file_name(&event), Some("kept.txt".to_string()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_removal_does_not_emit() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("doomed.txt"), "x").unwrap();

        let (tx, mut rx) = mpsc::channel(100);
        let handle = tokio::spawn(watch_directory_task(
            spec_for(temp_dir.path().to_path_buf(), true, &[]),
            tx,
        ));
        assert_eq!(next_event(&mut rx).await, WatchEvent::ScanComplete);
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::remove_file(temp_dir.path().join("doomed.txt")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The removal produced nothing; the next event is the later create.
        fs::write(temp_dir.path().join("after.txt"), "y").unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(file_name(&event), Some("after.txt".to_string()));

        handle.abort();
    }

    #[test]
    fn test_map_rename_from_is_dropped() {
        let mapped = map_notify_event(
            &EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            Path::new("/gone"),
        );
        assert_eq!(mapped, None);
    }

    #[test]
    fn test_map_remove_is_dropped() {
        let mapped = map_notify_event(
            &EventKind::Remove(notify::event::RemoveKind::File),
            Path::new("/gone"),
        );
        assert_eq!(mapped, None);
    }

    #[test]
    fn test_map_metadata_only_is_dropped() {
        let mapped = map_notify_event(
            &EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Any)),
            Path::new("/touched"),
        );
        assert_eq!(mapped, None);
    }
}
