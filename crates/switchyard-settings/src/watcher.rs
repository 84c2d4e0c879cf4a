//! Hot reload of the settings file.
//!
//! The parent directory is watched (editors often replace files by rename).
//! Events for the settings file are debounced, the file is reloaded, and a
//! valid result different from the current config is published through the
//! [`ConfigHandle`]. An invalid file is logged and the previous config kept.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, SettingsError};
use crate::handle::ConfigHandle;
use crate::loader::load_config_from_path;

/// Default debounce window for bursts of file events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Running watcher. Dropping it stops watching.
#[derive(Debug)]
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `path` and publish reloads into `handle`.
pub fn watch_config_file(
    path: impl Into<PathBuf>,
    handle: ConfigHandle,
    debounce: Duration,
) -> Result<ConfigWatcher> {
    let path: PathBuf = path.into();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .map(ToOwned::to_owned)
        .ok_or_else(|| SettingsError::InvalidValue(format!("not a file path: {}", path.display())))?;

    let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(64);
    let mut watcher = RecommendedWatcher::new(
        move |result| {
            let _ = event_tx.blocking_send(result);
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching settings file");

    let task = tokio::spawn(async move {
        while let Some(result) = event_rx.recv().await {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "settings watcher error");
                    continue;
                }
            };
            if !is_relevant(&event, &file_name) {
                continue;
            }

            // Swallow the rest of the burst.
            tokio::time::sleep(debounce).await;
            while event_rx.try_recv().is_ok() {}

            reload(&path, &handle);
        }
        debug!("settings watcher stopped");
    });

    Ok(ConfigWatcher {
        _watcher: watcher,
        task,
    })
}

fn is_relevant(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

/// Reload `path` into `handle`. Returns whether a new config was published.
pub fn reload(path: &Path, handle: &ConfigHandle) -> bool {
    match load_config_from_path(path) {
        Ok(config) if *handle.current() == config => {
            debug!("settings file changed without effect");
            false
        }
        Ok(config) => {
            info!(upstreams = config.upstreams.len(), "settings reloaded");
            let _ = handle.replace(config);
            true
        }
        Err(e) => {
            warn!(error = %e, "settings reload failed, keeping previous config");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GatewayConfig;

    #[test]
    fn reload_publishes_valid_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.json");
        std::fs::write(&path, r#"{"httpPort": 9100}"#).unwrap();

        let handle = ConfigHandle::new(GatewayConfig::default());
        assert!(reload(&path, &handle));
        assert_eq!(handle.current().http_port, 9100);
        assert!(!reload(&path, &handle));
    }

    #[test]
    fn reload_keeps_previous_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.json");
        std::fs::write(&path, "{broken").unwrap();

        let handle = ConfigHandle::new(GatewayConfig::default());
        assert!(!reload(&path, &handle));
        assert_eq!(handle.current().http_port, 8090);
    }

    #[tokio::test]
    async fn file_change_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.json");
        std::fs::write(&path, "{}").unwrap();

        let handle = ConfigHandle::new(GatewayConfig::default());
        let mut rx = handle.subscribe();
        let _watcher = watch_config_file(&path, handle.clone(), Duration::from_millis(50)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, r#"{"serverName": "reloaded"}"#).unwrap();

        tokio::time::timeout(Duration::from_secs(10), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.current().server_name, "reloaded");
    }
}
