//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temporary file and renaming it still trigger a
//! reload. Events for other files in the directory are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Forwards every valid edit of the configuration file.
///
/// Only configurations that parse and validate are forwarded; a broken edit
/// leaves the running rule set and whitelist untouched.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Reloads stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if concerns(&event, &target) => reload(&target, &update_tx),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn reload(path: &Path, updates: &mpsc::UnboundedSender<GatewayConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Configuration file changed, reloading");
            if updates.send(config).is_err() {
                tracing::debug!("Config receiver gone, reload ignored");
            }
        }
        Err(e) => tracing::error!(
            path = %path.display(),
            error = %e,
            "Reloaded configuration rejected, keeping current configuration"
        ),
    }
}

/// Whether `event` is a write or replacement of `target`.
fn concerns(event: &Event, target: &Path) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == target.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_only_target_writes_are_relevant() {
        let target = Path::new("/etc/gateway/gateway.toml");

        let write = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/gateway/gateway.toml"));
        assert!(concerns(&write, target));

        let replace = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/gateway/gateway.toml"));
        assert!(concerns(&replace, target));

        let sibling = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/gateway/other.toml"));
        assert!(!concerns(&sibling, target));

        let removed = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/etc/gateway/gateway.toml"));
        assert!(!concerns(&removed, target));
    }
}
