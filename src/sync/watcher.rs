use std::{ffi::OsString, path::Path, time::Duration};

use anyhow::{anyhow, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pending notifications beyond this are dropped; one queued signal is as good as many.
const SIGNAL_BUFFER: usize = 16;

/// Best-effort "the shared file changed" signal.
///
/// The parent directory is watched rather than the file itself: writers replace the file by
/// renaming a temporary over it, which would silently detach a watch placed on the old inode.
/// Duplicate signals are coalesced by [ChangeWatcher::settle], missed ones are covered by the
/// periodic sync.
pub struct ChangeWatcher {
    // Dropping the watcher stops the notifications.
    _watcher: RecommendedWatcher,
    signals: mpsc::Receiver<()>,
    debounce: Duration,
}

impl ChangeWatcher {
    pub fn new(shared_file: &Path, debounce: Duration) -> Result<Self> {
        let directory = shared_file
            .parent()
            .ok_or_else(|| anyhow!("{shared_file:?} has no parent directory"))?;
        std::fs::create_dir_all(directory)?;
        let file_name = shared_file
            .file_name()
            .ok_or_else(|| anyhow!("{shared_file:?} has no file name"))?
            .to_owned();

        let (sender, signals) = mpsc::channel(SIGNAL_BUFFER);
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| match event {
                Ok(event) if concerns(&event, &file_name) => {
                    debug!("Shared file event {:?}", event.kind);
                    let _ = sender.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!("File watcher error {e:?}"),
            },
            Config::default(),
        )?;
        watcher.watch(directory, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            signals,
            debounce,
        })
    }

    /// Waits for the next change signal. Never resolves once the watcher is gone.
    pub async fn changed(&mut self) {
        if self.signals.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Lets a burst of writes finish and swallows the signals it produced.
    pub async fn settle(&mut self) {
        tokio::time::sleep(self.debounce).await;
        while self.signals.try_recv().is_ok() {}
    }
}

fn concerns(event: &Event, file_name: &OsString) -> bool {
    !matches!(event.kind, EventKind::Access(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

/// Waits on an optional watcher. Without one the future stays pending forever, which lets callers
/// use it as a `select!` branch unconditionally.
pub async fn next_change(watcher: &mut Option<ChangeWatcher>) -> &mut ChangeWatcher {
    match watcher {
        Some(watcher) => {
            watcher.changed().await;
            watcher
        }
        None => std::future::pending().await,
    }
}
