use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sync::{
    reconcile::{Reconciler, TodayStats},
    watcher::{next_change, ChangeWatcher},
};

use super::capture::KeyEvent;

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug)]
pub enum SyncCommand {
    Keystroke(KeyEvent),
    /// Zero today's count of this device. The sender learns whether the shared file was updated.
    ResetToday(oneshot::Sender<Result<()>>),
    /// Sync with the shared file right away instead of waiting for the timer.
    SyncNow,
}

/// Handle through which the rest of the process talks to the [SyncWorker]. Cheap to clone; the
/// worker lives as long as the process.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    stats: watch::Receiver<TodayStats>,
}

impl SyncHandle {
    pub async fn keystroke(&self, event: KeyEvent) -> Result<()> {
        self.send(SyncCommand::Keystroke(event)).await
    }

    pub async fn sync_now(&self) -> Result<()> {
        self.send(SyncCommand::SyncNow).await
    }

    pub async fn reset_today(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.send(SyncCommand::ResetToday(sender)).await?;
        receiver
            .await
            .map_err(|_| anyhow!("Sync worker stopped before finishing the reset"))?
    }

    /// Latest counters published by the worker.
    pub fn today(&self) -> TodayStats {
        *self.stats.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TodayStats> {
        self.stats.clone()
    }

    async fn send(&self, command: SyncCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Sync worker is not running"))
    }
}

/// The only place that touches the shared file. Keystrokes, commands, the periodic timer and
/// change notifications are multiplexed into one loop, so reconciliation passes never overlap.
pub struct SyncWorker {
    reconciler: Reconciler,
    commands: mpsc::Receiver<SyncCommand>,
    watcher: Option<ChangeWatcher>,
    sync_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        reconciler: Reconciler,
        watcher: Option<ChangeWatcher>,
        sync_interval: Duration,
        shutdown: CancellationToken,
    ) -> (SyncHandle, Self) {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let handle = SyncHandle {
            commands: sender,
            stats: reconciler.subscribe(),
        };
        let worker = Self {
            reconciler,
            commands,
            watcher,
            sync_interval,
            shutdown,
        };
        (handle, worker)
    }

    /// Executes the worker event loop until shutdown, then drains pending commands and performs
    /// the final sync.
    pub async fn run(self) -> Result<()> {
        let SyncWorker {
            mut reconciler,
            mut commands,
            mut watcher,
            sync_interval,
            shutdown,
        } = self;

        if let Err(e) = reconciler.startup().await {
            error!("Startup reconciliation failed, retrying on next sync {e:?}");
        }

        let mut timer = interval_at(Instant::now() + sync_interval, sync_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => handle_command(&mut reconciler, command).await,
                    None => {
                        debug!("All command senders are gone");
                        commands_open = false;
                    }
                },
                changed = next_change(&mut watcher) => {
                    changed.settle().await;
                    if let Err(e) = reconciler.on_shared_change().await {
                        warn!("Failed to process shared file change {e:?}");
                    }
                }
                _ = timer.tick() => {
                    if let Err(e) = reconciler.sync().await {
                        warn!("Periodic sync failed, retrying on next tick {e:?}");
                    }
                }
            }
        }

        info!("Shutting down sync worker");
        commands.close();
        while let Some(command) = commands.recv().await {
            handle_command(&mut reconciler, command).await;
        }
        reconciler.shutdown().await
    }
}

async fn handle_command(reconciler: &mut Reconciler, command: SyncCommand) {
    match command {
        SyncCommand::Keystroke(event) => {
            if let Err(e) = reconciler.record_keystroke(event.app).await {
                warn!("Keystroke was counted but not persisted {e:?}");
            }
        }
        SyncCommand::SyncNow => {
            if let Err(e) = reconciler.sync().await {
                warn!("Requested sync failed {e:?}");
            }
        }
        SyncCommand::ResetToday(reply) => {
            let result = reconciler.reset_today().await;
            if let Err(e) = &result {
                error!("Reset was not written to the shared file {e:?}");
            }
            let _ = reply.send(result);
        }
    }
}
