use std::{path::Path, sync::Arc};

use anyhow::Result;
use capture::{collector::CaptureModule, open_source, KeystrokeSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::SyncWorker;

use crate::{
    config::SyncSettings,
    sync::{identity::load_or_create_device_id, reconcile::Reconciler, watcher::ChangeWatcher},
    utils::clock::{Clock, DefaultClock},
};

pub mod capture;
pub mod shutdown;
pub mod worker;

/// Represents the starting point for the daemon
pub async fn start_daemon(settings: SyncSettings, input: Option<&Path>) -> Result<()> {
    let device_id = load_or_create_device_id(&settings.device_id_path()).await?;
    info!(
        "Counting keystrokes as device {device_id}, sharing through {:?}",
        settings.shared_file
    );
    let source = open_source(input).await?;

    let shutdown_token = CancellationToken::new();
    let (capture, worker) =
        create_modules(&settings, device_id, source, &shutdown_token, DefaultClock).await;

    let (_, capture_result, worker_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        capture.run(),
        worker.run(),
    );

    if let Err(capture_result) = capture_result {
        error!("Capture module got an error {:?}", capture_result);
    }

    if let Err(worker_result) = worker_result {
        error!("Sync worker got an error {:?}", worker_result);
    }

    Ok(())
}

async fn create_modules(
    settings: &SyncSettings,
    device_id: Arc<str>,
    source: Box<dyn KeystrokeSource>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> (CaptureModule, SyncWorker) {
    let reconciler = Reconciler::open(settings, device_id, Box::new(clock)).await;
    let watcher = match ChangeWatcher::new(&settings.shared_file, settings.watch_debounce) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Shared file changes won't be noticed until the next periodic sync {e:?}");
            None
        }
    };
    let (handle, worker) = SyncWorker::new(
        reconciler,
        watcher,
        settings.sync_interval,
        shutdown_token.clone(),
    );
    let capture = CaptureModule::new(source, handle, shutdown_token.clone());
    (capture, worker)
}
