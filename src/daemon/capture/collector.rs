use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::daemon::worker::SyncHandle;

use super::KeystrokeSource;

/// Pumps keystrokes from a capture source into the sync worker.
pub struct CaptureModule {
    source: Box<dyn KeystrokeSource>,
    next: SyncHandle,
    shutdown: CancellationToken,
}

impl CaptureModule {
    pub fn new(
        source: Box<dyn KeystrokeSource>,
        next: SyncHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            next,
            shutdown,
        }
    }

    /// Executes the capture loop. Ends on shutdown or when the source is exhausted; the worker
    /// keeps syncing either way.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                event = self.source.next_event() => match event {
                    Ok(Some(event)) => {
                        debug!("Captured {:?}", event);
                        self.next
                            .keystroke(event)
                            .await
                            .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
                    }
                    Ok(None) => {
                        info!("Capture source is exhausted");
                        return Ok(())
                    }
                    Err(e) => {
                        error!("Encountered an error during capture {:?}", e);
                        return Err(e)
                    }
                }
            }
        }
    }
}
