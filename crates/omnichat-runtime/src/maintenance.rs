//! Periodic maintenance
//!
//! The maintenance task runs the SDK's cleanup pass on a fixed interval. It
//! holds only a weak reference so it never keeps a dropped SDK alive.

use crate::sdk::SdkInner;
use serde::Serialize;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Processed events removed by the retention purge
    pub events_purged: usize,
}

pub(crate) fn spawn(inner: Weak<SdkInner>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                debug!("sdk dropped, stopping maintenance");
                return;
            };
            if let Err(error) = inner.cleanup().await {
                warn!(error = %error, "maintenance cleanup failed");
            }
        }
    })
}
