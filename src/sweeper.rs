//! Periodic demotion of expired credentials out of the roster.
//!
//! The sweep never mutates `locked` and never deletes records, so a
//! later renewal can reactivate the same credential. A pass that
//! finds nothing to do performs no writes and no reload; a failed
//! pass logs and waits for the next tick.

use crate::error::AppResult;
use crate::reload::SharedControl;
use crate::store::SharedCore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ExpirySweeper {
    core: SharedCore,
    control: SharedControl,
    interval: Duration,
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ExpirySweeper {
    pub fn new(core: SharedCore, control: SharedControl, interval: Duration) -> Self {
        Self {
            core,
            control,
            interval,
        }
    }

    /// Drive the sweeper until the process exits.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(revoked) if revoked.is_empty() => {}
                Ok(revoked) => info!(count = revoked.len(), "expiry sweep revoked credentials"),
                Err(e) => warn!("expiry sweep failed, will retry next tick: {}", e),
            }
        }
    }

    /// One idempotent pass: revoke roster access for every record
    /// whose derived status is expired, then reload the service once
    /// if anything changed.
    pub async fn sweep_once(&self) -> AppResult<Vec<String>> {
        let today = Utc::now().date_naive();
        let revoked = {
            let mut core = self.core.lock().await;
            core.sweep_expired(today)?
        };

        if !revoked.is_empty() {
            for credential in &revoked {
                info!(credential = %credential, "revoked expired credential");
            }
            if let Err(e) = self.control.reload().await {
                warn!("service reload after sweep failed: {}", e);
            }
        }
        Ok(revoked)
    }
}
