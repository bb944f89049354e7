//! Background flushing of coalesced writes.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, trace};

use crate::errors::DbResult;

/// A component with a coalesced snapshot that can be flushed when due.
pub trait Flush: Send + Sync + 'static {
    /// Writes the snapshot if its coalescing window has elapsed. Returns whether it wrote.
    fn flush_if_due(&self) -> DbResult<bool>;

    /// Writes the snapshot now if anything is pending.
    fn flush_now(&self) -> DbResult<()>;
}

/// Spawns a task that polls `target` every `interval` and flushes whatever is due.
///
/// Abort the returned handle to stop it; call [`Flush::flush_now`] afterwards to write anything
/// still pending.
pub fn spawn_flush_task<F: Flush>(target: Arc<F>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match target.flush_if_due() {
                Ok(true) => trace!("flushed coalesced snapshot"),
                Ok(false) => {}
                Err(err) => error!(%err, "failed to flush snapshot"),
            }
        }
    })
}
