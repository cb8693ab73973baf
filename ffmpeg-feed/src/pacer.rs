//! Self-correcting periodic scheduler.
//!
//! Deadlines advance by the period the callback reports (`deadline += period`)
//! rather than being recomputed from "now", so call overhead does not
//! accumulate into drift. A late deadline fires again right away from the same
//! loop; no task is spawned and the stack does not grow.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Beyond this many periods of lag the schedule restarts from "now" instead
/// of firing back-to-back until it catches up.
pub const MAX_LAG_PERIODS: u32 = 8;

/// What the callback asks the pacer to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Fire again one `Duration` after the previous deadline.
    Continue(Duration),
    Stop,
}

pub struct Pacer {
    name: String,
    cancel: CancellationToken,
    fires: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pacer {
    /// Spawns the loop on the current tokio runtime. The first fire happens
    /// immediately.
    pub fn spawn<F, Fut>(name: impl Into<String>, cancel: CancellationToken, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let name = name.into();
        let fires = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run(
            name.clone(),
            cancel.clone(),
            Arc::clone(&fires),
            tick,
        ));
        Self {
            name,
            cancel,
            fires,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Completed callback invocations.
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Waits for the loop to exit. Does not stop it.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("pacer {}: task failed: {}", self.name, e);
            }
        }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<F, Fut>(name: String, cancel: CancellationToken, fires: Arc<AtomicU64>, mut tick: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Tick> + Send + 'static,
{
    let mut deadline: Option<Instant> = None;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = Instant::now();
        let period = match tick().await {
            Tick::Continue(period) => period,
            Tick::Stop => {
                log::info!("pacer {}: stopped by callback", name);
                break;
            }
        };
        fires.fetch_add(1, Ordering::Relaxed);

        let mut next = deadline.unwrap_or(started) + period;
        let now = Instant::now();
        if now > next && now - next > period.saturating_mul(MAX_LAG_PERIODS) {
            log::warn!(
                "pacer {}: {:?} behind schedule, resynchronising",
                name,
                now - next
            );
            next = now;
        }
        deadline = Some(next);

        if next > now {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(next) => {}
            }
        } else {
            log::debug!("pacer {}: catching up, {:?} late", name, now - next);
            tokio::task::yield_now().await;
        }
    }
    log::debug!("pacer {}: finished after {} fires", name, fires.load(Ordering::Relaxed));
}

#[cfg(test)]
#[path = "pacer_test.rs"]
mod pacer_test;
