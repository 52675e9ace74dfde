//! Background removal of expired session records.
//!
//! Periodically calls [`SessionRepository::delete_expired`]. Failures are
//! logged and the loop keeps going; a store that is briefly unreachable only
//! delays cleanup. [`Sweeper::stop`] waits for the loop to exit, so no sweep
//! runs after it returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::repositories::session::SessionRepository;

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300); // 5 minutes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperError {
    #[error("a sweep loop is already running for this store")]
    AlreadyRunning,
}

struct Control {
    state: SweeperState,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Owns at most one sweep loop for a store.
pub struct Sweeper<R> {
    store: Arc<R>,
    control: Mutex<Control>,
    ticks: Arc<AtomicU64>,
}

impl<R: SessionRepository> Sweeper<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            control: Mutex::new(Control {
                state: SweeperState::Idle,
                token: None,
                handle: None,
            }),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of sweep ticks completed so far, successful or not.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SweeperState {
        self.control.lock().await.state
    }

    /// Deletes expired records once, outside the loop.
    pub async fn sweep_once(&self) -> Result<u64> {
        self.store.delete_expired().await
    }

    /// Spawns the sweep loop. A zero interval falls back to [`DEFAULT_SWEEP_INTERVAL`].
    ///
    /// The first sweep happens one interval after start.
    pub async fn start(&self, interval: Duration) -> std::result::Result<(), SweeperError> {
        let mut control = self.control.lock().await;
        if matches!(control.state, SweeperState::Running | SweeperState::Stopping) {
            return Err(SweeperError::AlreadyRunning);
        }

        let interval = if interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.store),
            interval,
            token.clone(),
            Arc::clone(&self.ticks),
        ));

        control.token = Some(token);
        control.handle = Some(handle);
        control.state = SweeperState::Running;

        info!(interval_secs = interval.as_secs_f64(), "🧹 Session sweeper started");
        Ok(())
    }

    /// Signals the loop to stop and waits until it has exited.
    ///
    /// Does nothing when no loop is running.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let (Some(token), Some(handle)) = (control.token.take(), control.handle.take()) else {
            return;
        };

        control.state = SweeperState::Stopping;
        token.cancel();

        if let Err(e) = handle.await {
            warn!(error = %e, "Session sweeper task ended abnormally");
        }

        control.state = SweeperState::Stopped;
        info!(ticks = self.ticks(), "Session sweeper stopped");
    }
}

async fn run<R: SessionRepository>(
    store: Arc<R>,
    interval: Duration,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match store.delete_expired().await {
                    Ok(count) if count > 0 => {
                        info!(deleted = count, "Expired sessions removed");
                    }
                    Ok(_) => {
                        debug!("Session sweep: no expired sessions");
                    }
                    Err(e) => {
                        warn!(error = %e, "pgsession: unable to delete expired sessions");
                    }
                }
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    debug!("Session sweep loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionRecord;
    use crate::repositories::memory::MemorySessionStore;
    use chrono::Utc;

    fn expired(key: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            key: key.to_string(),
            data: String::new(),
            created_on: now - chrono::Duration::hours(2),
            modified_on: now - chrono::Duration::hours(2),
            expires_on: now - chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn sweeps_on_each_tick() {
        let store = Arc::new(MemorySessionStore::new());
        store.insert(&expired("old")).await.unwrap();

        let sweeper = Sweeper::new(Arc::clone(&store));
        sweeper.start(Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        sweeper.stop().await;

        assert!(sweeper.ticks() >= 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_ticks_after_stop_returns() {
        let store = Arc::new(MemorySessionStore::new());
        let sweeper = Sweeper::new(store);

        sweeper.start(Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        sweeper.stop().await;
        assert_eq!(sweeper.state().await, SweeperState::Stopped);

        let frozen = sweeper.ticks();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sweeper.ticks(), frozen);
    }

    #[tokio::test]
    async fn errors_do_not_end_the_loop() {
        let store = Arc::new(MemorySessionStore::new());
        store.fail_next_sweeps(2);
        store.insert(&expired("old")).await.unwrap();

        let sweeper = Sweeper::new(Arc::clone(&store));
        sweeper.start(Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        sweeper.stop().await;

        assert!(sweeper.ticks() >= 3);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_start_is_rejected_until_stopped() {
        let sweeper = Sweeper::new(Arc::new(MemorySessionStore::new()));
        assert_eq!(sweeper.state().await, SweeperState::Idle);

        sweeper.start(Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            sweeper.start(Duration::from_secs(60)).await,
            Err(SweeperError::AlreadyRunning)
        );

        sweeper.stop().await;
        sweeper.start(Duration::ZERO).await.unwrap();
        assert_eq!(sweeper.state().await, SweeperState::Running);
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let sweeper = Sweeper::new(Arc::new(MemorySessionStore::new()));
        sweeper.stop().await;
        assert_eq!(sweeper.state().await, SweeperState::Idle);
    }

    #[tokio::test]
    async fn sweep_once_twice_leaves_records_unchanged() {
        let store = Arc::new(MemorySessionStore::new());
        store.insert(&expired("old")).await.unwrap();
        let sweeper = Sweeper::new(Arc::clone(&store));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert!(store.keys().await.is_empty());
    }
}
