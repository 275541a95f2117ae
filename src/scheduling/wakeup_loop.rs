use super::{StoreScheduler, Wakeup, WakeupHandler};
use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the loop sleeps before re-reading the wake-up table, so wake-ups
/// added by another process are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// How long shutdown waits for in-flight handlers.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// In-process host that fires due wake-ups into registered handlers.
pub struct WakeupLoop {
    scheduler: StoreScheduler,
    handlers: HashMap<String, Arc<dyn WakeupHandler>>,
    running: Vec<(String, JoinHandle<()>)>,
    clock: Arc<dyn Clock>,
    shutdown_token: CancellationToken,
}

impl WakeupLoop {
    pub fn new(
        scheduler: StoreScheduler,
        clock: Arc<dyn Clock>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            handlers: HashMap::new(),
            running: Vec::new(),
            clock,
            shutdown_token,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn WakeupHandler>) {
        let job_name = handler.job_name().to_string();
        info!("Registering wake-up handler: {}", job_name);
        self.handlers.insert(job_name, handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Main loop. Returns once the shutdown token is cancelled and in-flight
    /// handlers have finished or the grace period ran out.
    pub async fn run(&mut self) {
        info!(
            "Starting wake-up loop with {} registered handlers",
            self.handler_count()
        );

        loop {
            self.cleanup_finished().await;

            let sleep_duration = self.time_until_next_wakeup();
            debug!("Wake-up loop sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.dispatch_due();
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Wake-up loop received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Wake-up loop stopped");
    }

    /// Claim due wake-ups and start a handler task for each. Returns how many
    /// were started.
    pub fn dispatch_due(&mut self) -> usize {
        let due = match self.scheduler.take_due(self.clock.now()) {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to read due wake-ups: {:#}", e);
                return 0;
            }
        };

        let mut started = 0;
        for wakeup in due {
            if self.spawn_handler(wakeup) {
                started += 1;
            }
        }
        started
    }

    /// Wait up to `timeout` for every in-flight handler.
    pub async fn wait_for_running(&mut self, timeout: Duration) {
        for (job_name, handle) in self.running.drain(..) {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Handler for {} still running after {:?}", job_name, timeout);
            }
        }
    }

    fn time_until_next_wakeup(&self) -> Duration {
        match self.scheduler.next_fire_at() {
            Ok(Some(fire_at)) => {
                let now = self.clock.now();
                if fire_at <= now {
                    Duration::ZERO
                } else {
                    (fire_at - now).to_std().unwrap_or(MAX_SLEEP).min(MAX_SLEEP)
                }
            }
            Ok(None) => MAX_SLEEP,
            Err(e) => {
                error!("Failed to read next wake-up time: {:#}", e);
                MAX_SLEEP
            }
        }
    }

    fn spawn_handler(&mut self, wakeup: Wakeup) -> bool {
        let Some(handler) = self.handlers.get(&wakeup.job_name).cloned() else {
            warn!(
                "No handler registered for {}, dropping wake-up {}",
                wakeup.job_name, wakeup.id
            );
            return false;
        };

        let job_name = wakeup.job_name.clone();
        info!(
            "Dispatching {} wake-up for {} (due {})",
            if wakeup.is_once() { "one-shot" } else { "recurring" },
            job_name,
            wakeup.fire_at
        );

        let task_job_name = job_name.clone();
        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || handler.handle(&wakeup)).await;
            let elapsed = start_time.elapsed();

            match result {
                Ok(Ok(())) => {
                    debug!("Handler for {} completed in {:?}", task_job_name, elapsed);
                }
                Ok(Err(e)) => {
                    error!(
                        "Handler for {} failed after {:?}: {:#}",
                        task_job_name, elapsed, e
                    );
                }
                Err(e) => {
                    error!(
                        "Handler for {} panicked after {:?}: {}",
                        task_job_name, elapsed, e
                    );
                }
            }
        });

        self.running.push((job_name, handle));
        true
    }

    async fn cleanup_finished(&mut self) {
        let mut still_running = Vec::with_capacity(self.running.len());
        for (job_name, handle) in self.running.drain(..) {
            if handle.is_finished() {
                let _ = handle.await;
            } else {
                still_running.push((job_name, handle));
            }
        }
        self.running = still_running;
    }

    async fn shutdown(&mut self) {
        info!(
            "Shutting down wake-up loop, waiting for {} running handlers...",
            self.running.len()
        );
        self.wait_for_running(SHUTDOWN_GRACE).await;
        info!("Wake-up loop shutdown complete");
    }
}
