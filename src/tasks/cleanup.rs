use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::service::EventBusService;

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background sweep that evicts idle subscriptions across all agents.
///
/// Explicitly constructed and started/stopped by whatever owns the process
/// lifecycle. `start` and `stop` are idempotent; stopping interrupts a
/// sleeping loop promptly and lets an in-flight per-agent cleanup finish.
pub struct CleanupScheduler {
    service: Arc<EventBusService>,
    sweep_interval: Duration,
    idle_timeout: chrono::Duration,
    running: Mutex<Option<Running>>,
}

impl CleanupScheduler {
    pub fn new(
        service: Arc<EventBusService>,
        sweep_interval: Duration,
        idle_timeout: chrono::Duration,
    ) -> Self {
        Self {
            service,
            sweep_interval,
            idle_timeout,
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("cleanup scheduler already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let service = self.service.clone();
        let sweep_interval = self.sweep_interval;
        let idle_timeout = self.idle_timeout;

        let handle = tokio::spawn(async move {
            run_loop(service, sweep_interval, idle_timeout, shutdown_rx).await;
        });

        *running = Some(Running { shutdown, handle });
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            timeout_minutes = self.idle_timeout.num_minutes(),
            "started subscription cleanup scheduler"
        );
    }

    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!("cleanup scheduler task failed: {e}");
        }
        info!("stopped subscription cleanup scheduler");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn run_loop(
    service: Arc<EventBusService>,
    sweep_interval: Duration,
    idle_timeout: chrono::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(sweep_interval) => {}
        }

        sweep(&service, idle_timeout, &shutdown).await;
    }
    info!("cleanup loop exited");
}

/// One pass over all known agents. A failure for one agent is logged and
/// the sweep moves on; a failure to even enumerate agents waits for the
/// next interval instead of retrying immediately.
async fn sweep(
    service: &EventBusService,
    idle_timeout: chrono::Duration,
    shutdown: &watch::Receiver<bool>,
) {
    let agent_ids = match service.active_agents().await {
        Ok(ids) => ids,
        Err(e) => {
            error!("cleanup sweep could not list agents: {e}");
            return;
        }
    };

    let mut removed_total = 0usize;
    for agent_id in agent_ids {
        // A stop request mid-sweep lets the current agent finish, then
        // ends the sweep here
        if *shutdown.borrow() {
            break;
        }

        match service
            .cleanup_inactive_subscribers(&agent_id, idle_timeout)
            .await
        {
            Ok(removed) => removed_total += removed,
            Err(e) => {
                error!(agent_id = %agent_id, "cleanup failed for agent: {e}");
                continue;
            }
        }
    }

    if removed_total > 0 {
        info!(removed = removed_total, "cleanup sweep evicted idle subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryBroadcastRepository, MemoryStreamRepository};

    fn service() -> Arc<EventBusService> {
        let broadcasts = Arc::new(MemoryBroadcastRepository::new(1000));
        let streams = Arc::new(MemoryStreamRepository::new(broadcasts.clone()));
        Arc::new(EventBusService::new(broadcasts, streams))
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let scheduler = CleanupScheduler::new(
            service(),
            Duration::from_secs(3600),
            chrono::Duration::minutes(30),
        );

        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn stop_interrupts_a_sleeping_loop_promptly() {
        let scheduler = CleanupScheduler::new(
            service(),
            Duration::from_secs(3600),
            chrono::Duration::minutes(30),
        );

        scheduler.start().await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .expect("stop should not wait out the sweep interval");
    }

    #[tokio::test]
    async fn scheduler_can_be_restarted() {
        let scheduler = CleanupScheduler::new(
            service(),
            Duration::from_millis(10),
            chrono::Duration::minutes(30),
        );

        scheduler.start().await;
        scheduler.stop().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }
}
