//! Background loops driving the engine.
//!
//! Each loop runs its synchronous engine entry point on the blocking pool,
//! then sleeps its interval. Setting the shared `watch` flag stops all of
//! them after their current pass. The inbound loop runs one last pass on
//! stop so messages already acknowledged to a channel are handled.

use std::sync::Arc;
use std::time::Duration;

use coach_core::config::WorkerConfig;
use coach_core::Engine;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// One engine pass. Failures are logged inside, never returned.
type Pass = fn(&Engine);

pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

/// Spawn the dispatch, inbound and scheduling loops.
///
/// `inbound_wake` lets request handlers cut the inbound loop's sleep short.
pub fn spawn(engine: Arc<Engine>, config: &WorkerConfig, inbound_wake: Arc<Notify>) -> Workers {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let loops: [(&'static str, u64, Pass, Arc<Notify>, bool); 3] = [
        (
            "dispatch",
            config.dispatch_interval_secs,
            dispatch_pass,
            Arc::new(Notify::new()),
            false,
        ),
        (
            "inbound",
            config.inbound_interval_secs,
            inbound_pass,
            inbound_wake,
            true,
        ),
        (
            "scheduling",
            config.scheduling_interval_secs,
            scheduling_pass,
            Arc::new(Notify::new()),
            false,
        ),
    ];

    let handles = loops
        .into_iter()
        .map(|(name, secs, pass, wake, drain_on_stop)| {
            let handle = tokio::spawn(run_loop(
                name,
                engine.clone(),
                Duration::from_secs(secs.max(1)),
                pass,
                wake,
                drain_on_stop,
                shutdown_rx.clone(),
            ));
            (name, handle)
        })
        .collect();

    Workers {
        shutdown: shutdown_tx,
        handles,
    }
}

impl Workers {
    /// Signal every loop to stop and wait up to `grace` for them to finish
    /// their current pass and the inbound loop's final one.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + grace;
        for (name, handle) in self.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => tracing::debug!(worker = name, "worker stopped"),
                Ok(Err(e)) => tracing::error!(worker = name, "worker task failed: {e}"),
                Err(_) => tracing::warn!(worker = name, "worker did not stop within {grace:?}"),
            }
        }
    }
}

async fn run_loop(
    name: &'static str,
    engine: Arc<Engine>,
    interval: Duration,
    pass: Pass,
    wake: Arc<Notify>,
    drain_on_stop: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker = name, ?interval, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let engine = engine.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pass(&engine)).await {
            tracing::error!(worker = name, "pass aborted: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    if drain_on_stop {
        tracing::info!(worker = name, "final pass before shutdown");
        if let Err(e) = tokio::task::spawn_blocking(move || pass(&engine)).await {
            tracing::error!(worker = name, "final pass aborted: {e}");
        }
    }
    tracing::info!(worker = name, "worker shutting down");
}

fn dispatch_pass(engine: &Engine) {
    if let Err(e) = engine.run_dispatch_pass() {
        tracing::error!("dispatch pass failed: {e}");
    }
}

fn inbound_pass(engine: &Engine) {
    let handled = engine.run_inbound_pass();
    if handled > 0 {
        tracing::debug!(handled, "inbound pass finished");
    }
}

fn scheduling_pass(engine: &Engine) {
    match engine.run_scheduling_tick() {
        Ok(report) => tracing::debug!(?report, "scheduling tick finished"),
        Err(e) => tracing::error!("scheduling tick failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::clock::ManualClock;
    use coach_core::config::EngineConfig;
    use coach_core::engine::InboundMessage;
    use coach_core::model::DialogOptionType;
    use coach_core::store::Store;
    use coach_core::transport::RecordingTransport;
    use chrono::Utc;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Arc<Engine> {
        let store = Store::open(&dir.path().join("w.redb")).unwrap();
        Arc::new(Engine::new(
            store,
            EngineConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(RecordingTransport::new()),
        ))
    }

    #[tokio::test]
    async fn workers_stop_within_grace() {
        let dir = TempDir::new().unwrap();
        let workers = spawn(engine(&dir), &WorkerConfig::default(), Arc::new(Notify::new()));
        let started = std::time::Instant::now();
        workers.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wake_drains_inbox_before_interval() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let wake = Arc::new(Notify::new());
        let config = WorkerConfig {
            inbound_interval_secs: 3600,
            ..WorkerConfig::default()
        };
        let workers = spawn(engine.clone(), &config, wake.clone());

        engine.enqueue(InboundMessage {
            channel: DialogOptionType::Sms,
            sender: "+100".into(),
            body: "hello".into(),
            client_id: None,
            order: None,
            received_at: Utc::now(),
        });
        wake.notify_one();

        let mut drained = false;
        for _ in 0..100 {
            if engine.inbox_len() == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        workers.shutdown(Duration::from_secs(5)).await;
        assert!(drained);
    }

    #[tokio::test]
    async fn shutdown_handles_message_queued_before_stop() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let config = WorkerConfig {
            inbound_interval_secs: 3600,
            ..WorkerConfig::default()
        };
        let workers = spawn(engine.clone(), &config, Arc::new(Notify::new()));
        // Let the first inbound pass run on an empty inbox.
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine.enqueue(InboundMessage {
            channel: DialogOptionType::Sms,
            sender: "+100".into(),
            body: "late reply".into(),
            client_id: None,
            order: None,
            received_at: Utc::now(),
        });

        workers.shutdown(Duration::from_secs(5)).await;
        assert_eq!(engine.inbox_len(), 0);
    }
}
