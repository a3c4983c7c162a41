//! Background task resolving expired A2A requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::A2aCoordinator;

/// Run `coordinator.sweep()` every `interval` until shutdown is signalled.
pub fn spawn_sweeper(
    coordinator: Arc<A2aCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("A2A sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{A2aError, HandlerRegistry, RequestKind};
    use crate::config::CoordinatorConfig;
    use crate::network::InMemoryBus;

    #[tokio::test]
    async fn test_sweeper_resolves_and_stops() {
        let bus = Arc::new(InMemoryBus::default());
        let coord = A2aCoordinator::new(
            "asker".into(),
            bus,
            HandlerRegistry::new(),
            CoordinatorConfig::default(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_sweeper(coord.clone(), Duration::from_millis(10), shutdown_rx);

        let handle = coord
            .start_request(
                "nobody".into(),
                RequestKind::Status,
                serde_json::Value::Null,
                Duration::from_millis(30),
            )
            .await
            .unwrap();
        let id = handle.correlation_id();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!coord.is_pending(&id));
        assert!(matches!(handle.wait().await, Err(A2aError::Timeout { .. })));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
