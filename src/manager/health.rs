//! Periodic health checks.
//!
//! One timer task per server id. Each tick probes the client's `is_active()`;
//! a failed probe triggers a single restart and ends the timer, since the
//! restart installs a fresh one.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::events::FleetEvent;
use super::ManagerInner;

/// Start the health-check timer for `id`.
pub(crate) fn spawn_health_check(
    manager: Weak<ManagerInner>,
    id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if probe(&manager, &id) == Probe::Stop {
                return;
            }
        }
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Probe {
    Continue,
    Stop,
}

fn probe(manager: &Arc<ManagerInner>, id: &str) -> Probe {
    let Some(client) = manager.client(id) else {
        tracing::debug!(server = %id, "server gone, stopping health check");
        return Probe::Stop;
    };

    if client.is_active() {
        manager.reset_restarts(id);
        manager.publish(FleetEvent::HealthCheck {
            server_id: id.to_string(),
            healthy: true,
        });
        return Probe::Continue;
    }

    tracing::warn!(server = %id, state = %client.state(), "health check failed, restarting server");
    manager.publish(FleetEvent::HealthCheck {
        server_id: id.to_string(),
        healthy: false,
    });

    // Runs in the background: the restart cancels this timer.
    let restart = ManagerInner::restart_boxed(Arc::clone(manager), id.to_string());
    let server_id = id.to_string();
    manager.spawn_restart(id, async move {
        if let Err(e) = restart.await {
            tracing::warn!(server = %server_id, error = %e, "restart after failed health check failed");
        }
    });
    Probe::Stop
}
