//! Periodic aging, propagation and the recomputation worker
//!
//! Every task holds only a weak reference to its policy, so dropping the
//! policy also ends the tasks at their next wake-up. All tasks listen on one
//! `watch` channel for shutdown.

use crate::routing::policy::LinkStatePolicy;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Running background tasks of one policy
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Spawn the age tick, the propagation tick and the recomputation worker
    /// on `runtime`
    pub(crate) fn start(
        runtime: &Handle,
        policy: &Arc<LinkStatePolicy>,
        age_tick: Duration,
        propagation: Duration,
        recompute_signal: Arc<Notify>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let aging = Arc::downgrade(policy);
        let flooding = Arc::downgrade(policy);
        let worker = Arc::downgrade(policy);

        let tasks = vec![
            spawn_periodic(runtime, "age_tick", age_tick, shutdown_rx.clone(), move || {
                with_policy(&aging, |p| {
                    p.age_tick();
                })
            }),
            spawn_periodic(runtime, "propagation", propagation, shutdown_rx.clone(), move || {
                with_policy(&flooding, |p| {
                    p.propagate_now();
                })
            }),
            spawn_recompute_worker(runtime, worker, recompute_signal, shutdown_rx),
        ];

        Self { shutdown_tx, tasks }
    }

    /// Number of spawned tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every task and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn with_policy(policy: &Weak<LinkStatePolicy>, f: impl FnOnce(&LinkStatePolicy)) -> bool {
    match policy.upgrade() {
        Some(policy) => {
            f(&policy);
            true
        },
        None => false,
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) -> bool {
    shutdown.changed().await.is_err() || *shutdown.borrow()
}

fn spawn_periodic<F>(
    runtime: &Handle,
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    runtime.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !tick() {
                        break;
                    }
                }
                stop = stop_requested(&mut shutdown) => {
                    if stop {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "Periodic task stopped");
    })
}

fn spawn_recompute_worker(
    runtime: &Handle,
    policy: Weak<LinkStatePolicy>,
    signal: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                _ = signal.notified() => {
                    if !with_policy(&policy, |p| {
                        p.recompute_now();
                    }) {
                        break;
                    }
                }
                stop = stop_requested(&mut shutdown) => {
                    if stop {
                        break;
                    }
                }
            }
        }
        debug!("Recomputation worker stopped");
    })
}
