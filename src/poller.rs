// ============================================================================
// Poll Cycle Driver
// ============================================================================
//
// One cycle = for every configured route: station list, then bus positions,
// then reconciliation, then publish to the board. A tick that arrives while a
// cycle is still in flight is skipped, and a cycle still running after stop()
// has its results discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::board::{LiveBoard, RouteSnapshot};
use crate::catalog::envelope_items;
use crate::fetch::{BusApi, TransitFetcher};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { cycle: u64, published: usize },
    /// Another cycle was still running.
    Skipped,
    /// The driver was stopped; nothing was published.
    Cancelled,
}

struct SchedulerInner<F> {
    api: BusApi<F>,
    reconciler: Reconciler,
    board: LiveBoard,
    routes: Vec<String>,
    interval: Duration,
    cycles: AtomicU64,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

pub struct PollScheduler<F> {
    inner: Arc<SchedulerInner<F>>,
}

impl<F> Clone for PollScheduler<F> {
    fn clone(&self) -> Self {
        PollScheduler {
            inner: self.inner.clone(),
        }
    }
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<F: TransitFetcher + 'static> PollScheduler<F> {
    pub fn new(
        api: BusApi<F>,
        reconciler: Reconciler,
        board: LiveBoard,
        routes: Vec<String>,
        interval: Duration,
    ) -> Self {
        PollScheduler {
            inner: Arc::new(SchedulerInner {
                api,
                reconciler,
                board,
                routes,
                interval,
                cycles: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn board(&self) -> &LiveBoard {
        &self.inner.board
    }

    pub fn routes(&self) -> &[String] {
        &self.inner.routes
    }

    pub fn is_running_cycle(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Spawns the ticking task. The first tick fires immediately.
    pub fn start(&self) -> PollHandle {
        let scheduler = self.clone();
        let task = tokio::spawn(async move { scheduler.tick_loop().await });

        PollHandle {
            cancel: self.inner.cancel.clone(),
            task,
        }
    }

    /// Suppresses every future tick. A cycle already in flight runs to the
    /// end but publishes nothing.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    async fn tick_loop(self) {
        let mut interval = time::interval(self.inner.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "🔄 Polling {} route(s) every {:?}",
            self.inner.routes.len(),
            self.inner.interval
        );

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    info!("⏹️  Poll driver stopped");
                    break;
                }
                _ = interval.tick() => {
                    // Spawned so a slow upstream never delays the next tick;
                    // the in-flight guard decides whether it runs.
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.run_once().await;
                    });
                }
            }
        }
    }

    /// Runs one guarded cycle over every route.
    pub async fn run_once(&self) -> CycleOutcome {
        if self.inner.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("⚠️  Previous poll cycle still in flight, skipping this one");
            return CycleOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.inner.in_flight);

        let cycle = self.inner.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let mut published = 0;

        for route_id in &self.inner.routes {
            let Some(snapshot) = self.poll_route(route_id, cycle).await else {
                continue;
            };

            if self.inner.cancel.is_cancelled() {
                debug!(cycle, "Discarding results of a cycle that outlived stop()");
                return CycleOutcome::Cancelled;
            }

            if self.inner.board.publish(snapshot) {
                published += 1;
            }
        }

        info!(cycle, published, "✓ Poll cycle complete");
        CycleOutcome::Completed { cycle, published }
    }

    async fn poll_route(&self, route_id: &str, cycle: u64) -> Option<RouteSnapshot> {
        let stops = match self.inner.api.station_list(route_id).await {
            Ok(stops) => stops,
            Err(e) => {
                error!(route = route_id, "🚨 Station list request failed: {}", e);
                return None;
            }
        };

        if stops.is_empty() {
            warn!(route = route_id, "🚨 Station list is empty, skipping bus positions");
            return None;
        }

        let positions = match self.inner.api.bus_positions(route_id).await {
            Ok(positions) => positions,
            Err(e) => {
                error!(route = route_id, "🚨 Bus position request failed: {}", e);
                return None;
            }
        };

        if envelope_items(&positions).is_none() {
            warn!(route = route_id, "⚠️  Bus position response has no item list");
        }

        let reconciliation = self
            .inner
            .reconciler
            .reconcile_response(&positions, &stops, route_id);

        debug!(
            route = route_id,
            stops = stops.len(),
            placed = reconciliation.placements.len(),
            unmatched = reconciliation.unmatched.len(),
            "Route reconciled"
        );

        Some(RouteSnapshot::new(route_id, cycle, stops, reconciliation))
    }
}

pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the ticking task to exit after `stop`.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("❌ Poll driver task failed: {}", e);
        }
    }
}
