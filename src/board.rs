// Shared display state: the latest reconciled snapshot per route.

use chrono::{TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::catalog::StopRecord;
use crate::reconcile::{Placement, Reconciliation, UnmatchedVehicle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub route_id: String,
    /// Number of the poll cycle that produced this snapshot.
    pub cycle: u64,
    pub stops: Vec<StopRecord>,
    pub placements: Vec<Placement>,
    pub unmatched: Vec<UnmatchedVehicle>,
    pub duplicates_dropped: usize,
    pub updated_at: i64,
}

impl RouteSnapshot {
    pub fn new(route_id: &str, cycle: u64, stops: Vec<StopRecord>, reconciliation: Reconciliation) -> Self {
        RouteSnapshot {
            route_id: route_id.to_string(),
            cycle,
            stops,
            placements: reconciliation.placements,
            unmatched: reconciliation.unmatched,
            duplicates_dropped: reconciliation.duplicates_dropped,
            updated_at: current_timestamp(),
        }
    }

    /// Placements on the stop at `stop_index`, in reconciliation order.
    pub fn vehicles_at(&self, stop_index: usize) -> impl Iterator<Item = &Placement> {
        self.placements.iter().filter(move |p| p.stop_index == stop_index)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardStats {
    pub routes: usize,
    pub stops: usize,
    pub vehicles: usize,
    pub unmatched: usize,
    pub last_cycle: u64,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveBoard {
    snapshots: Arc<Mutex<HashMap<String, RouteSnapshot>>>,
}

impl LiveBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, RouteSnapshot>>> {
        match self.snapshots.lock() {
            Ok(guard) => Some(guard),
            Err(e) => {
                error!("❌ Failed to lock board: {}", e);
                None
            }
        }
    }

    /// Replaces the route's snapshot unless the one on display came from a
    /// newer cycle. Returns whether the snapshot was accepted.
    pub fn publish(&self, snapshot: RouteSnapshot) -> bool {
        let Some(mut snapshots) = self.lock() else {
            return false;
        };

        if let Some(current) = snapshots.get(&snapshot.route_id) {
            if current.cycle >= snapshot.cycle {
                debug!(
                    route = %snapshot.route_id,
                    stale = snapshot.cycle,
                    current = current.cycle,
                    "Discarding stale snapshot"
                );
                return false;
            }
        }

        snapshots.insert(snapshot.route_id.clone(), snapshot);
        true
    }

    pub fn snapshot(&self, route_id: &str) -> Option<RouteSnapshot> {
        self.lock()?.get(route_id).cloned()
    }

    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<_> = self
            .lock()
            .map(|snapshots| snapshots.keys().cloned().collect())
            .unwrap_or_default();
        routes.sort();
        routes
    }

    pub fn stats(&self) -> BoardStats {
        let Some(snapshots) = self.lock() else {
            return BoardStats {
                routes: 0,
                stops: 0,
                vehicles: 0,
                unmatched: 0,
                last_cycle: 0,
                last_update: None,
            };
        };

        BoardStats {
            routes: snapshots.len(),
            stops: snapshots.values().map(|s| s.stops.len()).sum(),
            vehicles: snapshots.values().map(|s| s.placements.len()).sum(),
            unmatched: snapshots.values().map(|s| s.unmatched.len()).sum(),
            last_cycle: snapshots.values().map(|s| s.cycle).max().unwrap_or(0),
            last_update: snapshots
                .values()
                .map(|s| s.updated_at)
                .max()
                .map(format_timestamp_full),
        }
    }
}

pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

pub fn format_timestamp_full(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(utc) => utc.with_timezone(&Seoul).format("%Y-%m-%d %H:%M:%S KST").to_string(),
        None => timestamp.to_string(),
    }
}
