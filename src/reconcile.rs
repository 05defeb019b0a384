// Per-cycle reconciliation of vehicle positions against the stop catalog.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::catalog::{StopRecord, envelope_items};
use crate::codec::{
    CongestionLevel, LOW_FLOOR_LABEL, VehicleClassTable, decode_congestion, is_low_floor,
};
use crate::normalize::{Leaf, extract_text, items_of, loosely_equals, parse_leading_int};
use crate::transform::JsonValue;

pub const UNKNOWN_VEHICLE_ID: &str = "번호 없음";
pub const DEFAULT_CONGESTION_CODE: &str = "0";

/// Both spellings have been seen in position responses.
pub const DEFAULT_CONGESTION_FIELDS: [&str; 2] = ["congetion", "congestion"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub section_order: i64,
    pub low_floor: bool,
    /// `None` when the code did not parse.
    pub congestion_code: Option<i64>,
    pub congestion: CongestionLevel,
    pub vehicle_class: Option<String>,
    /// Listed in the class table for some route; shown with the distinct badge.
    pub featured: bool,
    pub route_id: String,
}

impl VehiclePosition {
    pub fn congestion_label(&self) -> &'static str {
        self.congestion.label()
    }

    pub fn low_floor_label(&self) -> &'static str {
        if self.low_floor { LOW_FLOOR_LABEL } else { "" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub stop_index: usize,
    pub stop_name: String,
    pub vehicle: VehiclePosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedVehicle {
    pub vehicle_id: String,
    pub section_order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub placements: Vec<Placement>,
    pub unmatched: Vec<UnmatchedVehicle>,
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Field names tried in order for the congestion code.
    pub congestion_fields: Vec<String>,
    /// Unmatched vehicles are logged at warn level when set, debug otherwise.
    pub log_unmatched: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            congestion_fields: DEFAULT_CONGESTION_FIELDS.iter().map(|f| f.to_string()).collect(),
            log_unmatched: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
    class_table: VehicleClassTable,
}

pub fn vehicle_id_of(item: &JsonValue) -> String {
    extract_text(item.get("plainNo"), UNKNOWN_VEHICLE_ID)
}

/// Keeps the first record per vehicle id, in input order. Returns the
/// survivors and how many duplicates were dropped.
pub fn dedup_by_vehicle(items: Vec<&JsonValue>) -> (Vec<&JsonValue>, usize) {
    let total = items.len();
    let mut seen = HashSet::new();
    let survivors: Vec<_> = items
        .into_iter()
        .filter(|item| seen.insert(vehicle_id_of(item)))
        .collect();
    let dropped = total - survivors.len();
    (survivors, dropped)
}

impl Reconciler {
    pub fn new(options: ReconcileOptions, class_table: VehicleClassTable) -> Self {
        Reconciler { options, class_table }
    }

    /// Reconciles a whole position response, navigating its envelope.
    pub fn reconcile_response(
        &self,
        response: &JsonValue,
        catalog: &[StopRecord],
        route_id: &str,
    ) -> Reconciliation {
        self.reconcile(envelope_items(response), catalog, route_id)
    }

    pub fn reconcile(
        &self,
        raw_items: Option<&JsonValue>,
        catalog: &[StopRecord],
        route_id: &str,
    ) -> Reconciliation {
        let items = items_of(raw_items);
        if items.is_empty() {
            return Reconciliation::default();
        }

        let (survivors, duplicates_dropped) = dedup_by_vehicle(items);
        if duplicates_dropped > 0 {
            debug!(route = route_id, duplicates_dropped, "Dropped duplicate vehicle records");
        }

        let mut reconciliation = Reconciliation {
            duplicates_dropped,
            ..Default::default()
        };

        for item in survivors {
            let vehicle = self.decode_vehicle(item, route_id);

            let stop = catalog
                .iter()
                .enumerate()
                .find(|(_, stop)| loosely_equals(&stop.sequence, vehicle.section_order));

            match stop {
                Some((stop_index, stop)) => reconciliation.placements.push(Placement {
                    stop_index,
                    stop_name: stop.name.clone(),
                    vehicle,
                }),
                None => {
                    if self.options.log_unmatched {
                        warn!(
                            route = route_id,
                            vehicle = %vehicle.vehicle_id,
                            section_order = vehicle.section_order,
                            "⚠️  Vehicle has no matching stop, leaving it off the board"
                        );
                    } else {
                        debug!(
                            route = route_id,
                            vehicle = %vehicle.vehicle_id,
                            section_order = vehicle.section_order,
                            "Vehicle has no matching stop"
                        );
                    }
                    reconciliation.unmatched.push(UnmatchedVehicle {
                        vehicle_id: vehicle.vehicle_id,
                        section_order: vehicle.section_order,
                    });
                }
            }
        }

        reconciliation
    }

    fn decode_vehicle(&self, item: &JsonValue, route_id: &str) -> VehiclePosition {
        let vehicle_id = vehicle_id_of(item);
        let section_order = Leaf::of(item.get("sectOrd"))
            .text()
            .and_then(parse_leading_int)
            .unwrap_or(0);
        let low_floor = is_low_floor(&extract_text(item.get("busType"), ""));

        let raw_congestion = self
            .options
            .congestion_fields
            .iter()
            .find_map(|field| Leaf::of(item.get(field)).text())
            .unwrap_or(DEFAULT_CONGESTION_CODE);
        let vehicle_class = self
            .class_table
            .lookup(route_id, &vehicle_id)
            .map(str::to_string);
        let featured = self.class_table.is_featured(&vehicle_id);

        VehiclePosition {
            section_order,
            low_floor,
            congestion_code: parse_leading_int(raw_congestion),
            congestion: decode_congestion(raw_congestion),
            vehicle_class,
            featured,
            route_id: route_id.to_string(),
            vehicle_id,
        }
    }
}
