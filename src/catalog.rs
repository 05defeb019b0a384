// Stop catalog built from the station-list response.

use serde::{Deserialize, Serialize};

use crate::normalize::{extract_text, items_of};
use crate::transform::JsonValue;

/// `ServiceResult.msgBody.itemList`, shared by both bus API responses.
pub const ENVELOPE_PATH: [&str; 3] = ["ServiceResult", "msgBody", "itemList"];

pub const UNKNOWN_STATION_NAME: &str = "정류장 정보 없음";
pub const DEFAULT_SEQUENCE: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRecord {
    pub name: String,
    /// Kept as sent; only ever compared against a vehicle's section order.
    pub sequence: String,
}

/// The item list of a response, `None` when any envelope segment is missing.
pub fn envelope_items(root: &JsonValue) -> Option<&JsonValue> {
    root.path(&ENVELOPE_PATH)
}

pub fn build_catalog(root: &JsonValue) -> Vec<StopRecord> {
    items_of(envelope_items(root))
        .into_iter()
        .map(|station| StopRecord {
            name: extract_text(station.get("stationNm"), UNKNOWN_STATION_NAME),
            sequence: extract_text(station.get("seq"), DEFAULT_SEQUENCE),
        })
        .collect()
}
