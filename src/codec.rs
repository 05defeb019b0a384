// Small categorical codes carried by vehicle records: congestion level,
// low-floor flag and the per-route vehicle class table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{BusError, Result};
use crate::normalize::parse_leading_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    NoInformation,
    Relaxed,
    Normal,
    Crowded,
    VeryCrowded,
}

impl CongestionLevel {
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => CongestionLevel::Relaxed,
            4 => CongestionLevel::Normal,
            5 => CongestionLevel::Crowded,
            6 => CongestionLevel::VeryCrowded,
            _ => CongestionLevel::NoInformation,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CongestionLevel::NoInformation => "정보 없음",
            CongestionLevel::Relaxed => "여유",
            CongestionLevel::Normal => "보통",
            CongestionLevel::Crowded => "혼잡",
            CongestionLevel::VeryCrowded => "매우혼잡",
        }
    }
}

/// Decodes an upstream congestion code. Total: unknown codes and unparseable
/// text both mean "no information".
pub fn decode_congestion(raw_code: &str) -> CongestionLevel {
    parse_leading_int(raw_code)
        .map(CongestionLevel::from_code)
        .unwrap_or(CongestionLevel::NoInformation)
}

pub const LOW_FLOOR_LABEL: &str = "저상";

/// `busType` is "1" for low-floor vehicles.
pub fn is_low_floor(bus_type: &str) -> bool {
    bus_type == "1"
}

/// Every ASCII digit in the id, in order: "서울74사8027" keys as "748027".
pub fn digits_of(vehicle_id: &str) -> String {
    vehicle_id.chars().filter(char::is_ascii_digit).collect()
}

// ============================================================================
// Vehicle class table
// ============================================================================

pub const GREENCITY_ROUTE_ID: &str = "114900001";
pub const GREENCITY_CLASS: &str = "GREENCITY";

/// Special vehicle classifications keyed by route and plate digits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleClassTable {
    entries: HashMap<(String, String), String>,
}

impl VehicleClassTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Two GREENCITY vehicles on route 114900001.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for digits in ["8027", "8030"] {
            table.insert(GREENCITY_ROUTE_ID, digits, GREENCITY_CLASS);
        }
        table
    }

    pub fn insert(&mut self, route_id: &str, vehicle_digits: &str, class_tag: &str) {
        self.entries.insert(
            (route_id.to_string(), vehicle_digits.to_string()),
            class_tag.to_string(),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, route_id: &str, vehicle_id: &str) -> Option<&str> {
        self.entries
            .get(&(route_id.to_string(), digits_of(vehicle_id)))
            .map(String::as_str)
    }

    /// Whether the vehicle is listed for any route. Drives the distinct badge
    /// image, which does not depend on the route being shown.
    pub fn is_featured(&self, vehicle_id: &str) -> bool {
        let digits = digits_of(vehicle_id);
        self.entries.keys().any(|(_, listed)| *listed == digits)
    }

    /// Parses `route_id,vehicle_digits,class_tag` rows (header required).
    /// Rows with a missing or empty column are skipped with a warning.
    pub fn from_csv(contents: &str) -> Result<Self> {
        let mut table = Self::empty();
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(contents.as_bytes());

        for (line, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| BusError::ParseError(format!("Invalid class table row: {}", e)))?;

            match (record.get(0), record.get(1), record.get(2)) {
                (Some(route_id), Some(digits), Some(class_tag))
                    if !route_id.trim().is_empty()
                        && !digits.trim().is_empty()
                        && !class_tag.trim().is_empty() =>
                {
                    table.insert(route_id.trim(), &digits_of(digits), class_tag.trim());
                }
                _ => warn!("⚠️  Skipping incomplete class table row {}", line + 2),
            }
        }

        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BusError::FileError(format!("Failed to read class table {:?}: {}", path, e))
        })?;
        let table = Self::from_csv(&contents)?;
        info!("✓ Vehicle class table loaded from {:?} ({} entries)", path, table.len());
        Ok(table)
    }
}
