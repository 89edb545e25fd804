// Core data structures for the portal harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A portal extracted from a tile's entity list, ready to be upserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalRecord {
    /// Portal GUID, the upsert key
    pub id: String,
    pub name: String,
    pub image_url: String,
    pub lat: f64,
    pub lon: f64,
    /// First time this portal was seen
    pub first_seen: DateTime<Utc>,
    /// Most recent time this portal was seen
    pub last_seen: DateTime<Utc>,
}

impl PortalRecord {
    /// Create a record seen for the first time at `seen_at`
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image_url: impl Into<String>,
        lat: f64,
        lon: f64,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: image_url.into(),
            lat,
            lon,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }
}

/// Kind of game point whose name is filled from portal details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointKind {
    Gym,
    Stop,
}

impl PointKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gym => "gym",
            Self::Stop => "stop",
        }
    }

    /// Table holding points of this kind
    pub fn table(&self) -> &'static str {
        match self {
            Self::Gym => "gym",
            Self::Stop => "pokestop",
        }
    }

    /// Get all kinds, in update order
    pub fn all() -> [Self; 2] {
        [Self::Gym, Self::Stop]
    }
}

impl std::fmt::Display for PointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored point that still lacks a display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnnamedPoint {
    pub kind: PointKind,
    pub id: String,
}

/// Name and image resolved from a portal detail request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalDetail {
    pub name: String,
    pub image_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_has_equal_timestamps() {
        let now = Utc::now();
        let record = PortalRecord::new("guid.16", "Fountain", "https://img", 51.5, -0.1, now);
        assert_eq!(record.first_seen, record.last_seen);
        assert_eq!(record.id, "guid.16");
    }

    #[test]
    fn test_point_kind_tables() {
        assert_eq!(PointKind::Gym.table(), "gym");
        assert_eq!(PointKind::Stop.table(), "pokestop");
        assert_eq!(PointKind::Stop.to_string(), "stop");
        assert_eq!(PointKind::all(), [PointKind::Gym, PointKind::Stop]);
    }
}
