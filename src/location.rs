//! Location and satellite value types.
//!
//! Values are produced by the engine callback translation step
//! ([`EngineCallbacks`](crate::engine::EngineCallbacks)) and are read-only
//! afterwards. Optional fields are `None` when the engine did not report them.

use serde::{Deserialize, Serialize};

/// Metres per second to knots.
pub const MPS_TO_KNOTS: f64 = 1.943844;

/// Accuracy level reported for GNSS fixes (`GEOCLUE_ACCURACY_LEVEL_DETAILED`).
pub const ACCURACY_LEVEL_DETAILED: i32 = 6;

/// Bits of the `fields` mask returned by `GetPosition` / `PositionChanged`.
pub mod position_fields {
    pub const NONE: u32 = 0x00;
    pub const LATITUDE: u32 = 0x01;
    pub const LONGITUDE: u32 = 0x02;
    pub const ALTITUDE: u32 = 0x04;
}

/// Bits of the `fields` mask returned by `GetVelocity` / `VelocityChanged`.
pub mod velocity_fields {
    pub const NONE: u32 = 0x00;
    pub const SPEED: u32 = 0x01;
    pub const DIRECTION: u32 = 0x02;
    pub const CLIMB: u32 = 0x04;
}

/// Horizontal and vertical accuracy in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub level: i32,
    pub horizontal: Option<f64>,
    pub vertical: Option<f64>,
}

impl Accuracy {
    pub fn detailed(horizontal: f64, vertical: f64) -> Self {
        Self {
            level: ACCURACY_LEVEL_DETAILED,
            horizontal: Some(horizontal),
            vertical: Some(vertical),
        }
    }
}

impl Default for Accuracy {
    fn default() -> Self {
        Self {
            level: 0,
            horizontal: None,
            vertical: None,
        }
    }
}

/// A single position/velocity snapshot.
///
/// `timestamp_ms == 0` is the empty sentinel: it never counts as a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Milliseconds since the Unix epoch, 0 when unknown.
    pub timestamp_ms: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Metres above the ellipsoid.
    pub altitude: Option<f64>,
    /// Knots.
    pub speed: Option<f64>,
    /// Degrees from true north.
    pub direction: Option<f64>,
    /// Vertical speed; no supported engine reports it.
    pub climb: Option<f64>,
    pub accuracy: Accuracy,
}

impl Location {
    /// The empty location used before the first fix and after positioning is disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_fix(&self) -> bool {
        self.timestamp_ms != 0
    }

    /// Timestamp in whole seconds, as carried by the bus interfaces.
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp_ms / 1000
    }

    pub fn position_fields(&self) -> u32 {
        let mut fields = position_fields::NONE;
        if self.latitude.is_some() {
            fields |= position_fields::LATITUDE;
        }
        if self.longitude.is_some() {
            fields |= position_fields::LONGITUDE;
        }
        if self.altitude.is_some() {
            fields |= position_fields::ALTITUDE;
        }
        fields
    }

    pub fn velocity_fields(&self) -> u32 {
        let mut fields = velocity_fields::NONE;
        if self.speed.is_some() {
            fields |= velocity_fields::SPEED;
        }
        if self.direction.is_some() {
            fields |= velocity_fields::DIRECTION;
        }
        if self.climb.is_some() {
            fields |= velocity_fields::CLIMB;
        }
        fields
    }
}

/// GNSS constellation of a hardware space-vehicle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constellation {
    Unknown,
    Gps,
    Sbas,
    Glonass,
    Qzss,
    Beidou,
    Galileo,
}

impl Constellation {
    /// Map the numeric constellation code used by both hardware backends.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Gps,
            2 => Self::Sbas,
            3 => Self::Glonass,
            4 => Self::Qzss,
            5 => Self::Beidou,
            6 => Self::Galileo,
            _ => Self::Unknown,
        }
    }

    /// Offset applied to a raw svid to land in the combined NMEA PRN space.
    pub fn prn_offset(self) -> i32 {
        match self {
            Self::Sbas => -87,
            Self::Glonass => 64,
            Self::Beidou => 200,
            Self::Galileo => 300,
            Self::Unknown | Self::Gps | Self::Qzss => 0,
        }
    }
}

/// Translate a raw space-vehicle id into the combined PRN consumers expect.
pub fn normalize_prn(svid: i32, constellation: Constellation) -> i32 {
    svid + constellation.prn_offset()
}

/// One visible satellite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SatelliteInfo {
    pub prn: i32,
    pub elevation: i32,
    pub azimuth: i32,
    pub snr: i32,
}

/// The satellites visible at one instant plus the PRNs used in the fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteSnapshot {
    pub timestamp_ms: i64,
    pub visible: Vec<SatelliteInfo>,
    pub used_prns: Vec<i32>,
}

impl SatelliteSnapshot {
    pub fn used_count(&self) -> usize {
        self.used_prns.len()
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}

/// Current and previous satellite snapshots.
#[derive(Debug, Clone, Default)]
pub struct SatelliteHistory {
    current: SatelliteSnapshot,
    previous: SatelliteSnapshot,
}

impl SatelliteHistory {
    /// Shift the current snapshot to previous and store `snapshot` as current.
    pub fn push(&mut self, snapshot: SatelliteSnapshot) {
        self.previous = std::mem::replace(&mut self.current, snapshot);
    }

    pub fn current(&self) -> &SatelliteSnapshot {
        &self.current
    }

    pub fn previous(&self) -> &SatelliteSnapshot {
        &self.previous
    }
}
