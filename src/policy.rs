//! Positioning policy: may the GNSS engine run right now, and may it use
//! network assistance.
//!
//! Settings come from the location settings file (Qt INI format, group
//! `[location]`). Two generations of key names exist; structured per-provider
//! keys win and the flat legacy keys are only consulted when the structured
//! key is absent.

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::{self, parse_bool};

/// One snapshot of the externally controlled settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub location_enabled: bool,
    pub gps_source_allowed: bool,
    pub gps_enabled: bool,
    pub agnss_agreement_accepted: bool,
    pub agnss_provider_enabled: bool,
    pub agnss_online_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            location_enabled: false,
            gps_source_allowed: true,
            gps_enabled: true,
            agnss_agreement_accepted: false,
            agnss_provider_enabled: false,
            agnss_online_enabled: false,
        }
    }
}

/// First key in `keys` present in the section, parsed as a boolean.
fn lookup(ini: &Ini, keys: &[&str]) -> Option<bool> {
    let section = ini.section(Some("location"))?;
    keys.iter().find_map(|key| {
        let value = section.get(*key)?;
        let parsed = parse_bool(value);
        if parsed.is_none() {
            warn!(key, value, "Ignoring non-boolean location setting");
        }
        parsed
    })
}

impl Settings {
    /// Resolve every setting from a parsed location settings file.
    pub fn from_ini(ini: &Ini) -> Self {
        let defaults = Self::default();

        // `agreement_accepted` is the legacy on/off toggle for the assistance
        // provider, `here_agreement_accepted` the legacy acceptance state.
        let legacy_toggle = lookup(ini, &["agreement_accepted"]);
        let agnss_agreement_accepted = lookup(
            ini,
            &[
                "agnss\\agreement_accepted",
                "here_agreement_accepted",
                "agreement_accepted",
            ],
        )
        .unwrap_or(defaults.agnss_agreement_accepted);
        let agnss_provider_enabled = lookup(ini, &["agnss\\enabled"])
            .or(legacy_toggle)
            .unwrap_or(defaults.agnss_provider_enabled);
        // Legacy files had no separate online switch: assistance implied online use.
        let agnss_online_enabled = lookup(ini, &["agnss\\online_enabled"])
            .unwrap_or(agnss_provider_enabled);

        Self {
            location_enabled: lookup(ini, &["enabled"]).unwrap_or(defaults.location_enabled),
            gps_source_allowed: lookup(ini, &["allowed_data_sources\\gps"])
                .unwrap_or(defaults.gps_source_allowed),
            gps_enabled: lookup(ini, &["gps\\enabled"]).unwrap_or(defaults.gps_enabled),
            agnss_agreement_accepted,
            agnss_provider_enabled,
            agnss_online_enabled,
        }
    }
}

/// Where settings snapshots come from.
pub trait SettingsSource: Send {
    fn load(&self) -> Settings;

    /// True when the backing store changed since the last call.
    fn poll_changed(&mut self) -> bool {
        false
    }
}

/// Location settings file on disk, polled by modification time.
pub struct IniSettingsSource {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl IniSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl SettingsSource for IniSettingsSource {
    fn load(&self) -> Settings {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Location settings missing, using defaults");
            return Settings::default();
        }
        match config::load_ini(&self.path) {
            Ok(ini) => Settings::from_ini(&ini),
            Err(e) => {
                warn!(error = %e, "Failed to read location settings");
                Settings::default()
            }
        }
    }

    fn poll_changed(&mut self) -> bool {
        let current = modified(&self.path);
        if current != self.last_modified {
            self.last_modified = current;
            return true;
        }
        false
    }
}

/// Device power switch exposed on the bus.
#[derive(Debug, Default)]
pub struct DeviceControl {
    powered: bool,
}

impl DeviceControl {
    pub fn new(powered: bool) -> Self {
        Self { powered }
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Returns true when the value changed.
    pub fn set_powered(&mut self, powered: bool) -> bool {
        if self.powered == powered {
            return false;
        }
        self.powered = powered;
        true
    }
}

/// Gate transition produced by an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateChange {
    Unchanged,
    Opened,
    Closed,
}

pub struct PositioningPolicy {
    source: Box<dyn SettingsSource>,
    device: DeviceControl,
    flight_mode: bool,
    gate: Option<bool>,
    agnss_enabled: bool,
    agnss_online_enabled: bool,
}

impl PositioningPolicy {
    pub fn new(source: Box<dyn SettingsSource>, device: DeviceControl) -> Self {
        Self {
            source,
            device,
            flight_mode: false,
            gate: None,
            agnss_enabled: false,
            agnss_online_enabled: false,
        }
    }

    /// Recompute the gate and the assistance flags.
    pub fn positioning_enabled(&mut self) -> bool {
        let settings = self.source.load();

        self.agnss_enabled =
            settings.agnss_agreement_accepted && settings.agnss_provider_enabled;
        self.agnss_online_enabled = self.agnss_enabled && settings.agnss_online_enabled;

        settings.location_enabled
            && settings.gps_source_allowed
            && settings.gps_enabled
            && !self.flight_mode
            && self.device.powered()
    }

    /// Evaluate and report how the gate moved since the previous evaluation.
    pub fn evaluate(&mut self) -> GateChange {
        let allowed = self.positioning_enabled();
        let previous = self.gate.replace(allowed);
        match (previous, allowed) {
            (Some(false) | None, true) => {
                info!("Positioning allowed");
                GateChange::Opened
            }
            (Some(true), false) => {
                info!("Positioning disallowed");
                GateChange::Closed
            }
            _ => GateChange::Unchanged,
        }
    }

    /// Gate value of the last evaluation.
    pub fn is_open(&self) -> bool {
        self.gate == Some(true)
    }

    /// Assisted GNSS allowed (agreement accepted and provider enabled).
    pub fn agnss_enabled(&self) -> bool {
        self.agnss_enabled
    }

    /// Assisted GNSS may use the network.
    pub fn agnss_online_enabled(&self) -> bool {
        self.agnss_online_enabled
    }

    pub fn set_flight_mode(&mut self, flight_mode: bool) -> bool {
        let changed = self.flight_mode != flight_mode;
        self.flight_mode = flight_mode;
        changed
    }

    pub fn device(&self) -> &DeviceControl {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceControl {
        &mut self.device
    }

    pub fn poll_settings_changed(&mut self) -> bool {
        self.source.poll_changed()
    }
}
