//! GNSS engine capability interface.
//!
//! The hardware binding (legacy HAL call table or HIDL service) lives outside
//! this crate and plugs in by implementing [`GnssEngine`]. Callbacks arrive on
//! the engine's own threads; bindings deliver them through the
//! [`EngineCallbacks`] handle they receive at init, which translates the raw
//! hardware records and queues them for the coordination loop.

pub mod sim;

use std::path::Path;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::event::{Event, EventSender};
use crate::location::{
    normalize_prn, Accuracy, Constellation, Location, SatelliteInfo, MPS_TO_KNOTS,
};

/// Requested operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Standalone,
    MsBased,
    MsAssisted,
}

/// Requested recurrence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Periodic,
    Single,
}

/// IP family of an access point, as passed to `data_conn_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnIpType {
    Ipv4,
    Ipv6,
    Ipv4v6,
}

impl ApnIpType {
    /// Map a modem context protocol string (`ip`, `ipv6`, `dual`).
    pub fn from_protocol(protocol: &str) -> Self {
        match protocol.to_ascii_lowercase().as_str() {
            "ipv6" => Self::Ipv6,
            "dual" | "ipv4v6" => Self::Ipv4v6,
            _ => Self::Ipv4,
        }
    }
}

/// AGNSS bearer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgnssType {
    Supl,
    C2k,
    Other(u16),
}

impl AgnssType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Supl,
            2 => Self::C2k,
            other => Self::Other(other),
        }
    }
}

/// AGNSS status reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgnssStatusValue {
    RequestDataConn,
    ReleaseDataConn,
    DataConnected,
    DataConnDone,
    DataConnFailed,
    Unknown(u16),
}

impl AgnssStatusValue {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::RequestDataConn,
            2 => Self::ReleaseDataConn,
            3 => Self::DataConnected,
            4 => Self::DataConnDone,
            5 => Self::DataConnFailed,
            other => Self::Unknown(other),
        }
    }
}

/// Engine status values (`GPS_STATUS_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    None,
    SessionBegin,
    SessionEnd,
    EngineOn,
    EngineOff,
}

impl EngineStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::SessionBegin,
            2 => Self::SessionEnd,
            3 => Self::EngineOn,
            4 => Self::EngineOff,
            _ => Self::None,
        }
    }
}

/// User response to a network-initiated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NiResponse {
    Accept,
    Deny,
    NoResponse,
}

/// Network-initiated notification; informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct NiNotification {
    pub notification_id: i32,
    pub ni_type: u32,
    pub requestor_id: String,
    pub text: String,
}

/// Flags of [`RawLocation::flags`].
pub mod location_flags {
    pub const HAS_LAT_LONG: u16 = 0x0001;
    pub const HAS_ALTITUDE: u16 = 0x0002;
    pub const HAS_SPEED: u16 = 0x0004;
    pub const HAS_BEARING: u16 = 0x0008;
    pub const HAS_HORIZONTAL_ACCURACY: u16 = 0x0010;
    pub const HAS_VERTICAL_ACCURACY: u16 = 0x0020;
}

/// Location record as delivered by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawLocation {
    pub flags: u16,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed_mps: f32,
    pub bearing: f32,
    pub horizontal_accuracy: f32,
    pub vertical_accuracy: f32,
    pub timestamp_ms: i64,
}

/// Space-vehicle record as delivered by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSvInfo {
    pub svid: i16,
    pub constellation: u8,
    pub cn0_dbhz: f32,
    pub elevation: f32,
    pub azimuth: f32,
    pub used_in_fix: bool,
}

/// Callback translated and queued for the coordination loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Location(Location),
    Status(EngineStatus),
    SvStatus {
        satellites: Vec<SatelliteInfo>,
        used_prns: Vec<i32>,
    },
    Nmea {
        timestamp_ms: i64,
        sentence: String,
    },
    Capabilities(u32),
    RequestUtcTime,
    AgnssStatus {
        agnss_type: AgnssType,
        status: AgnssStatusValue,
    },
    AgnssRilRequestSetId(u32),
    AgnssRilRequestRefLocation(u32),
    NiNotify(NiNotification),
    XtraDownloadRequest,
    SystemInfo {
        year_of_hw: u16,
    },
}

/// Translate a backend location record.
pub fn translate_location(raw: &RawLocation) -> Location {
    use location_flags::*;

    let mut location = Location {
        timestamp_ms: raw.timestamp_ms,
        ..Location::default()
    };

    if raw.flags & HAS_LAT_LONG != 0 {
        location.latitude = Some(raw.latitude);
        location.longitude = Some(raw.longitude);
    }
    if raw.flags & HAS_ALTITUDE != 0 {
        location.altitude = Some(raw.altitude);
    }
    if raw.flags & HAS_SPEED != 0 {
        location.speed = Some(f64::from(raw.speed_mps) * MPS_TO_KNOTS);
    }
    if raw.flags & HAS_BEARING != 0 {
        location.direction = Some(f64::from(raw.bearing));
    }
    if raw.flags & HAS_HORIZONTAL_ACCURACY != 0 {
        let horizontal = f64::from(raw.horizontal_accuracy);
        // Legacy HAL records carry a single accuracy value.
        let vertical = if raw.flags & HAS_VERTICAL_ACCURACY != 0 {
            f64::from(raw.vertical_accuracy)
        } else {
            horizontal
        };
        location.accuracy = Accuracy::detailed(horizontal, vertical);
    }

    location
}

/// Translate backend space-vehicle records into visible satellites and used PRNs.
pub fn translate_sv_status(svs: &[RawSvInfo]) -> (Vec<SatelliteInfo>, Vec<i32>) {
    let mut satellites = Vec::with_capacity(svs.len());
    let mut used_prns = Vec::new();

    for sv in svs {
        let prn = normalize_prn(i32::from(sv.svid), Constellation::from_code(sv.constellation));
        satellites.push(SatelliteInfo {
            prn,
            snr: sv.cn0_dbhz as i32,
            elevation: sv.elevation as i32,
            azimuth: sv.azimuth as i32,
        });
        // Used PRNs carry the same constellation offset as the visible
        // list; backends report the raw svid here.
        if sv.used_in_fix {
            used_prns.push(prn);
        }
    }

    (satellites, used_prns)
}

/// Thread-safe callback sink handed to the engine and its extensions.
#[derive(Debug, Clone)]
pub struct EngineCallbacks {
    events: EventSender,
}

impl EngineCallbacks {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    fn post(&self, event: EngineEvent) {
        self.events.post(Event::Engine(event));
    }

    pub fn location(&self, raw: &RawLocation) {
        self.post(EngineEvent::Location(translate_location(raw)));
    }

    pub fn status(&self, status: EngineStatus) {
        match status {
            EngineStatus::EngineOn | EngineStatus::EngineOff => {
                self.post(EngineEvent::Status(status))
            }
            other => debug!(status = ?other, "Engine status"),
        }
    }

    pub fn sv_status(&self, svs: &[RawSvInfo]) {
        let (satellites, used_prns) = translate_sv_status(svs);
        self.post(EngineEvent::SvStatus {
            satellites,
            used_prns,
        });
    }

    pub fn nmea(&self, timestamp_ms: i64, sentence: &str) {
        self.post(EngineEvent::Nmea {
            timestamp_ms,
            sentence: sentence.to_string(),
        });
    }

    pub fn set_capabilities(&self, capabilities: u32) {
        self.post(EngineEvent::Capabilities(capabilities));
    }

    pub fn acquire_wakelock(&self) {}

    pub fn release_wakelock(&self) {}

    pub fn request_utc_time(&self) {
        self.post(EngineEvent::RequestUtcTime);
    }

    pub fn agnss_status(&self, agnss_type: u16, status: u16) {
        self.post(EngineEvent::AgnssStatus {
            agnss_type: AgnssType::from_code(agnss_type),
            status: AgnssStatusValue::from_code(status),
        });
    }

    pub fn agnss_ril_request_set_id(&self, flags: u32) {
        self.post(EngineEvent::AgnssRilRequestSetId(flags));
    }

    pub fn agnss_ril_request_ref_location(&self, flags: u32) {
        self.post(EngineEvent::AgnssRilRequestRefLocation(flags));
    }

    pub fn ni_notify(&self, notification: NiNotification) {
        self.post(EngineEvent::NiNotify(notification));
    }

    pub fn xtra_download_request(&self) {
        self.post(EngineEvent::XtraDownloadRequest);
    }

    pub fn system_info(&self, year_of_hw: u16) {
        self.post(EngineEvent::SystemInfo { year_of_hw });
    }
}

/// Opaque hardware positioning engine.
///
/// Only the coordination thread calls these methods, so implementations need
/// no internal locking for them.
pub trait GnssEngine: Send {
    /// Backend name for logs and `health`.
    fn name(&self) -> &str;

    fn init(&mut self, callbacks: EngineCallbacks) -> Result<(), EngineError>;
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self) -> Result<(), EngineError>;
    fn cleanup(&mut self);

    fn inject_location(
        &mut self,
        latitude: f64,
        longitude: f64,
        accuracy_m: f32,
    ) -> Result<(), EngineError>;

    fn inject_time(
        &mut self,
        utc_time_ms: i64,
        reference_time_ms: i64,
        uncertainty_ms: i32,
    ) -> Result<(), EngineError>;

    fn delete_aiding_data(&mut self, flags: u16);

    fn set_position_mode(
        &mut self,
        mode: PositionMode,
        recurrence: Recurrence,
        min_interval_ms: u32,
        preferred_accuracy_m: u32,
        preferred_time_ms: u32,
    ) -> Result<(), EngineError>;

    fn agnss(&mut self) -> Option<&mut dyn Agnss> {
        None
    }

    fn agnss_ril(&mut self) -> Option<&mut dyn AgnssRil> {
        None
    }

    fn ni(&mut self) -> Option<&mut dyn GnssNi> {
        None
    }

    fn xtra(&mut self) -> Option<&mut dyn Xtra> {
        None
    }

    fn debug(&mut self) -> Option<&mut dyn GnssDebug> {
        None
    }
}

/// Assisted-GNSS data connection control.
pub trait Agnss {
    fn set_callback(&mut self, callbacks: EngineCallbacks);
    fn data_conn_open(&mut self, apn: &str, ip_type: ApnIpType) -> Result<(), EngineError>;
    fn data_conn_closed(&mut self) -> Result<(), EngineError>;
    fn data_conn_failed(&mut self) -> Result<(), EngineError>;
}

pub trait AgnssRil {
    fn set_callback(&mut self, callbacks: EngineCallbacks);
}

/// Network-initiated positioning requests.
pub trait GnssNi {
    fn set_callback(&mut self, callbacks: EngineCallbacks);
    fn respond(&mut self, notification_id: i32, response: NiResponse);
}

/// Almanac (XTRA) data injection.
pub trait Xtra {
    fn set_callback(&mut self, callbacks: EngineCallbacks) -> Result<(), EngineError>;
    fn inject_xtra_data(&mut self, data: &[u8]) -> Result<(), EngineError>;
}

pub trait GnssDebug {
    fn debug_data(&mut self) -> Option<String>;
}

/// Hand every optional extension its callback sink, in the order the
/// backends expect.
pub fn init_extensions(engine: &mut dyn GnssEngine, callbacks: &EngineCallbacks) {
    if let Some(agnss) = engine.agnss() {
        info!("Initialising AGNSS interface");
        agnss.set_callback(callbacks.clone());
    }
    if let Some(ni) = engine.ni() {
        info!("Initialising GNSS NI interface");
        ni.set_callback(callbacks.clone());
    }
    if let Some(ril) = engine.agnss_ril() {
        info!("Initialising AGNSS RIL interface");
        ril.set_callback(callbacks.clone());
    }
    if let Some(xtra) = engine.xtra() {
        info!("Initialising GNSS XTRA interface");
        if let Err(e) = xtra.set_callback(callbacks.clone()) {
            tracing::warn!(error = %e, "GNSS XTRA interface init failed");
        }
    }
}

/// Engine selection at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EngineKind {
    /// Probe for the HIDL service, then the legacy HAL module.
    Auto,
    /// Software engine for development without GNSS hardware.
    Simulated,
}

/// Hardware transports that can be probed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Hidl,
    Hal,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Hidl => "hidl",
            Self::Hal => "hal",
        }
    }
}

const HIDL_DEVICE: &str = "dev/hwbinder";
const HAL_MODULES: &[&str] = &[
    "vendor/lib64/hw/gps.default.so",
    "system/lib64/hw/gps.default.so",
    "vendor/lib/hw/gps.default.so",
    "system/lib/hw/gps.default.so",
];

/// Find which hardware transport is present under `root` (normally `/`).
pub fn probe(root: &Path) -> Option<Backend> {
    if root.join(HIDL_DEVICE).exists() {
        return Some(Backend::Hidl);
    }
    if HAL_MODULES.iter().any(|module| root.join(module).exists()) {
        return Some(Backend::Hal);
    }
    None
}

/// Open the engine for `kind`.
///
/// Hardware bindings are supplied by the embedding build through
/// [`LocationProvider::new`](crate::provider::LocationProvider::new); when
/// probing finds a transport without a linked binding this reports
/// [`EngineError::BindingUnavailable`].
pub fn open(kind: EngineKind, root: &Path) -> Result<Box<dyn GnssEngine>, EngineError> {
    match kind {
        EngineKind::Simulated => Ok(Box::new(sim::SimulatedEngine::new())),
        EngineKind::Auto => match probe(root) {
            Some(backend) => Err(EngineError::BindingUnavailable(backend.name())),
            None => Err(EngineError::NoBackend {
                probed: format!("{}, {}", HIDL_DEVICE, HAL_MODULES.join(", ")),
            }),
        },
    }
}
