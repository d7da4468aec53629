//! The location provider.
//!
//! Owns the engine, the consumer registry, the status machine, the policy
//! gate and the three assistance coordinators. Everything here runs on the
//! coordination loop; other threads reach it only through
//! [`Event`](crate::event::Event)s.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agnss::{AgnssCoordinator, AgnssOutcome};
use crate::clock::Clock;
use crate::config::{
    GpsConf, FIX_TIMEOUT, PREFERRED_ACCURACY_M, PREFERRED_INITIAL_FIX_TIME_MS, QUIT_IDLE_TIME,
    SETTINGS_POLL_INTERVAL,
};
use crate::engine::{
    init_extensions, Agnss, EngineCallbacks, EngineEvent, EngineStatus, GnssEngine, PositionMode,
    Recurrence,
};
use crate::error::{EngineError, MethodError};
use crate::event::{Event, EventSender};
use crate::location::{
    position_fields, Accuracy, Location, SatelliteHistory, SatelliteInfo, SatelliteSnapshot,
};
use crate::network::Network;
use crate::nmea;
use crate::ntp::{NtpTimeSync, NtpTransport};
use crate::policy::{DeviceControl, GateChange, PositioningPolicy, SettingsSource};
use crate::protocol::{methods, signals, Signal};
use crate::service::{BusService, HealthStatus, MethodInfo, ParamInfo, SignalSink};
use crate::session::SessionRegistry;
use crate::status::{FixTimer, Status, StatusMachine, Transition};
use crate::timer::{TimerId, Timers};
use crate::xtra::{XtraDownloader, XtraFetcher};

pub const PROVIDER_NAME: &str = "Hybris";
pub const PROVIDER_DESCRIPTION: &str = "GNSS hardware location provider";

/// Everything the provider talks to.
pub struct Collaborators {
    /// The opened engine, or why it could not be opened.
    pub engine: Result<Box<dyn GnssEngine>, EngineError>,
    pub settings: Box<dyn SettingsSource>,
    pub device: DeviceControl,
    pub network: Box<dyn Network>,
    pub ntp_transport: Box<dyn NtpTransport>,
    pub xtra_fetcher: Box<dyn XtraFetcher>,
    pub clock: Arc<dyn Clock>,
    pub signals: Box<dyn SignalSink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub description: String,
}

/// `GetPosition` reply and `PositionChanged` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub fields: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Accuracy,
}

/// `GetVelocity` reply and `VelocityChanged` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub fields: u32,
    pub timestamp: i64,
    /// Knots.
    pub speed: Option<f64>,
    pub direction: Option<f64>,
    pub climb: Option<f64>,
}

/// `GetSatellite`/`GetLastSatellite` reply and `SatelliteChanged` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Satellites {
    pub timestamp: i64,
    pub used_count: usize,
    pub visible_count: usize,
    pub used_prns: Vec<i32>,
    pub satellites: Vec<SatelliteInfo>,
}

impl From<&SatelliteSnapshot> for Satellites {
    fn from(snapshot: &SatelliteSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp_ms / 1000,
            used_count: snapshot.used_count(),
            visible_count: snapshot.visible_count(),
            used_prns: snapshot.used_prns.clone(),
            satellites: snapshot.visible.clone(),
        }
    }
}

/// Position reported by another provider, used to seed the engine.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InjectedPosition {
    #[serde(default)]
    pub fields: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub horizontal_accuracy: Option<f64>,
}

fn require_caller<'a>(caller: Option<&'a str>, method: &str) -> &'a str {
    match caller {
        Some(caller) => caller,
        None => panic!("{} must only be called from the bus", method),
    }
}

fn reply<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub struct LocationProvider {
    engine: Option<Box<dyn GnssEngine>>,
    engine_error: Option<EngineError>,
    engine_started: bool,
    registry: SessionRegistry,
    status: StatusMachine,
    policy: PositioningPolicy,
    timers: Timers,
    agnss: AgnssCoordinator,
    ntp: NtpTimeSync,
    xtra: XtraDownloader,
    network: Box<dyn Network>,
    signals: Box<dyn SignalSink>,
    clock: Arc<dyn Clock>,
    location: Location,
    satellites: SatelliteHistory,
    magnetic_variation: Option<f64>,
    /// Positions from other providers are forwarded until our first fix.
    injection_armed: bool,
    quit: bool,
}

impl LocationProvider {
    /// Initialise the engine and arm the idle timer. Engine callbacks are
    /// posted to `events`.
    pub fn new(parts: Collaborators, gps: &GpsConf, events: EventSender) -> Self {
        let (engine, engine_error) = match parts.engine {
            Ok(mut engine) => {
                let callbacks = EngineCallbacks::new(events);
                match engine.init(callbacks.clone()) {
                    Ok(()) => {
                        info!(engine = engine.name(), "GNSS engine initialised");
                        init_extensions(engine.as_mut(), &callbacks);
                        (Some(engine), None)
                    }
                    Err(e) => {
                        error!(
                            engine = engine.name(),
                            error = %e,
                            "Failed to initialise GNSS engine"
                        );
                        engine.cleanup();
                        (None, Some(e))
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "No GNSS engine");
                (None, Some(e))
            }
        };

        let mut provider = Self {
            status: StatusMachine::new(engine.is_some()),
            engine,
            engine_error,
            engine_started: false,
            registry: SessionRegistry::new(),
            policy: PositioningPolicy::new(parts.settings, parts.device),
            timers: Timers::new(),
            agnss: AgnssCoordinator::new(),
            ntp: NtpTimeSync::new(parts.ntp_transport, parts.clock.clone()),
            clock: parts.clock,
            xtra: XtraDownloader::new(
                gps.xtra_servers.clone(),
                gps.xtra_user_agent.clone(),
                gps.force_xtra_inject,
                parts.xtra_fetcher,
            ),
            network: parts.network,
            signals: parts.signals,
            location: Location::empty(),
            satellites: SatelliteHistory::default(),
            magnetic_variation: None,
            injection_armed: false,
            quit: false,
        };

        provider.policy.evaluate();
        provider.timers.start(TimerId::Idle, QUIT_IDLE_TIME);
        provider.timers.start(TimerId::SettingsPoll, SETTINGS_POLL_INTERVAL);
        provider
    }

    pub fn status(&self) -> Status {
        self.status.status()
    }

    pub fn engine_running(&self) -> bool {
        self.engine_started
    }

    pub fn consumer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn timer_active(&self, id: TimerId) -> bool {
        self.timers.is_active(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // Bus operations

    pub fn add_reference(&mut self, caller: Option<&str>) {
        let consumer = require_caller(caller, methods::ADD_REFERENCE);
        if self.registry.add_reference(consumer) {
            self.timers.stop(TimerId::Idle);
        }
        self.start_positioning_if_needed();
    }

    pub fn remove_reference(&mut self, caller: Option<&str>) {
        let consumer = require_caller(caller, methods::REMOVE_REFERENCE);
        self.registry.remove_reference(consumer);
        if self.registry.is_empty() {
            self.timers.start(TimerId::Idle, QUIT_IDLE_TIME);
        }
        self.stop_positioning_if_needed();
    }

    /// A peer left the bus: drop every reference it held.
    pub fn peer_disconnected(&mut self, peer: &str) {
        if !self.registry.remove_consumer(peer) {
            return;
        }
        info!(peer, "Consumer vanished");
        if self.registry.is_empty() {
            self.timers.start(TimerId::Idle, QUIT_IDLE_TIME);
        }
        self.stop_positioning_if_needed();
    }

    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            description: PROVIDER_DESCRIPTION.to_string(),
        }
    }

    /// Per-consumer options. Only `UpdateInterval` (milliseconds) is used.
    pub fn set_options(
        &mut self,
        caller: Option<&str>,
        options: &HashMap<String, Value>,
    ) -> Result<(), MethodError> {
        let consumer = require_caller(caller, methods::SET_OPTIONS);
        let Some(value) = options.get("UpdateInterval") else {
            return Ok(());
        };
        let interval = value
            .as_u64()
            .ok_or_else(|| {
                MethodError::invalid("UpdateInterval", "expected a non-negative integer")
            })?;
        let interval = u32::try_from(interval).unwrap_or(u32::MAX);

        if self.registry.set_update_interval(consumer, interval).is_err() {
            return Ok(());
        }
        if self.engine_started {
            if let Err(e) = self.apply_position_mode() {
                warn!(error = %e, "Failed to set position mode for new update interval");
            }
        }
        Ok(())
    }

    pub fn position(&self) -> Position {
        let location = &self.location;
        Position {
            fields: location.position_fields(),
            timestamp: location.timestamp_secs(),
            latitude: location.latitude,
            longitude: location.longitude,
            altitude: location.altitude,
            accuracy: location.accuracy,
        }
    }

    pub fn velocity(&self) -> Velocity {
        let location = &self.location;
        Velocity {
            fields: location.velocity_fields(),
            timestamp: location.timestamp_secs(),
            speed: location.speed,
            direction: location.direction,
            climb: location.climb,
        }
    }

    pub fn satellites(&self) -> Satellites {
        Satellites::from(self.satellites.current())
    }

    pub fn last_satellites(&self) -> Satellites {
        Satellites::from(self.satellites.previous())
    }

    pub fn magnetic_variation(&self) -> Option<f64> {
        self.magnetic_variation
    }

    /// Forward a position from another provider to the engine. Returns true
    /// when it was injected.
    pub fn inject_position(&mut self, position: &InjectedPosition) -> bool {
        if !self.injection_armed {
            return false;
        }
        let both = position_fields::LATITUDE | position_fields::LONGITUDE;
        let (Some(latitude), Some(longitude)) = (position.latitude, position.longitude) else {
            return false;
        };
        if position.fields & both != both {
            return false;
        }
        let Some(engine) = self.engine.as_deref_mut() else {
            return false;
        };
        let accuracy = position.horizontal_accuracy.unwrap_or(0.0) as f32;
        match engine.inject_location(latitude, longitude, accuracy) {
            Ok(()) => {
                debug!(latitude, longitude, accuracy, "Injected position");
                true
            }
            Err(e) => {
                warn!(error = %e, "Position injection failed");
                false
            }
        }
    }

    pub fn powered(&self) -> bool {
        self.policy.device().powered()
    }

    pub fn set_powered(&mut self, powered: bool) {
        if self.policy.device_mut().set_powered(powered) {
            info!(powered, "Device power changed");
            self.on_settings_changed();
        }
    }

    // Session control

    fn position_mode(&self) -> PositionMode {
        if self.policy.agnss_enabled() {
            PositionMode::MsBased
        } else {
            PositionMode::Standalone
        }
    }

    fn apply_position_mode(&mut self) -> Result<(), EngineError> {
        let mode = self.position_mode();
        let interval = self.registry.minimum_requested_interval();
        let Some(engine) = self.engine.as_deref_mut() else {
            return Ok(());
        };
        debug!(?mode, interval, "Setting position mode");
        engine.set_position_mode(
            mode,
            Recurrence::Periodic,
            interval,
            PREFERRED_ACCURACY_M,
            PREFERRED_INITIAL_FIX_TIME_MS,
        )
    }

    /// Re-evaluate the policy gate. Closing it clears the current fix.
    fn refresh_gate(&mut self) -> bool {
        if self.policy.evaluate() == GateChange::Closed {
            self.set_location(Location::empty());
        }
        self.policy.is_open()
    }

    /// Start the engine if there are consumers, the gate is open and it is
    /// not already running. Returns true when the engine was started.
    pub fn start_positioning_if_needed(&mut self) -> bool {
        if self.engine_started || self.registry.is_empty() || !self.refresh_gate() {
            return false;
        }

        self.timers.stop(TimerId::Idle);

        if self.engine.is_none() {
            return false;
        }
        if let Err(e) = self.apply_position_mode() {
            warn!(error = %e, "Failed to set position mode");
            return false;
        }
        let Some(engine) = self.engine.as_deref_mut() else {
            return false;
        };
        if let Err(e) = engine.start() {
            warn!(error = %e, "Failed to start positioning");
            return false;
        }

        self.engine_started = true;
        self.injection_armed = true;
        info!(consumers = self.registry.len(), "Positioning started");
        true
    }

    /// Stop the engine unless it still has consumers and the gate is open.
    /// Returns true when the engine was stopped.
    pub fn stop_positioning_if_needed(&mut self) -> bool {
        if !self.engine_started {
            return false;
        }
        if self.refresh_gate() && !self.registry.is_empty() {
            return false;
        }

        self.injection_armed = false;
        if let Some(engine) = self.engine.as_deref_mut() {
            if let Err(e) = engine.stop() {
                warn!(error = %e, "Failed to stop positioning");
            }
        }
        self.engine_started = false;
        let transition = self.status.stopped();
        self.apply(transition);
        info!("Positioning stopped");
        true
    }

    fn on_settings_changed(&mut self) {
        if self.refresh_gate() {
            self.start_positioning_if_needed();
        } else {
            self.stop_positioning_if_needed();
        }
    }

    fn apply(&mut self, transition: Transition) {
        match transition.fix_timer {
            FixTimer::Arm => self.timers.start(TimerId::FixLost, FIX_TIMEOUT),
            FixTimer::Disarm => self.timers.stop(TimerId::FixLost),
            FixTimer::Keep => {}
        }
        if let Some(status) = transition.changed {
            self.emit(signals::STATUS_CHANGED, json!({ "status": status.code() }));
        }
    }

    fn emit(&self, name: &str, args: Value) {
        self.signals.emit(Signal::new(name, args));
    }

    fn set_location(&mut self, location: Location) {
        self.injection_armed = false;
        let transition = self.status.fix_received(location.timestamp_ms);
        self.apply(transition);

        self.location = location;
        self.emit(signals::VELOCITY_CHANGED, reply(self.velocity()));
        self.emit(signals::POSITION_CHANGED, reply(self.position()));
    }

    // Events

    /// React to one event from the coordination loop.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Engine(event) => self.on_engine_event(event),
            Event::PeerDisconnected(peer) => self.peer_disconnected(&peer),
            Event::SettingsChanged => self.on_settings_changed(),
            Event::FlightModeChanged(flight_mode) => {
                if self.policy.set_flight_mode(flight_mode) {
                    info!(flight_mode, "Flight mode changed");
                    self.on_settings_changed();
                }
            }
            Event::NetworkStateChanged { online } => {
                if online {
                    let online_enabled = self.policy.agnss_online_enabled();
                    self.xtra.on_network_online(self.engine_started, online_enabled);
                }
            }
            Event::CellularConnected(connected) => {
                self.agnss_step(|coordinator, agnss, network| {
                    coordinator.on_cellular_connected(connected, agnss, network)
                });
            }
            Event::ConnectionError { path, error } => {
                debug!(path = %path, error = %error, "Connection error reported");
                self.agnss_step(|coordinator, agnss, _| {
                    coordinator.on_connection_error(&path, agnss)
                });
            }
            Event::ConnectionSelectorClosed { selected } => {
                self.agnss_step(|coordinator, agnss, _| {
                    coordinator.on_selector_closed(selected, agnss)
                });
            }
            Event::NtpResolved { host, address } => self.ntp.on_resolved(&host, address),
            Event::NtpDatagram {
                payload,
                received_ticks_ms,
            } => {
                let sample = self
                    .ntp
                    .on_datagram(&payload, received_ticks_ms, &mut self.timers);
                if let (Some(sample), Some(engine)) = (sample, self.engine.as_deref_mut()) {
                    if let Err(e) = engine.inject_time(
                        sample.utc_time_ms,
                        sample.reference_time_ms,
                        sample.uncertainty_ms,
                    ) {
                        warn!(error = %e, "Time injection failed");
                    }
                }
            }
            Event::XtraFetched { url, result } => {
                let xtra = self.engine.as_deref_mut().and_then(|engine| engine.xtra());
                let outcome = self.xtra.on_fetched(&url, result, xtra);
                debug!(?outcome, "XTRA download step");
            }
            Event::MethodCall { .. } | Event::Shutdown => {
                debug!("Loop-level event reached the provider");
            }
        }
    }

    fn agnss_step<F>(&mut self, step: F)
    where
        F: FnOnce(&mut AgnssCoordinator, &mut dyn Agnss, &mut dyn Network) -> AgnssOutcome,
    {
        let Some(agnss) = self.engine.as_deref_mut().and_then(|engine| engine.agnss()) else {
            warn!("Engine has no AGNSS interface");
            return;
        };
        let network: &mut dyn Network = self.network.as_mut();
        let outcome = step(&mut self.agnss, agnss, network);
        debug!(?outcome, "AGNSS step");
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Location(location) => {
                if !self.engine_started {
                    debug!("Dropping fix delivered after stop");
                    return;
                }
                self.set_location(location);
            }
            EngineEvent::Status(EngineStatus::EngineOn) => {
                let transition = self.status.engine_on();
                self.apply(transition);
            }
            EngineEvent::Status(EngineStatus::EngineOff) => {
                let transition = self.status.engine_off();
                self.apply(transition);
            }
            EngineEvent::Status(status) => debug!(?status, "Engine status"),
            EngineEvent::SvStatus {
                satellites,
                used_prns,
            } => {
                self.satellites.push(SatelliteSnapshot {
                    timestamp_ms: self.clock.now_ms(),
                    visible: satellites,
                    used_prns,
                });
                self.emit(signals::SATELLITE_CHANGED, reply(self.satellites()));
            }
            EngineEvent::Nmea { sentence, .. } => {
                if let Some(variation) = nmea::magnetic_variation(&sentence) {
                    if self.magnetic_variation != Some(variation) {
                        debug!(variation, "Magnetic variation changed");
                        self.magnetic_variation = Some(variation);
                    }
                }
            }
            EngineEvent::Capabilities(capabilities) => {
                info!("Engine capabilities {:#x}", capabilities)
            }
            EngineEvent::RequestUtcTime => {
                if !self.policy.agnss_online_enabled() {
                    debug!("Online assistance disabled, not requesting NTP time");
                    return;
                }
                let servers = self.network.default_route_time_servers();
                self.ntp.request_time(servers, &mut self.timers);
            }
            EngineEvent::AgnssStatus { agnss_type, status } => {
                let enabled = self.policy.agnss_enabled();
                self.agnss_step(|coordinator, agnss, network| {
                    coordinator.on_status(agnss_type, status, enabled, agnss, network)
                });
            }
            EngineEvent::AgnssRilRequestSetId(flags) => info!(flags, "AGNSS RIL set id requested"),
            EngineEvent::AgnssRilRequestRefLocation(flags) => {
                info!(flags, "AGNSS RIL reference location requested")
            }
            EngineEvent::NiNotify(notification) => info!(
                id = notification.notification_id,
                ni_type = notification.ni_type,
                requestor = %notification.requestor_id,
                text = %notification.text,
                "Network initiated request"
            ),
            EngineEvent::XtraDownloadRequest => {
                let online_enabled = self.policy.agnss_online_enabled();
                self.xtra.request(online_enabled);
            }
            EngineEvent::SystemInfo { year_of_hw } => info!(year_of_hw, "Engine system info"),
        }
    }

    // Timers

    /// Fire every timer due at `now`.
    pub fn fire_expired_timers(&mut self, now: Instant) {
        for id in self.timers.take_expired(now) {
            self.on_timer(id);
        }
    }

    pub fn on_timer(&mut self, id: TimerId) {
        match id {
            TimerId::Idle => {
                info!("No consumers left, quitting");
                self.quit = true;
            }
            TimerId::FixLost => {
                let transition = self.status.fix_lost();
                self.apply(transition);
            }
            TimerId::NtpRetry => self.ntp.on_retry(&mut self.timers),
            TimerId::SettingsPoll => {
                if self.policy.poll_settings_changed() {
                    debug!("Location settings changed");
                    self.on_settings_changed();
                }
                self.timers.start(TimerId::SettingsPoll, SETTINGS_POLL_INTERVAL);
            }
        }
    }

    /// Stop the engine and release it.
    pub fn shutdown(&mut self) {
        if let Some(engine) = self.engine.as_deref_mut() {
            if self.engine_started {
                if let Err(e) = engine.stop() {
                    warn!(error = %e, "Failed to stop positioning");
                }
            }
            engine.cleanup();
        }
        self.engine_started = false;
        self.engine = None;
    }
}

fn param_bool(params: &HashMap<String, Value>, name: &str) -> Result<bool, MethodError> {
    params
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| MethodError::invalid(name, "expected a boolean"))
}

impl BusService for LocationProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn dispatch(
        &mut self,
        caller: Option<&str>,
        method: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Value, MethodError> {
        match method {
            methods::ADD_REFERENCE => {
                self.add_reference(caller);
                Ok(Value::Null)
            }
            methods::REMOVE_REFERENCE => {
                self.remove_reference(caller);
                Ok(Value::Null)
            }
            methods::GET_PROVIDER_INFO => Ok(reply(self.provider_info())),
            methods::GET_STATUS => Ok(json!({ "status": self.status().code() })),
            methods::SET_OPTIONS => {
                self.set_options(caller, params)?;
                Ok(Value::Null)
            }
            methods::GET_POSITION => Ok(reply(self.position())),
            methods::GET_VELOCITY => Ok(reply(self.velocity())),
            methods::GET_SATELLITE => Ok(reply(self.satellites())),
            methods::GET_LAST_SATELLITE => Ok(reply(self.last_satellites())),
            methods::INJECT_POSITION => {
                let map = params.clone().into_iter().collect();
                let position: InjectedPosition = serde_json::from_value(Value::Object(map))
                    .map_err(|e| MethodError::invalid("position", e.to_string()))?;
                let injected = self.inject_position(&position);
                Ok(json!({ "injected": injected }))
            }
            methods::GET_MAGNETIC_VARIATION => {
                Ok(json!({ "variation": self.magnetic_variation }))
            }
            methods::GET_POWERED => Ok(json!({ "powered": self.powered() })),
            methods::SET_POWERED => {
                let powered = param_bool(params, "powered")?;
                self.set_powered(powered);
                Ok(Value::Null)
            }
            other => Err(MethodError::UnknownMethod(other.to_string())),
        }
    }

    fn method_list(&self) -> Vec<MethodInfo> {
        vec![
            MethodInfo::new(methods::ADD_REFERENCE, "Start using the provider").requires_caller(),
            MethodInfo::new(methods::REMOVE_REFERENCE, "Stop using the provider").requires_caller(),
            MethodInfo::new(methods::GET_PROVIDER_INFO, "Provider name and description"),
            MethodInfo::new(methods::GET_STATUS, "Provider status (0 error .. 3 available)"),
            MethodInfo::new(methods::SET_OPTIONS, "Set the caller's options")
                .param(ParamInfo::optional("UpdateInterval", "integer", Value::from(0)))
                .requires_caller(),
            MethodInfo::new(methods::GET_POSITION, "Current position"),
            MethodInfo::new(methods::GET_VELOCITY, "Current velocity"),
            MethodInfo::new(methods::GET_SATELLITE, "Current satellite report"),
            MethodInfo::new(methods::GET_LAST_SATELLITE, "Previous satellite report"),
            MethodInfo::new(methods::INJECT_POSITION, "Seed the engine with a position")
                .param(ParamInfo::required("fields", "integer"))
                .param(ParamInfo::required("latitude", "number"))
                .param(ParamInfo::required("longitude", "number"))
                .param(ParamInfo::optional("horizontal_accuracy", "number", Value::from(0.0))),
            MethodInfo::new(methods::GET_MAGNETIC_VARIATION, "Magnetic variation from NMEA"),
            MethodInfo::new(methods::GET_POWERED, "Device power state"),
            MethodInfo::new(methods::SET_POWERED, "Switch device power")
                .param(ParamInfo::required("powered", "boolean")),
        ]
    }

    fn health_check(&self) -> HashMap<String, HealthStatus> {
        let mut services = HashMap::new();
        let engine = match (&self.engine, &self.engine_error) {
            (Some(engine), _) => HealthStatus::healthy_with(format!(
                "{} ({})",
                engine.name(),
                if self.engine_started { "running" } else { "idle" }
            )),
            (None, Some(e)) => HealthStatus::unhealthy(e.to_string()),
            (None, None) => HealthStatus::unhealthy("engine released"),
        };
        services.insert("engine".to_string(), engine);
        services.insert(
            "session".to_string(),
            HealthStatus::healthy_with(format!(
                "status {:?}, {} consumers, {} references",
                self.status(),
                self.registry.len(),
                self.registry.total_references()
            )),
        );
        services
    }
}
