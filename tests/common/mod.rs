//! Recording collaborators for driving a `LocationProvider` in tests.

#![allow(dead_code)]

use hybris_location::clock::Clock;
use hybris_location::config::GpsConf;
use hybris_location::engine::{
    Agnss, ApnIpType, EngineCallbacks, GnssEngine, PositionMode, Recurrence, Xtra,
};
use hybris_location::error::EngineError;
use hybris_location::event::{self, Event};
use hybris_location::network::{CellularService, ConnectionContext, Network};
use hybris_location::ntp::NtpTransport;
use hybris_location::policy::{DeviceControl, Settings, SettingsSource};
use hybris_location::protocol::Signal;
use hybris_location::provider::{Collaborators, LocationProvider};
use hybris_location::service::SignalSink;
use hybris_location::xtra::XtraFetcher;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

pub const CONSUMER_A: &str = ":1.1";
pub const CONSUMER_B: &str = ":1.2";

/// Everything the engine was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Init,
    Start,
    Stop,
    Cleanup,
    SetPositionMode { mode: PositionMode, interval_ms: u32 },
    InjectLocation { latitude: f64, longitude: f64, accuracy: f32 },
    InjectTime { utc_time_ms: i64, uncertainty_ms: i32 },
    InjectXtra(usize),
    DataConnOpen(String, ApnIpType),
    DataConnClosed,
    DataConnFailed,
}

pub type Shared<T> = Arc<Mutex<Vec<T>>>;

fn push<T>(log: &Shared<T>, item: T) {
    log.lock().unwrap().push(item);
}

pub struct MockEngine {
    calls: Shared<Call>,
    fail_init: bool,
}

impl GnssEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&mut self, _callbacks: EngineCallbacks) -> Result<(), EngineError> {
        push(&self.calls, Call::Init);
        if self.fail_init {
            return Err(EngineError::rejected("init", -1));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        push(&self.calls, Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        push(&self.calls, Call::Stop);
        Ok(())
    }

    fn cleanup(&mut self) {
        push(&self.calls, Call::Cleanup);
    }

    fn inject_location(
        &mut self,
        latitude: f64,
        longitude: f64,
        accuracy: f32,
    ) -> Result<(), EngineError> {
        push(
            &self.calls,
            Call::InjectLocation {
                latitude,
                longitude,
                accuracy,
            },
        );
        Ok(())
    }

    fn inject_time(
        &mut self,
        utc_time_ms: i64,
        _reference_time_ms: i64,
        uncertainty_ms: i32,
    ) -> Result<(), EngineError> {
        push(
            &self.calls,
            Call::InjectTime {
                utc_time_ms,
                uncertainty_ms,
            },
        );
        Ok(())
    }

    fn delete_aiding_data(&mut self, _flags: u16) {}

    fn set_position_mode(
        &mut self,
        mode: PositionMode,
        _recurrence: Recurrence,
        min_interval_ms: u32,
        _preferred_accuracy_m: u32,
        _preferred_time_ms: u32,
    ) -> Result<(), EngineError> {
        push(
            &self.calls,
            Call::SetPositionMode {
                mode,
                interval_ms: min_interval_ms,
            },
        );
        Ok(())
    }

    fn agnss(&mut self) -> Option<&mut dyn Agnss> {
        Some(self)
    }

    fn xtra(&mut self) -> Option<&mut dyn Xtra> {
        Some(self)
    }
}

impl Agnss for MockEngine {
    fn set_callback(&mut self, _callbacks: EngineCallbacks) {}

    fn data_conn_open(&mut self, apn: &str, ip_type: ApnIpType) -> Result<(), EngineError> {
        push(&self.calls, Call::DataConnOpen(apn.to_string(), ip_type));
        Ok(())
    }

    fn data_conn_closed(&mut self) -> Result<(), EngineError> {
        push(&self.calls, Call::DataConnClosed);
        Ok(())
    }

    fn data_conn_failed(&mut self) -> Result<(), EngineError> {
        push(&self.calls, Call::DataConnFailed);
        Ok(())
    }
}

impl Xtra for MockEngine {
    fn set_callback(&mut self, _callbacks: EngineCallbacks) -> Result<(), EngineError> {
        Ok(())
    }

    fn inject_xtra_data(&mut self, data: &[u8]) -> Result<(), EngineError> {
        push(&self.calls, Call::InjectXtra(data.len()));
        Ok(())
    }
}

/// Settings that tests can change between evaluations.
pub struct SharedSettings(Arc<Mutex<Settings>>);

impl SettingsSource for SharedSettings {
    fn load(&self) -> Settings {
        *self.0.lock().unwrap()
    }
}

/// Cellular state and broker requests.
#[derive(Debug, Default)]
pub struct NetworkState {
    pub time_servers: Vec<String>,
    pub cellular_connected: bool,
    pub services: Vec<CellularService>,
    pub contexts: Vec<ConnectionContext>,
    pub connect_requests: Vec<String>,
    pub disconnects: Vec<String>,
}

pub struct MockNetwork(Arc<Mutex<NetworkState>>);

impl Network for MockNetwork {
    fn default_route_time_servers(&self) -> Vec<String> {
        self.0.lock().unwrap().time_servers.clone()
    }

    fn cellular_connected(&self) -> bool {
        self.0.lock().unwrap().cellular_connected
    }

    fn cellular_services(&self) -> Vec<CellularService> {
        self.0.lock().unwrap().services.clone()
    }

    fn connection_contexts(&self) -> Vec<ConnectionContext> {
        self.0.lock().unwrap().contexts.clone()
    }

    fn connect_to_type(&mut self, technology: &str) {
        self.0.lock().unwrap().connect_requests.push(technology.to_string());
    }

    fn request_disconnect(&mut self, service_path: &str) {
        self.0.lock().unwrap().disconnects.push(service_path.to_string());
    }
}

pub struct MockNtpTransport {
    resolves: Shared<String>,
    sent: Shared<(SocketAddr, Vec<u8>)>,
}

impl NtpTransport for MockNtpTransport {
    fn resolve(&mut self, host: &str) {
        push(&self.resolves, host.to_string());
    }

    fn send(&mut self, address: SocketAddr, payload: &[u8]) -> io::Result<()> {
        push(&self.sent, (address, payload.to_vec()));
        Ok(())
    }
}

pub struct MockFetcher(Shared<String>);

impl XtraFetcher for MockFetcher {
    fn fetch(&mut self, url: &str, _user_agent: Option<&str>) {
        push(&self.0, url.to_string());
    }
}

pub struct FixedClock {
    pub now_ms: i64,
    pub monotonic_ms: i64,
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn monotonic_ms(&self) -> i64 {
        self.monotonic_ms
    }
}

pub struct RecordingSink(Shared<Signal>);

impl SignalSink for RecordingSink {
    fn emit(&self, signal: Signal) {
        push(&self.0, signal);
    }
}

/// Handles on the provider's collaborators.
pub struct Harness {
    pub calls: Shared<Call>,
    pub settings: Arc<Mutex<Settings>>,
    pub network: Arc<Mutex<NetworkState>>,
    pub resolves: Shared<String>,
    pub sent: Shared<(SocketAddr, Vec<u8>)>,
    pub fetches: Shared<String>,
    pub signals: Shared<Signal>,
    pub events: Receiver<Event>,
}

impl Harness {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn signal_names(&self) -> Vec<String> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.signal.clone())
            .collect()
    }

    pub fn status_signals(&self) -> Vec<i64> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.signal == "StatusChanged")
            .filter_map(|s| s.args["status"].as_i64())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.signals.lock().unwrap().clear();
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.lock().unwrap() = settings;
    }
}

/// Location enabled, assistance off.
pub fn enabled_settings() -> Settings {
    Settings {
        location_enabled: true,
        ..Settings::default()
    }
}

/// Location enabled with online assistance accepted.
pub fn assisted_settings() -> Settings {
    Settings {
        location_enabled: true,
        agnss_agreement_accepted: true,
        agnss_provider_enabled: true,
        agnss_online_enabled: true,
        ..Settings::default()
    }
}

pub struct Setup {
    pub settings: Settings,
    pub powered: bool,
    pub gps: GpsConf,
    pub fail_init: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            settings: enabled_settings(),
            powered: true,
            gps: GpsConf::default(),
            fail_init: false,
        }
    }
}

impl Setup {
    pub fn build(self) -> (LocationProvider, Harness) {
        let calls: Shared<Call> = Arc::default();
        let settings = Arc::new(Mutex::new(self.settings));
        let network = Arc::new(Mutex::new(NetworkState::default()));
        let resolves: Shared<String> = Arc::default();
        let sent: Shared<(SocketAddr, Vec<u8>)> = Arc::default();
        let fetches: Shared<String> = Arc::default();
        let signals: Shared<Signal> = Arc::default();
        let (events, receiver) = event::channel();

        let parts = Collaborators {
            engine: Ok(Box::new(MockEngine {
                calls: calls.clone(),
                fail_init: self.fail_init,
            })),
            settings: Box::new(SharedSettings(settings.clone())),
            device: DeviceControl::new(self.powered),
            network: Box::new(MockNetwork(network.clone())),
            ntp_transport: Box::new(MockNtpTransport {
                resolves: resolves.clone(),
                sent: sent.clone(),
            }),
            xtra_fetcher: Box::new(MockFetcher(fetches.clone())),
            clock: Arc::new(FixedClock {
                now_ms: 1_700_000_000_000,
                monotonic_ms: 5_000,
            }),
            signals: Box::new(RecordingSink(signals.clone())),
        };
        let provider = LocationProvider::new(parts, &self.gps, events);

        let harness = Harness {
            calls,
            settings,
            network,
            resolves,
            sent,
            fetches,
            signals,
            events: receiver,
        };
        (provider, harness)
    }
}

pub fn provider() -> (LocationProvider, Harness) {
    Setup::default().build()
}
