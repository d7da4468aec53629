//! Software GNSS engine for running the daemon without hardware.
//!
//! Reports a fixed position with a slow drift, a small satellite constellation
//! and matching RMC sentences from a worker thread, the same way a hardware
//! binding delivers callbacks from its own threads.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use super::{
    location_flags, EngineCallbacks, EngineStatus, GnssEngine, PositionMode, RawLocation,
    RawSvInfo, Recurrence, Xtra,
};
use crate::error::EngineError;

const BASE_LATITUDE: f64 = 61.4981;
const BASE_LONGITUDE: f64 = 23.7610;
const STEP_POLL: Duration = Duration::from_millis(50);

const SATELLITES: &[RawSvInfo] = &[
    RawSvInfo {
        svid: 5,
        constellation: 1,
        cn0_dbhz: 38.0,
        elevation: 62.0,
        azimuth: 140.0,
        used_in_fix: true,
    },
    RawSvInfo {
        svid: 13,
        constellation: 1,
        cn0_dbhz: 33.0,
        elevation: 41.0,
        azimuth: 272.0,
        used_in_fix: true,
    },
    RawSvInfo {
        svid: 21,
        constellation: 1,
        cn0_dbhz: 29.0,
        elevation: 18.0,
        azimuth: 35.0,
        used_in_fix: true,
    },
    RawSvInfo {
        svid: 8,
        constellation: 3,
        cn0_dbhz: 31.0,
        elevation: 55.0,
        azimuth: 201.0,
        used_in_fix: true,
    },
    RawSvInfo {
        svid: 11,
        constellation: 6,
        cn0_dbhz: 24.0,
        elevation: 12.0,
        azimuth: 320.0,
        used_in_fix: false,
    },
];

/// Deterministic engine driven by a worker thread.
pub struct SimulatedEngine {
    callbacks: Option<EngineCallbacks>,
    interval_ms: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    xtra_bytes: usize,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            callbacks: None,
            interval_ms: Arc::new(AtomicU32::new(1000)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            xtra_bytes: 0,
        }
    }

    fn callbacks(&self) -> Result<&EngineCallbacks, EngineError> {
        self.callbacks
            .as_ref()
            .ok_or(EngineError::rejected("start before init", -1))
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn rmc_sentence(variation: f64) -> String {
    let body = format!(
        "GPRMC,120000,A,6129.886,N,02345.660,E,000.0,000.0,010124,{:05.1},E",
        variation
    );
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}", body, sum)
}

fn run(callbacks: EngineCallbacks, interval_ms: Arc<AtomicU32>, running: Arc<AtomicBool>) {
    callbacks.status(EngineStatus::EngineOn);
    let mut tick: u32 = 0;

    while running.load(Ordering::SeqCst) {
        let drift = f64::from(tick % 100) * 1e-5;
        callbacks.location(&RawLocation {
            flags: location_flags::HAS_LAT_LONG
                | location_flags::HAS_ALTITUDE
                | location_flags::HAS_SPEED
                | location_flags::HAS_BEARING
                | location_flags::HAS_HORIZONTAL_ACCURACY,
            latitude: BASE_LATITUDE + drift,
            longitude: BASE_LONGITUDE,
            altitude: 112.0,
            speed_mps: 1.2,
            bearing: 0.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 0.0,
            timestamp_ms: now_ms(),
        });
        callbacks.sv_status(SATELLITES);
        callbacks.nmea(now_ms(), &rmc_sentence(8.5));
        tick = tick.wrapping_add(1);

        let mut waited = Duration::ZERO;
        let interval = Duration::from_millis(u64::from(interval_ms.load(Ordering::SeqCst)));
        while waited < interval && running.load(Ordering::SeqCst) {
            thread::sleep(STEP_POLL);
            waited += STEP_POLL;
        }
    }

    callbacks.status(EngineStatus::EngineOff);
}

impl GnssEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn init(&mut self, callbacks: EngineCallbacks) -> Result<(), EngineError> {
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let callbacks = self.callbacks()?.clone();
        self.running.store(true, Ordering::SeqCst);

        let interval_ms = Arc::clone(&self.interval_ms);
        let running = Arc::clone(&self.running);
        let worker = thread::Builder::new()
            .name("gnss-sim".into())
            .spawn(move || run(callbacks, interval_ms, running))
            .map_err(|_| EngineError::rejected("start", -1))?;
        self.worker = Some(worker);

        info!("Simulated engine started");
        // A real engine asks for assistance data shortly after the first start.
        if self.xtra_bytes == 0 {
            self.callbacks()?.xtra_download_request();
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            info!("Simulated engine stopped");
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        let _ = self.stop();
        self.callbacks = None;
    }

    fn inject_location(
        &mut self,
        latitude: f64,
        longitude: f64,
        accuracy_m: f32,
    ) -> Result<(), EngineError> {
        debug!(latitude, longitude, accuracy_m, "Simulated engine: location injected");
        Ok(())
    }

    fn inject_time(
        &mut self,
        utc_time_ms: i64,
        reference_time_ms: i64,
        uncertainty_ms: i32,
    ) -> Result<(), EngineError> {
        debug!(
            utc_time_ms,
            reference_time_ms, uncertainty_ms, "Simulated engine: time injected"
        );
        Ok(())
    }

    fn delete_aiding_data(&mut self, flags: u16) {
        debug!(flags, "Simulated engine: aiding data deleted");
        self.xtra_bytes = 0;
    }

    fn set_position_mode(
        &mut self,
        mode: PositionMode,
        recurrence: Recurrence,
        min_interval_ms: u32,
        _preferred_accuracy_m: u32,
        _preferred_time_ms: u32,
    ) -> Result<(), EngineError> {
        debug!(?mode, ?recurrence, min_interval_ms, "Simulated engine: position mode");
        self.interval_ms.store(min_interval_ms.max(1), Ordering::SeqCst);
        Ok(())
    }

    fn xtra(&mut self) -> Option<&mut dyn Xtra> {
        Some(self)
    }
}

impl Xtra for SimulatedEngine {
    fn set_callback(&mut self, callbacks: EngineCallbacks) -> Result<(), EngineError> {
        if self.callbacks.is_none() {
            self.callbacks = Some(callbacks);
        }
        Ok(())
    }

    fn inject_xtra_data(&mut self, data: &[u8]) -> Result<(), EngineError> {
        info!(bytes = data.len(), "Simulated engine: XTRA data injected");
        self.xtra_bytes = data.len();
        Ok(())
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
