//! Provider behaviour driven through recording collaborators.

mod common;

use common::*;
use hybris_location::engine::{
    AgnssStatusValue, AgnssType, ApnIpType, EngineEvent, EngineStatus, PositionMode,
};
use hybris_location::error::MethodError;
use hybris_location::event::Event;
use hybris_location::location::{Location, SatelliteInfo};
use hybris_location::network::{CellularService, ConnectionContext};
use hybris_location::ntp::NtpPacket;
use hybris_location::service::BusService;
use hybris_location::status::Status;
use hybris_location::timer::TimerId;
use hybris_location::GpsConf;
use serde_json::{json, Value};
use std::collections::HashMap;

fn params(value: Value) -> HashMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

fn fix(timestamp_ms: i64) -> Event {
    Event::Engine(EngineEvent::Location(Location {
        timestamp_ms,
        latitude: Some(61.5),
        longitude: Some(23.75),
        altitude: Some(110.0),
        speed: Some(2.0),
        ..Location::empty()
    }))
}

fn engine_status(status: EngineStatus) -> Event {
    Event::Engine(EngineEvent::Status(status))
}

// ============================================================================
// Session reference counting
// ============================================================================

#[test]
fn test_first_reference_starts_engine_once() {
    let (mut provider, harness) = provider();
    assert_eq!(harness.calls(), vec![Call::Init]);
    assert!(provider.timer_active(TimerId::Idle));

    provider.add_reference(Some(CONSUMER_A));
    provider.add_reference(Some(CONSUMER_A));
    provider.add_reference(Some(CONSUMER_B));

    assert!(provider.engine_running());
    assert!(!provider.timer_active(TimerId::Idle));
    assert_eq!(
        harness.calls(),
        vec![
            Call::Init,
            Call::SetPositionMode {
                mode: PositionMode::Standalone,
                interval_ms: 1000
            },
            Call::Start,
        ]
    );
    assert_eq!(provider.registry().total_references(), 3);
}

#[test]
fn test_engine_stops_with_last_reference() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    provider.add_reference(Some(CONSUMER_A));
    provider.add_reference(Some(CONSUMER_B));

    provider.remove_reference(Some(CONSUMER_A));
    provider.remove_reference(Some(CONSUMER_B));
    assert!(provider.engine_running());
    assert_eq!(provider.consumer_count(), 1);

    provider.remove_reference(Some(CONSUMER_A));
    assert!(!provider.engine_running());
    assert_eq!(harness.count(&Call::Stop), 1);
    assert!(provider.timer_active(TimerId::Idle));

    // Extra releases are harmless.
    provider.remove_reference(Some(CONSUMER_A));
    assert_eq!(harness.count(&Call::Stop), 1);
}

#[test]
fn test_peer_disconnect_drops_all_references() {
    let (mut provider, harness) = provider();
    for _ in 0..3 {
        provider.add_reference(Some(CONSUMER_A));
    }

    provider.handle_event(Event::PeerDisconnected(CONSUMER_A.to_string()));
    assert_eq!(provider.consumer_count(), 0);
    assert!(!provider.engine_running());
    assert_eq!(harness.count(&Call::Stop), 1);
    assert!(provider.timer_active(TimerId::Idle));

    // Unknown peers change nothing.
    provider.handle_event(Event::PeerDisconnected(":1.99".to_string()));
    assert_eq!(harness.count(&Call::Stop), 1);
}

#[test]
fn test_idle_timer_requests_quit() {
    let (mut provider, _harness) = provider();
    assert!(!provider.should_quit());
    provider.on_timer(TimerId::Idle);
    assert!(provider.should_quit());
}

#[test]
#[should_panic(expected = "AddReference")]
fn test_add_reference_without_caller_panics() {
    let (mut provider, _harness) = provider();
    provider.add_reference(None);
}

#[test]
#[should_panic(expected = "SetOptions")]
fn test_set_options_without_caller_panics() {
    let (mut provider, _harness) = provider();
    let _ = provider.dispatch(None, "SetOptions", &params(json!({"UpdateInterval": 2000})));
}

// ============================================================================
// Policy gate
// ============================================================================

#[test]
fn test_unpowered_device_defers_start() {
    let (mut provider, harness) = Setup {
        powered: false,
        ..Setup::default()
    }
    .build();

    provider.add_reference(Some(CONSUMER_A));
    assert!(!provider.engine_running());
    assert_eq!(harness.count(&Call::Start), 0);

    let result = provider.dispatch(None, "SetPowered", &params(json!({"powered": true})));
    assert_eq!(result, Ok(Value::Null));
    assert!(provider.engine_running());
    assert_eq!(
        provider.dispatch(None, "GetPowered", &HashMap::new()),
        Ok(json!({"powered": true}))
    );
}

#[test]
fn test_disabling_location_clears_fix_and_stops() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    provider.handle_event(fix(1_700_000_001_000));
    assert_eq!(provider.status(), Status::Available);
    harness.clear();

    harness.set_settings(hybris_location::policy::Settings::default());
    provider.handle_event(Event::SettingsChanged);

    assert!(!provider.engine_running());
    assert!(!provider.location().is_fix());
    assert_eq!(provider.status(), Status::Unavailable);
    assert_eq!(
        harness.signal_names(),
        vec!["VelocityChanged", "PositionChanged", "StatusChanged"]
    );
    assert_eq!(harness.calls(), vec![Call::Stop]);
    // The consumer keeps its reference while positioning is disabled.
    assert_eq!(provider.consumer_count(), 1);

    harness.set_settings(enabled_settings());
    provider.handle_event(Event::SettingsChanged);
    assert!(provider.engine_running());
}

#[test]
fn test_flight_mode_stops_positioning() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));

    provider.handle_event(Event::FlightModeChanged(true));
    assert!(!provider.engine_running());

    provider.handle_event(Event::FlightModeChanged(false));
    assert!(provider.engine_running());
    assert_eq!(harness.count(&Call::Start), 2);
}

#[test]
fn test_assistance_selects_ms_based_mode() {
    let (mut provider, harness) = Setup {
        settings: assisted_settings(),
        ..Setup::default()
    }
    .build();
    provider.add_reference(Some(CONSUMER_A));
    assert!(harness.calls().contains(&Call::SetPositionMode {
        mode: PositionMode::MsBased,
        interval_ms: 1000
    }));
}

// ============================================================================
// Status machine
// ============================================================================

#[test]
fn test_status_follows_engine_and_fixes() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    assert_eq!(provider.status(), Status::Unavailable);

    provider.handle_event(engine_status(EngineStatus::EngineOn));
    assert_eq!(provider.status(), Status::Acquiring);
    assert!(provider.timer_active(TimerId::FixLost));

    provider.handle_event(fix(1_700_000_001_000));
    assert_eq!(provider.status(), Status::Available);

    provider.on_timer(TimerId::FixLost);
    assert_eq!(provider.status(), Status::Acquiring);

    provider.handle_event(fix(1_700_000_002_000));
    assert_eq!(provider.status(), Status::Available);

    // Engine power cycling alone does not drop availability.
    provider.handle_event(engine_status(EngineStatus::EngineOff));
    assert_eq!(provider.status(), Status::Available);
    assert!(!provider.timer_active(TimerId::FixLost));

    provider.remove_reference(Some(CONSUMER_A));
    assert_eq!(provider.status(), Status::Unavailable);
    assert_eq!(harness.status_signals(), vec![2, 3, 2, 3, 1]);
}

#[test]
fn test_empty_location_is_not_a_fix() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    provider.handle_event(Event::Engine(EngineEvent::Location(Location::empty())));
    assert_eq!(provider.status(), Status::Unavailable);
    assert!(!provider.timer_active(TimerId::FixLost));
    assert!(harness.status_signals().is_empty());
}

#[test]
fn test_engine_init_failure_is_terminal_error() {
    let (mut provider, harness) = Setup {
        fail_init: true,
        ..Setup::default()
    }
    .build();
    assert_eq!(harness.calls(), vec![Call::Init, Call::Cleanup]);
    assert_eq!(provider.status(), Status::Error);

    provider.add_reference(Some(CONSUMER_A));
    assert!(!provider.engine_running());
    assert_eq!(
        provider.dispatch(None, "GetStatus", &HashMap::new()),
        Ok(json!({"status": 0}))
    );
    assert!(!provider.health_check()["engine"].ok);

    provider.handle_event(engine_status(EngineStatus::EngineOn));
    assert_eq!(provider.status(), Status::Error);
}

// ============================================================================
// Bus methods
// ============================================================================

#[test]
fn test_set_options_updates_interval() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    provider.add_reference(Some(CONSUMER_B));
    harness.clear();

    let result = provider.dispatch(
        Some(CONSUMER_A),
        "SetOptions",
        &params(json!({"UpdateInterval": 5000})),
    );
    assert_eq!(result, Ok(Value::Null));
    provider
        .set_options(Some(CONSUMER_B), &params(json!({"UpdateInterval": 2000})))
        .unwrap();
    assert_eq!(
        harness.calls(),
        vec![
            Call::SetPositionMode {
                mode: PositionMode::Standalone,
                interval_ms: 5000
            },
            Call::SetPositionMode {
                mode: PositionMode::Standalone,
                interval_ms: 2000
            },
        ]
    );

    // Callers without a reference are ignored.
    provider
        .set_options(Some(":1.42"), &params(json!({"UpdateInterval": 100})))
        .unwrap();
    assert_eq!(harness.calls().len(), 2);
    assert!(!provider.registry().contains(":1.42"));
}

#[test]
fn test_set_options_rejects_bad_interval() {
    let (mut provider, _harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    let result = provider.dispatch(
        Some(CONSUMER_A),
        "SetOptions",
        &params(json!({"UpdateInterval": "fast"})),
    );
    assert!(matches!(result, Err(MethodError::InvalidParams { .. })));
}

#[test]
fn test_set_options_before_start_only_records() {
    let (mut provider, harness) = Setup {
        powered: false,
        ..Setup::default()
    }
    .build();
    provider.add_reference(Some(CONSUMER_A));
    provider
        .set_options(Some(CONSUMER_A), &params(json!({"UpdateInterval": 3000})))
        .unwrap();
    assert_eq!(harness.calls(), vec![Call::Init]);

    provider.set_powered(true);
    assert!(harness.calls().contains(&Call::SetPositionMode {
        mode: PositionMode::Standalone,
        interval_ms: 3000
    }));
}

#[test]
fn test_position_and_velocity_replies() {
    let (mut provider, harness) = provider();
    provider.add_reference(Some(CONSUMER_A));
    provider.handle_event(fix(1_700_000_001_500));

    let position = provider
        .dispatch(None, "GetPosition", &HashMap::new())
        .unwrap();
    assert_eq!(position["fields"], 7);
    assert_eq!(position["timestamp"], 1_700_000_001);
    assert_eq!(position["latitude"], 61.5);

    let velocity = provider
        .dispatch(None, "GetVelocity", &HashMap::new())
        .unwrap();
    assert_eq!(velocity["fields"], 1);
    assert_eq!(velocity["speed"], 2.0);
    assert!(velocity["direction"].is_null());

    let names = harness.signal_names();
    let velocity_at = names.iter().position(|n| n == "VelocityChanged").unwrap();
    let position_at = names.iter().position(|n| n == "PositionChanged").unwrap();
    assert!(velocity_at < position_at);
}

#[test]
fn test_provider_info_and_unknown_method() {
    let (mut provider, _harness) = provider();
    let info = provider
        .dispatch(None, "GetProviderInfo", &HashMap::new())
        .unwrap();
    assert_eq!(info["name"], "Hybris");

    let result = provider.dispatch(None, "GetAltitude", &HashMap::new());
    assert_eq!(
        result,
        Err(MethodError::UnknownMethod("GetAltitude".to_string()))
    );
}

#[test]
fn test_satellite_history() {
    let (mut provider, harness) = provider();
    let satellites = vec![
        SatelliteInfo {
            prn: 5,
            elevation: 62,
            azimuth: 140,
            snr: 38,
        },
        SatelliteInfo {
            prn: 73,
            elevation: 20,
            azimuth: 10,
            snr: 25,
        },
    ];
    provider.handle_event(Event::Engine(EngineEvent::SvStatus {
        satellites,
        used_prns: vec![5],
    }));
    provider.handle_event(Event::Engine(EngineEvent::SvStatus {
        satellites: Vec::new(),
        used_prns: Vec::new(),
    }));

    let current = provider.satellites();
    assert_eq!(current.visible_count, 0);
    assert_eq!(current.timestamp, 1_700_000_000);
    let last = provider.last_satellites();
    assert_eq!(last.timestamp, 1_700_000_000);
    assert_eq!(last.visible_count, 2);
    assert_eq!(last.used_count, 1);
    assert_eq!(last.used_prns, vec![5]);
    assert_eq!(
        harness
            .signal_names()
            .iter()
            .filter(|n| *n == "SatelliteChanged")
            .count(),
        2
    );
}

#[test]
fn test_nmea_magnetic_variation() {
    let (mut provider, _harness) = provider();
    let body = "GPRMC,120000,A,6129.886,N,02345.660,E,000.0,000.0,010124,008.5,W";
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    provider.handle_event(Event::Engine(EngineEvent::Nmea {
        timestamp_ms: 0,
        sentence: format!("${}*{:02X}\r\n", body, checksum),
    }));
    assert_eq!(provider.magnetic_variation(), Some(-8.5));

    // Corrupt checksums are ignored.
    provider.handle_event(Event::Engine(EngineEvent::Nmea {
        timestamp_ms: 0,
        sentence: format!("${}*00", body.replace("W", "E")),
    }));
    assert_eq!(provider.magnetic_variation(), Some(-8.5));
}

#[test]
fn test_position_injection_until_first_fix() {
    let (mut provider, harness) = provider();
    let position = params(json!({
        "fields": 3,
        "latitude": 60.17,
        "longitude": 24.94,
        "horizontal_accuracy": 50.0,
    }));

    // Not running yet.
    let result = provider.dispatch(None, "InjectPosition", &position).unwrap();
    assert_eq!(result, json!({"injected": false}));

    provider.add_reference(Some(CONSUMER_A));
    let result = provider.dispatch(None, "InjectPosition", &position).unwrap();
    assert_eq!(result, json!({"injected": true}));
    assert!(harness.calls().contains(&Call::InjectLocation {
        latitude: 60.17,
        longitude: 24.94,
        accuracy: 50.0
    }));

    let latitude_only = params(json!({"fields": 1, "latitude": 60.17}));
    let result = provider.dispatch(None, "InjectPosition", &latitude_only).unwrap();
    assert_eq!(result, json!({"injected": false}));

    provider.handle_event(fix(1_700_000_001_000));
    let result = provider.dispatch(None, "InjectPosition", &position).unwrap();
    assert_eq!(result, json!({"injected": false}));
}

// ============================================================================
// Assistance
// ============================================================================

fn agnss_status(status: AgnssStatusValue) -> Event {
    Event::Engine(EngineEvent::AgnssStatus {
        agnss_type: AgnssType::Supl,
        status,
    })
}

#[test]
fn test_agnss_disabled_reports_failure() {
    let (mut provider, harness) = provider();
    provider.handle_event(agnss_status(AgnssStatusValue::RequestDataConn));
    assert_eq!(harness.calls(), vec![Call::Init, Call::DataConnFailed]);
    assert!(harness.network.lock().unwrap().connect_requests.is_empty());
}

#[test]
fn test_agnss_brings_up_cellular_and_releases_it() {
    let (mut provider, harness) = Setup {
        settings: assisted_settings(),
        ..Setup::default()
    }
    .build();

    provider.handle_event(agnss_status(AgnssStatusValue::RequestDataConn));
    assert_eq!(
        harness.network.lock().unwrap().connect_requests,
        vec!["cellular".to_string()]
    );

    {
        let mut network = harness.network.lock().unwrap();
        network.cellular_connected = true;
        network.services = vec![CellularService {
            path: "/net/connman/service/cellular_home".into(),
            connected: true,
            interface: "rmnet0".into(),
        }];
        network.contexts = vec![ConnectionContext {
            path: "/ril_0/context1".into(),
            interface: "rmnet0".into(),
            access_point_name: "internet".into(),
            protocol: "ip".into(),
        }];
    }
    provider.handle_event(Event::CellularConnected(true));
    assert!(harness
        .calls()
        .contains(&Call::DataConnOpen("internet".into(), ApnIpType::Ipv4)));

    provider.handle_event(agnss_status(AgnssStatusValue::ReleaseDataConn));
    assert_eq!(harness.count(&Call::DataConnClosed), 1);
    assert_eq!(
        harness.network.lock().unwrap().disconnects,
        vec!["/net/connman/service/cellular_home".to_string()]
    );
}

#[test]
fn test_agnss_broker_error_reports_failure() {
    let (mut provider, harness) = Setup {
        settings: assisted_settings(),
        ..Setup::default()
    }
    .build();
    provider.handle_event(agnss_status(AgnssStatusValue::RequestDataConn));
    provider.handle_event(Event::ConnectionError {
        path: "/net/connman/technology/cellular".into(),
        error: "no connection broker".into(),
    });
    assert_eq!(harness.count(&Call::DataConnFailed), 1);
}

#[test]
fn test_utc_time_request_needs_online_assistance() {
    let (mut provider, harness) = provider();
    harness.network.lock().unwrap().time_servers = vec!["ntp1.example.com".into()];
    provider.handle_event(Event::Engine(EngineEvent::RequestUtcTime));
    assert!(harness.resolves.lock().unwrap().is_empty());
    assert!(!provider.timer_active(TimerId::NtpRetry));
}

#[test]
fn test_utc_time_request_injects_ntp_time() {
    let (mut provider, harness) = Setup {
        settings: assisted_settings(),
        ..Setup::default()
    }
    .build();
    harness.network.lock().unwrap().time_servers =
        vec!["ntp1.example.com".into(), "ntp2.example.com".into()];

    provider.handle_event(Event::Engine(EngineEvent::RequestUtcTime));
    assert_eq!(
        *harness.resolves.lock().unwrap(),
        vec!["ntp1.example.com".to_string()]
    );
    assert!(provider.timer_active(TimerId::NtpRetry));

    provider.handle_event(Event::NtpResolved {
        host: "ntp1.example.com".into(),
        address: Some("127.0.0.1:123".parse().unwrap()),
    });
    let (address, request) = harness.sent.lock().unwrap()[0].clone();
    assert_eq!(address.port(), 123);

    // Server clock 500 ms ahead, reply after 40 ms of round trip.
    let request = NtpPacket::decode(&request).unwrap();
    let sent_ms = request.transmit.to_unix_ms();
    let reply = NtpPacket {
        origin: request.transmit,
        receive: hybris_location::ntp::NtpTimestamp::from_unix_ms(sent_ms + 500),
        transmit: hybris_location::ntp::NtpTimestamp::from_unix_ms(sent_ms + 500),
        ..NtpPacket::default()
    };
    provider.handle_event(Event::NtpDatagram {
        payload: reply.encode().to_vec(),
        received_ticks_ms: 5_040,
    });

    assert!(harness.calls().contains(&Call::InjectTime {
        utc_time_ms: sent_ms + 520,
        uncertainty_ms: 20
    }));
    assert!(!provider.timer_active(TimerId::NtpRetry));
}

#[test]
fn test_xtra_download_fails_over() {
    let servers = vec![
        "http://xtra1.example.com/xtra3grc.bin".to_string(),
        "http://xtra2.example.com/xtra3grc.bin".to_string(),
    ];
    let (mut provider, harness) = Setup {
        settings: assisted_settings(),
        gps: GpsConf {
            xtra_servers: servers.clone(),
            ..GpsConf::default()
        },
        ..Setup::default()
    }
    .build();

    provider.handle_event(Event::Engine(EngineEvent::XtraDownloadRequest));
    provider.handle_event(Event::XtraFetched {
        url: servers[0].clone(),
        result: Err("connection refused".into()),
    });
    provider.handle_event(Event::XtraFetched {
        url: servers[1].clone(),
        result: Ok(vec![0xAB; 64]),
    });

    assert_eq!(*harness.fetches.lock().unwrap(), servers);
    assert_eq!(harness.count(&Call::InjectXtra(64)), 1);
}

#[test]
fn test_xtra_download_needs_online_assistance() {
    let (mut provider, harness) = Setup {
        gps: GpsConf {
            xtra_servers: vec!["http://xtra1.example.com/xtra3grc.bin".into()],
            ..GpsConf::default()
        },
        ..Setup::default()
    }
    .build();
    provider.handle_event(Event::Engine(EngineEvent::XtraDownloadRequest));
    assert!(harness.fetches.lock().unwrap().is_empty());
}

fn force_inject_setup(settings: hybris_location::policy::Settings) -> Setup {
    Setup {
        settings,
        gps: GpsConf {
            xtra_servers: vec!["http://xtra1.example.com/xtra3grc.bin".into()],
            force_xtra_inject: true,
            ..GpsConf::default()
        },
        ..Setup::default()
    }
}

#[test]
fn test_force_inject_downloads_when_network_comes_online() {
    let (mut provider, harness) = force_inject_setup(assisted_settings()).build();

    // Engine stopped.
    provider.handle_event(Event::NetworkStateChanged { online: true });
    assert!(harness.fetches.lock().unwrap().is_empty());

    provider.add_reference(Some(CONSUMER_A));
    assert!(provider.engine_running());
    provider.handle_event(Event::NetworkStateChanged { online: false });
    assert!(harness.fetches.lock().unwrap().is_empty());

    provider.handle_event(Event::NetworkStateChanged { online: true });
    provider.handle_event(Event::NetworkStateChanged { online: true });
    assert_eq!(
        *harness.fetches.lock().unwrap(),
        vec!["http://xtra1.example.com/xtra3grc.bin".to_string()]
    );
}

#[test]
fn test_force_inject_needs_online_assistance() {
    let (mut provider, harness) = force_inject_setup(enabled_settings()).build();

    provider.add_reference(Some(CONSUMER_A));
    assert!(provider.engine_running());
    provider.handle_event(Event::NetworkStateChanged { online: true });
    assert!(harness.fetches.lock().unwrap().is_empty());
}
