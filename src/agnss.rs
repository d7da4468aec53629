//! Cellular data connection bring-up for assisted GNSS (SUPL).
//!
//! The engine asks for a data connection, this coordinator finds (or asks
//! the connection broker for) a connected cellular service, maps its network
//! interface to a modem context and reports that context's access point back
//! to the engine.

use tracing::{debug, info, warn};

use crate::engine::{Agnss, AgnssStatusValue, AgnssType, ApnIpType};
use crate::network::{Network, CELLULAR};

/// The access point reported to the engine for an opened connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApn {
    pub service_path: String,
    pub interface: String,
    pub access_point_name: String,
    pub ip_type: ApnIpType,
}

/// Outcome of one coordinator step, mainly for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgnssOutcome {
    Opened(ResolvedApn),
    Closed,
    Failed,
    /// Waiting on the connection broker.
    Pending,
    /// Nothing was reported to the engine.
    Aborted,
}

#[derive(Debug, Default)]
pub struct AgnssCoordinator {
    /// A connect was requested by us, so release must tear it down.
    requested_connect: bool,
    /// Broker errors for cellular paths are ours to report.
    watching_broker: bool,
    /// Service whose context was last reported open.
    service_path: Option<String>,
}

fn report_failed(agnss: &mut dyn Agnss) -> AgnssOutcome {
    if let Err(e) = agnss.data_conn_failed() {
        warn!(error = %e, "data_conn_failed rejected");
    }
    AgnssOutcome::Failed
}

impl AgnssCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_requested(&self) -> bool {
        self.requested_connect
    }

    /// Engine status callback. `enabled` is the current AGNSS policy flag.
    pub fn on_status(
        &mut self,
        agnss_type: AgnssType,
        status: AgnssStatusValue,
        enabled: bool,
        agnss: &mut dyn Agnss,
        network: &mut dyn Network,
    ) -> AgnssOutcome {
        if !enabled {
            debug!(?status, "AGNSS disabled by policy");
            return report_failed(agnss);
        }
        if agnss_type != AgnssType::Supl {
            warn!(?agnss_type, "Only SUPL AGNSS is supported");
            return AgnssOutcome::Aborted;
        }

        match status {
            AgnssStatusValue::RequestDataConn => self.start_data_connection(agnss, network),
            AgnssStatusValue::ReleaseDataConn => {
                if let Err(e) = agnss.data_conn_closed() {
                    warn!(error = %e, "data_conn_closed rejected");
                }
                self.stop_data_connection(network);
                AgnssOutcome::Closed
            }
            AgnssStatusValue::DataConnected
            | AgnssStatusValue::DataConnDone
            | AgnssStatusValue::DataConnFailed => AgnssOutcome::Aborted,
            AgnssStatusValue::Unknown(code) => {
                warn!(code, "Unknown AGNSS status");
                AgnssOutcome::Aborted
            }
        }
    }

    fn start_data_connection(
        &mut self,
        agnss: &mut dyn Agnss,
        network: &mut dyn Network,
    ) -> AgnssOutcome {
        if network.cellular_connected() {
            return self.data_service_connected(agnss, network);
        }

        info!("Requesting cellular data connection for AGNSS");
        self.requested_connect = true;
        self.watching_broker = true;
        network.connect_to_type(CELLULAR);
        AgnssOutcome::Pending
    }

    fn stop_data_connection(&mut self, network: &mut dyn Network) {
        self.watching_broker = false;
        if !self.requested_connect {
            return;
        }
        self.requested_connect = false;
        if let Some(path) = self.service_path.take() {
            info!(path, "Releasing AGNSS data connection");
            network.request_disconnect(&path);
        }
    }

    /// A cellular service is (or just became) connected: resolve its APN.
    pub fn data_service_connected(
        &mut self,
        agnss: &mut dyn Agnss,
        network: &mut dyn Network,
    ) -> AgnssOutcome {
        let Some(service) = network
            .cellular_services()
            .into_iter()
            .find(|service| service.connected)
        else {
            warn!("No connected cellular network service found");
            return AgnssOutcome::Aborted;
        };

        if service.interface.is_empty() {
            warn!(path = service.path, "Cellular service has no network interface");
            return AgnssOutcome::Aborted;
        }

        let context = network
            .connection_contexts()
            .into_iter()
            .find(|context| context.interface == service.interface);
        let Some(context) = context else {
            warn!(interface = service.interface, "No connection context bound to interface");
            return report_failed(agnss);
        };

        let resolved = ResolvedApn {
            service_path: service.path,
            interface: service.interface,
            ip_type: ApnIpType::from_protocol(&context.protocol),
            access_point_name: context.access_point_name,
        };
        info!(
            apn = resolved.access_point_name,
            interface = resolved.interface,
            "Opening AGNSS data connection"
        );
        self.service_path = Some(resolved.service_path.clone());
        if let Err(e) = agnss.data_conn_open(&resolved.access_point_name, resolved.ip_type) {
            warn!(error = %e, "data_conn_open rejected");
        }
        AgnssOutcome::Opened(resolved)
    }

    /// Cellular technology connected state changed. Only acted on while a
    /// connect we asked for is outstanding.
    pub fn on_cellular_connected(
        &mut self,
        connected: bool,
        agnss: &mut dyn Agnss,
        network: &mut dyn Network,
    ) -> AgnssOutcome {
        if !connected || !self.watching_broker {
            return AgnssOutcome::Aborted;
        }
        self.watching_broker = false;
        self.data_service_connected(agnss, network)
    }

    /// The connection broker reported an error for `path`.
    pub fn on_connection_error(&mut self, path: &str, agnss: &mut dyn Agnss) -> AgnssOutcome {
        if !self.watching_broker || !path.contains(CELLULAR) {
            return AgnssOutcome::Aborted;
        }
        self.watching_broker = false;
        self.requested_connect = false;
        report_failed(agnss)
    }

    /// The connection selector closed; `selected` is false on user cancel.
    /// Only acted on while a connect we asked for is outstanding.
    pub fn on_selector_closed(&mut self, selected: bool, agnss: &mut dyn Agnss) -> AgnssOutcome {
        if !self.watching_broker {
            return AgnssOutcome::Aborted;
        }
        if selected {
            return AgnssOutcome::Pending;
        }
        self.watching_broker = false;
        self.requested_connect = false;
        report_failed(agnss)
    }
}
