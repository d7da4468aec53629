//! Network and telephony collaborators.
//!
//! The connection manager, modem stack and connection broker are external
//! services; the provider only sees them through [`Network`]. Asynchronous
//! outcomes (broker errors, selector dialog results, cellular connected
//! changes) come back as [`Event`](crate::event::Event)s.

use tracing::{debug, info};

use crate::event::{Event, EventSender};

/// Technology name used for AGNSS bearers.
pub const CELLULAR: &str = "cellular";

/// A connection-manager service of the cellular technology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellularService {
    pub path: String,
    pub connected: bool,
    /// Bound network interface, empty when unknown.
    pub interface: String,
}

/// A modem connection context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub path: String,
    pub interface: String,
    pub access_point_name: String,
    /// `ip`, `ipv6` or `dual`.
    pub protocol: String,
}

pub trait Network: Send {
    /// Time servers advertised by the default route.
    fn default_route_time_servers(&self) -> Vec<String>;

    /// Whether the cellular technology currently has a connected service.
    fn cellular_connected(&self) -> bool;

    fn cellular_services(&self) -> Vec<CellularService>;

    /// Connection contexts of the first modem, in modem order.
    fn connection_contexts(&self) -> Vec<ConnectionContext>;

    /// Ask the connection broker to bring up a connection of `technology`.
    /// The outcome arrives as `CellularConnected`, `ConnectionError` or
    /// `ConnectionSelectorClosed` events.
    fn connect_to_type(&mut self, technology: &str);

    fn request_disconnect(&mut self, service_path: &str);
}

/// Network view for hosts without a connection manager: fixed time servers
/// and no cellular technology.
pub struct StaticNetwork {
    time_servers: Vec<String>,
    events: EventSender,
}

impl StaticNetwork {
    pub fn new(time_servers: Vec<String>, events: EventSender) -> Self {
        Self {
            time_servers,
            events,
        }
    }
}

impl Network for StaticNetwork {
    fn default_route_time_servers(&self) -> Vec<String> {
        self.time_servers.clone()
    }

    fn cellular_connected(&self) -> bool {
        false
    }

    fn cellular_services(&self) -> Vec<CellularService> {
        Vec::new()
    }

    fn connection_contexts(&self) -> Vec<ConnectionContext> {
        Vec::new()
    }

    fn connect_to_type(&mut self, technology: &str) {
        info!(technology, "No connection broker available");
        self.events.post(Event::ConnectionError {
            path: format!("/net/connman/technology/{}", technology),
            error: "no connection broker".to_string(),
        });
    }

    fn request_disconnect(&mut self, service_path: &str) {
        debug!(service_path, "Disconnect requested without connection manager");
    }
}
