//! Messages posted to the coordination loop.
//!
//! Every thread that produces work for the provider (engine callbacks, bus
//! connections, resolver and download workers) holds an [`EventSender`] and
//! never touches provider state directly.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

use crate::engine::EngineEvent;
use crate::protocol::{Request, Response};

/// Everything the coordination loop reacts to.
#[derive(Debug)]
pub enum Event {
    /// A bus method call from `peer`; the response goes back on `reply`.
    MethodCall {
        peer: String,
        request: Request,
        reply: Sender<Response>,
    },
    /// A bus peer's connection went away.
    PeerDisconnected(String),
    /// Callback from the GNSS engine, already marshaled off the engine thread.
    Engine(EngineEvent),
    /// Location settings changed on disk.
    SettingsChanged,
    /// Flight mode toggled by the connectivity layer.
    FlightModeChanged(bool),
    /// Network connectivity changed (online = default route present).
    NetworkStateChanged { online: bool },
    /// Cellular technology connected state changed.
    CellularConnected(bool),
    /// The connection broker reported an error for a service path.
    ConnectionError { path: String, error: String },
    /// The user closed the connection selector; `selected` is false on cancel.
    ConnectionSelectorClosed { selected: bool },
    /// Name resolution for an NTP server finished.
    NtpResolved {
        host: String,
        address: Option<SocketAddr>,
    },
    /// A datagram arrived on the NTP socket.
    NtpDatagram {
        payload: Vec<u8>,
        received_ticks_ms: i64,
    },
    /// An almanac download attempt finished.
    XtraFetched {
        url: String,
        result: Result<Vec<u8>, String>,
    },
    /// Stop the loop (the `stop` built-in or a signal handler).
    Shutdown,
}

/// Cloneable, thread-safe handle for posting [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Post an event. A closed loop is not an error for producers; the
    /// event is dropped.
    pub fn post(&self, event: Event) {
        if let Err(mpsc::SendError(event)) = self.tx.send(event) {
            debug!(?event, "Coordination loop gone, dropping event");
        }
    }
}

/// Create the queue feeding the coordination loop.
pub fn channel() -> (EventSender, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}
