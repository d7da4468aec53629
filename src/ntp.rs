//! SNTP client feeding UTC time into the GNSS engine.
//!
//! One 48-byte client request is sent per server; the first valid answer is
//! turned into a `(utc, reference, uncertainty)` triple and injected. A retry
//! timer moves on to the next server while the queue is non-empty.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::config::{NTP_PORT, NTP_RETRY_INTERVAL};
use crate::error::NtpError;
use crate::event::{Event, EventSender};
use crate::timer::{TimerId, Timers};

/// Seconds between 1900-01-01 and 1970-01-01.
pub const NTP_EPOCH_OFFSET: i64 = 2_208_988_800;

pub const PACKET_SIZE: usize = 48;

/// Leap indicator 0, version 3, mode 3 (client).
pub const CLIENT_FLAGS: u8 = 3 | (3 << 3);

/// 64-bit NTP timestamp: seconds since 1900 and a 32-bit binary fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn from_unix_ms(ms: i64) -> Self {
        let seconds = ms.div_euclid(1000) + NTP_EPOCH_OFFSET;
        let millis = ms.rem_euclid(1000);
        Self {
            seconds: seconds as u32,
            fraction: (((millis << 32) + 999) / 1000) as u32,
        }
    }

    pub fn to_unix_ms(self) -> i64 {
        let seconds = self.seconds as i64 - NTP_EPOCH_OFFSET;
        let millis = (self.fraction as i64 * 1000) >> 32;
        seconds * 1000 + millis
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            seconds: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fraction: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    fn write(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..8].copy_from_slice(&self.fraction.to_be_bytes());
    }
}

/// NTP v3 packet, all fields big-endian on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtpPacket {
    pub flags: u8,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub reference_id: u32,
    pub reference: NtpTimestamp,
    pub origin: NtpTimestamp,
    pub receive: NtpTimestamp,
    pub transmit: NtpTimestamp,
}

impl NtpPacket {
    /// Client request stamped with `transmit_ms` (Unix milliseconds).
    pub fn client_request(transmit_ms: i64) -> Self {
        Self {
            flags: CLIENT_FLAGS,
            transmit: NtpTimestamp::from_unix_ms(transmit_ms),
            ..Self::default()
        }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[0] = self.flags;
        out[1] = self.stratum;
        out[2] = self.poll as u8;
        out[3] = self.precision as u8;
        out[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        out[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        out[12..16].copy_from_slice(&self.reference_id.to_be_bytes());
        self.reference.write(&mut out[16..24]);
        self.origin.write(&mut out[24..32]);
        self.receive.write(&mut out[32..40]);
        self.transmit.write(&mut out[40..48]);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NtpError> {
        if bytes.len() != PACKET_SIZE {
            return Err(NtpError::WrongSize(bytes.len()));
        }
        let word = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(Self {
            flags: bytes[0],
            stratum: bytes[1],
            poll: bytes[2] as i8,
            precision: bytes[3] as i8,
            root_delay: word(4),
            root_dispersion: word(8),
            reference_id: word(12),
            reference: NtpTimestamp::read(&bytes[16..24]),
            origin: NtpTimestamp::read(&bytes[24..32]),
            receive: NtpTimestamp::read(&bytes[32..40]),
            transmit: NtpTimestamp::read(&bytes[40..48]),
        })
    }
}

/// Clock offset from the four exchange timestamps: client send (`origin`),
/// server receive, server transmit and client receive (`response`).
pub fn clock_offset(origin: i64, receive: i64, transmit: i64, response: i64) -> i64 {
    ((receive - origin) + (transmit - response)) / 2
}

/// Time to hand to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    pub utc_time_ms: i64,
    pub reference_time_ms: i64,
    pub uncertainty_ms: i32,
}

/// A request in flight.
#[derive(Debug, Clone)]
struct Exchange {
    host: String,
    address: SocketAddr,
    /// Wall time written into the request, as the server will echo it.
    request_time_ms: i64,
    request_ticks_ms: i64,
}

impl Exchange {
    fn sample(&self, reply: &NtpPacket, response_ticks_ms: i64) -> TimeSample {
        let rtt_ticks = response_ticks_ms - self.request_ticks_ms;
        let response_time = self.request_time_ms + rtt_ticks;
        let receive = reply.receive.to_unix_ms();
        let transmit = reply.transmit.to_unix_ms();
        let offset = clock_offset(reply.origin.to_unix_ms(), receive, transmit, response_time);

        TimeSample {
            utc_time_ms: response_time + offset,
            reference_time_ms: response_ticks_ms,
            uncertainty_ms: ((rtt_ticks - (transmit - receive)) / 2) as i32,
        }
    }
}

/// Datagram I/O for the time sync. Results come back as `NtpResolved` and
/// `NtpDatagram` events.
pub trait NtpTransport: Send {
    /// Start resolving `host`; never blocks the caller.
    fn resolve(&mut self, host: &str);

    fn send(&mut self, address: SocketAddr, payload: &[u8]) -> io::Result<()>;
}

/// UDP transport. The socket is bound on first use and read by a dedicated
/// thread for the rest of the process lifetime.
pub struct UdpNtpTransport {
    events: EventSender,
    socket: Option<UdpSocket>,
}

impl UdpNtpTransport {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            socket: None,
        }
    }

    fn socket(&mut self) -> io::Result<&UdpSocket> {
        if self.socket.is_none() {
            let socket = UdpSocket::bind(("0.0.0.0", 0))?;
            let reader = socket.try_clone()?;
            let events = self.events.clone();
            thread::Builder::new()
                .name("ntp-reader".into())
                .spawn(move || read_datagrams(reader, events))?;
            debug!(local = ?socket.local_addr().ok(), "NTP socket bound");
            self.socket = Some(socket);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "NTP socket unavailable"))
    }
}

fn read_datagrams(socket: UdpSocket, events: EventSender) {
    let mut buf = [0u8; 512];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let received_ticks_ms = clock::monotonic_ms();
                debug!(%from, len, "NTP datagram received");
                events.post(Event::NtpDatagram {
                    payload: buf[..len].to_vec(),
                    received_ticks_ms,
                });
            }
            Err(e) => {
                warn!(error = %e, "NTP socket read failed");
                return;
            }
        }
    }
}

impl NtpTransport for UdpNtpTransport {
    fn resolve(&mut self, host: &str) {
        let host = host.to_string();
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("ntp-resolve".into())
            .spawn(move || {
                let address = (host.as_str(), NTP_PORT)
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4));
                events.post(Event::NtpResolved { host, address });
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn NTP resolver");
        }
    }

    fn send(&mut self, address: SocketAddr, payload: &[u8]) -> io::Result<()> {
        self.socket()?.send_to(payload, address).map(|_| ())
    }
}

pub struct NtpTimeSync {
    servers: VecDeque<String>,
    exchange: Option<Exchange>,
    resolving: Option<String>,
    transport: Box<dyn NtpTransport>,
    clock: Arc<dyn Clock>,
}

impl NtpTimeSync {
    pub fn new(transport: Box<dyn NtpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            servers: VecDeque::new(),
            exchange: None,
            resolving: None,
            transport,
            clock,
        }
    }

    /// The engine asked for UTC time. `servers` are the default route's
    /// time servers; an empty list aborts silently. While a retry cycle is
    /// running the new list replaces the remaining queue and is picked up by
    /// the next retry.
    pub fn request_time(&mut self, servers: Vec<String>, timers: &mut Timers) {
        if servers.is_empty() {
            debug!("No time servers known, skipping NTP");
            return;
        }
        self.servers = servers.into();
        if timers.is_active(TimerId::NtpRetry) {
            debug!("NTP request queued behind retry timer");
            return;
        }
        timers.start(TimerId::NtpRetry, NTP_RETRY_INTERVAL);
        self.send_next(timers);
    }

    /// Retry timer expired without an answer.
    pub fn on_retry(&mut self, timers: &mut Timers) {
        if self.servers.is_empty() {
            return;
        }
        timers.start(TimerId::NtpRetry, NTP_RETRY_INTERVAL);
        self.send_next(timers);
    }

    fn send_next(&mut self, timers: &mut Timers) {
        let Some(host) = self.servers.pop_front() else {
            timers.stop(TimerId::NtpRetry);
            return;
        };
        if self.servers.is_empty() {
            timers.stop(TimerId::NtpRetry);
        }
        debug!(host, "Resolving NTP server");
        self.resolving = Some(host.clone());
        self.transport.resolve(&host);
    }

    pub fn on_resolved(&mut self, host: &str, address: Option<SocketAddr>) {
        if self.resolving.as_deref() != Some(host) {
            debug!(host, "Ignoring stale NTP resolution");
            return;
        }
        self.resolving = None;
        let Some(address) = address else {
            warn!(host, "Could not resolve NTP server");
            return;
        };

        let packet = NtpPacket::client_request(self.clock.now_ms());
        let exchange = Exchange {
            host: host.to_string(),
            address,
            request_time_ms: packet.transmit.to_unix_ms(),
            request_ticks_ms: self.clock.monotonic_ms(),
        };
        match self.transport.send(address, &packet.encode()) {
            Ok(()) => {
                debug!(host, %address, "NTP request sent");
                self.exchange = Some(exchange);
            }
            Err(e) => warn!(host, error = %e, "Failed to send NTP request"),
        }
    }

    /// A datagram arrived. A valid answer to the outstanding request ends the
    /// cycle and yields the sample to inject.
    pub fn on_datagram(
        &mut self,
        payload: &[u8],
        received_ticks_ms: i64,
        timers: &mut Timers,
    ) -> Option<TimeSample> {
        let reply = match NtpPacket::decode(payload) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "Ignoring NTP datagram");
                return None;
            }
        };
        let Some(exchange) = self.exchange.take() else {
            debug!("NTP reply without outstanding request");
            return None;
        };

        let sample = exchange.sample(&reply, received_ticks_ms);
        info!(
            host = exchange.host,
            server = %exchange.address,
            utc = sample.utc_time_ms,
            uncertainty = sample.uncertainty_ms,
            "NTP time received"
        );
        self.servers.clear();
        timers.stop(TimerId::NtpRetry);
        Some(sample)
    }

    pub fn in_progress(&self) -> bool {
        self.exchange.is_some() || self.resolving.is_some() || !self.servers.is_empty()
    }
}
