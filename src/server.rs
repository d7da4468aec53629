//! UNIX socket bus server.
//!
//! Every accepted connection becomes a peer with a unique identity
//! (`":1.N"`). A reader thread per peer forwards requests to the
//! coordination loop. Answers and broadcast signals go through a bounded
//! per-peer queue drained by the peer's writer thread, so a peer that stops
//! reading never blocks the coordination loop; it is disconnected once its
//! queue overflows.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::expand_tilde;
use crate::event::{Event, EventSender};
use crate::protocol::{error_codes, Request, Response, Signal};
use crate::service::SignalSink;

/// Lines queued per peer before it is considered stalled.
const OUTBOUND_QUEUE: usize = 256;

struct Peer {
    outbound: SyncSender<String>,
    stream: UnixStream,
}

impl Peer {
    fn disconnect(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

type Peers = Arc<Mutex<HashMap<String, Peer>>>;

/// Bus server bound to its socket, not yet accepting.
pub struct BusServer {
    socket_path: PathBuf,
    listener: UnixListener,
    peers: Peers,
}

impl BusServer {
    /// Bind the socket (supports `~` expansion). A stale socket file is
    /// replaced; callers check for a live instance first.
    pub fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = expand_tilde(&socket_path.as_ref().to_string_lossy());

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self {
            socket_path,
            listener,
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Signal sink writing to every connected peer.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster {
            peers: self.peers.clone(),
        }
    }

    /// Start accepting connections on a background thread.
    pub fn spawn(self, events: EventSender) -> Result<ServerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let next_peer = Arc::new(AtomicU64::new(1));

        let listener = self.listener;
        let peers = self.peers.clone();
        let accept_running = running.clone();
        let thread = thread::Builder::new()
            .name("bus-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    if !accept_running.load(Ordering::SeqCst) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let peer = format!(":1.{}", next_peer.fetch_add(1, Ordering::SeqCst));
                            if let Err(e) = start_peer(peer, stream, &peers, &events) {
                                error!(error = %e, "Connection error");
                            }
                        }
                        Err(e) => warn!(error = %e, "Accept error"),
                    }
                }
                debug!("Accept loop finished");
            })
            .context("Failed to spawn accept thread")?;

        info!(socket = %self.socket_path.display(), "Bus server listening");

        Ok(ServerHandle {
            socket_path: self.socket_path,
            running,
            peers: self.peers,
            thread: Some(thread),
        })
    }
}

fn start_peer(peer: String, stream: UnixStream, peers: &Peers, events: &EventSender) -> Result<()> {
    let (outbound, queue) = mpsc::sync_channel(OUTBOUND_QUEUE);
    let writer = stream.try_clone()?;
    let entry = Peer {
        outbound: outbound.clone(),
        stream: stream.try_clone()?,
    };

    let writer_peer = peer.clone();
    thread::Builder::new()
        .name(format!("bus-peer{}-tx", peer))
        .spawn(move || drain_queue(&writer_peer, writer, queue))?;

    lock(peers).insert(peer.clone(), entry);
    debug!(peer = %peer, "Peer connected");

    let peers = peers.clone();
    let events = events.clone();
    thread::Builder::new()
        .name(format!("bus-peer{}", peer))
        .spawn(move || {
            serve_peer(&peer, stream, &outbound, &events);
            lock(&peers).remove(&peer);
            debug!(peer = %peer, "Peer disconnected");
            events.post(Event::PeerDisconnected(peer));
        })?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write queued lines until the queue closes or the peer goes away.
fn drain_queue(peer: &str, mut stream: UnixStream, queue: Receiver<String>) {
    for line in queue {
        let written = stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.flush());
        if let Err(e) = written {
            debug!(peer = %peer, error = %e, "Peer write failed");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }
}

/// Read requests until the peer hangs up.
fn serve_peer(peer: &str, stream: UnixStream, outbound: &SyncSender<String>, events: &EventSender) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Peer read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let start = Instant::now();
        let response = match Request::from_ndjson_line(&line) {
            Ok(request) => forward(peer, request, events, start),
            Err(e) => Response::error(
                "null",
                error_codes::INVALID_REQUEST,
                format!("Failed to parse request: {}", e),
                elapsed_ms(start),
            ),
        };

        let line = match response.to_ndjson_line() {
            Ok(line) => line,
            Err(e) => {
                error!(peer = %peer, error = %e, "Failed to encode response");
                continue;
            }
        };
        if outbound.send(line).is_err() {
            debug!(peer = %peer, "Peer writer gone, closing");
            return;
        }
    }
}

/// Hand a request to the coordination loop and wait for its answer.
fn forward(peer: &str, request: Request, events: &EventSender, start: Instant) -> Response {
    let id = request.id.clone();
    debug!(peer = %peer, method = %request.method, id = %id, "Handling request");

    let (reply, answer) = mpsc::channel();
    events.post(Event::MethodCall {
        peer: peer.to_string(),
        request,
        reply,
    });
    match answer.recv() {
        Ok(mut response) => {
            response.meta.server_ms = elapsed_ms(start);
            response
        }
        Err(_) => Response::error(
            id,
            error_codes::INTERNAL_ERROR,
            "Provider is shutting down",
            elapsed_ms(start),
        ),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Queues signals for every connected peer.
#[derive(Clone)]
pub struct Broadcaster {
    peers: Peers,
}

impl Broadcaster {
    /// Number of peers currently receiving signals.
    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }
}

impl SignalSink for Broadcaster {
    fn emit(&self, signal: Signal) {
        let line = match signal.to_ndjson_line() {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, signal = signal.signal, "Failed to encode signal");
                return;
            }
        };
        let mut peers = lock(&self.peers);
        let mut stalled = Vec::new();
        for (peer, entry) in peers.iter() {
            match entry.outbound.try_send(line.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => stalled.push(peer.clone()),
                Err(TrySendError::Disconnected(_)) => {
                    debug!(peer = %peer, "Dropping signal for departing peer");
                }
            }
        }
        for peer in stalled {
            warn!(peer = %peer, "Peer is not reading signals, disconnecting");
            if let Some(entry) = peers.remove(&peer) {
                entry.disconnect();
            }
        }
    }
}

/// Running server; dropping it stops accepting and disconnects all peers.
pub struct ServerHandle {
    socket_path: PathBuf,
    running: Arc<AtomicBool>,
    peers: Peers,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake the accept loop so it sees the flag.
        let _ = UnixStream::connect(&self.socket_path);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        for (_, peer) in lock(&self.peers).drain() {
            peer.disconnect();
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("Bus server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
