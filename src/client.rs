//! Bus client holding one persistent connection to the provider.
//!
//! The connection identity is the bus peer identity, so references taken
//! with `AddReference` live exactly as long as the client.

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::expand_tilde;
use crate::protocol::{methods, Incoming, Request, Response, Signal};

/// # Example
///
/// ```rust,no_run
/// use hybris_location::BusClient;
///
/// let mut client = BusClient::connect("~/.local/share/hybris-location/provider.sock")?;
/// client.call("AddReference", serde_json::Value::Null)?;
/// let signal = client.next_signal()?;
/// println!("{}: {}", signal.signal, signal.args);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct BusClient {
    socket_path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    /// Signals read while waiting for a response.
    pending_signals: VecDeque<Signal>,
}

impl BusClient {
    /// Connect to the provider socket (supports `~` expansion).
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = expand_tilde(&socket_path.as_ref().to_string_lossy());
        let stream = UnixStream::connect(&socket_path)
            .with_context(|| format!("Cannot connect to provider at {:?}", socket_path))?;
        let reader = BufReader::new(stream.try_clone()?);
        let client = Self {
            socket_path,
            writer: stream,
            reader,
            pending_signals: VecDeque::new(),
        };
        client.set_timeout(Some(Duration::from_secs(30)))?;
        Ok(client)
    }

    /// Read/write timeout for the connection; `None` blocks forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.writer.set_read_timeout(timeout)?;
        self.writer.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Call a method. An object `params` becomes the parameter map; `Null`
    /// means no parameters.
    pub fn call(&mut self, method: &str, params: serde_json::Value) -> Result<Response> {
        let params_map: HashMap<String, serde_json::Value> = match params {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            serde_json::Value::Null => HashMap::new(),
            other => {
                let mut map = HashMap::new();
                map.insert("value".into(), other);
                map
            }
        };
        self.send_request(&Request::new(method, params_map))
    }

    pub fn health(&mut self) -> Result<Response> {
        self.call(methods::HEALTH, serde_json::Value::Null)
    }

    pub fn stop(&mut self) -> Result<Response> {
        self.call(methods::STOP, serde_json::Value::Null)
    }

    /// Next broadcast signal, buffered or read from the connection.
    pub fn next_signal(&mut self) -> Result<Signal> {
        if let Some(signal) = self.pending_signals.pop_front() {
            return Ok(signal);
        }
        match self.read_message()? {
            Incoming::Signal(signal) => Ok(signal),
            Incoming::Response(response) => {
                bail!("Unexpected response {} while waiting for a signal", response.id)
            }
        }
    }

    /// Read signals until one named `name` arrives, discarding the others.
    pub fn wait_for_signal(&mut self, name: &str) -> Result<Signal> {
        loop {
            let signal = self.next_signal()?;
            if signal.signal == name {
                return Ok(signal);
            }
        }
    }

    fn send_request(&mut self, request: &Request) -> Result<Response> {
        let line = request.to_ndjson_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        loop {
            match self.read_message()? {
                Incoming::Signal(signal) => self.pending_signals.push_back(signal),
                Incoming::Response(response) if response.id == request.id => return Ok(response),
                Incoming::Response(response) => {
                    tracing::debug!(id = %response.id, "Discarding response for another request")
                }
            }
        }
    }

    fn read_message(&mut self) -> Result<Incoming> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            bail!("Provider closed the connection");
        }
        Incoming::from_ndjson_line(line.trim_end())
    }
}
