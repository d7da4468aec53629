//! Bus protocol types, NDJSON over a UNIX socket.
//!
//! Every message is a single line of JSON. Peers send requests and receive
//! responses plus broadcast signals on the same connection.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::PROTOCOL_VERSION;

/// Request from a peer.
///
/// # Example
/// ```json
/// {"id":"abc123","v":1,"method":"SetOptions","params":{"UpdateInterval":2000}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID, echoed in the response
    pub id: String,
    /// Protocol version (currently 1)
    pub v: u8,
    /// Method name (e.g. "AddReference", "GetPosition", "health")
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Response to a single request.
///
/// # Example (success)
/// ```json
/// {"id":"abc123","ok":true,"result":{"status":3},"meta":{"server_ms":0.1,"protocol_v":1}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub meta: ResponseMeta,
}

/// Error details in a response.
///
/// Error codes:
/// - `INVALID_REQUEST`: Malformed request line
/// - `UNKNOWN_METHOD`: Method not found
/// - `INVALID_PARAMS`: Parameters of the wrong type
/// - `INTERNAL_ERROR`: The coordination loop did not answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Time spent answering, in milliseconds
    pub server_ms: f64,
    pub protocol_v: u8,
}

/// Broadcast signal, written to every connected peer.
///
/// # Example
/// ```json
/// {"signal":"StatusChanged","args":{"status":2}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Anything a peer can read from its connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Signal(Signal),
    Response(Response),
}

impl Request {
    /// Create a request with a fresh UUID.
    pub fn new(method: impl Into<String>, params: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            v: PROTOCOL_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn simple(method: impl Into<String>) -> Self {
        Self::new(method, HashMap::new())
    }

    pub fn from_ndjson_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("Failed to parse request JSON")
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

impl Response {
    pub fn success(id: impl Into<String>, result: serde_json::Value, server_ms: f64) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
            meta: ResponseMeta {
                server_ms,
                protocol_v: PROTOCOL_VERSION,
            },
        }
    }

    pub fn error(
        id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        server_ms: f64,
    ) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.into(),
                details: None,
            }),
            meta: ResponseMeta {
                server_ms,
                protocol_v: PROTOCOL_VERSION,
            },
        }
    }

    pub fn from_ndjson_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("Failed to parse response JSON")
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

impl Signal {
    pub fn new(signal: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            signal: signal.into(),
            args,
        }
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

impl Incoming {
    pub fn from_ndjson_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("Failed to parse message JSON")
    }
}

/// Error codes as constants.
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Bus method names.
pub mod methods {
    pub const HEALTH: &str = "health";
    pub const STOP: &str = "stop";
    pub const METHODS: &str = "methods";

    pub const ADD_REFERENCE: &str = "AddReference";
    pub const REMOVE_REFERENCE: &str = "RemoveReference";
    pub const GET_PROVIDER_INFO: &str = "GetProviderInfo";
    pub const GET_STATUS: &str = "GetStatus";
    pub const SET_OPTIONS: &str = "SetOptions";
    pub const GET_POSITION: &str = "GetPosition";
    pub const GET_VELOCITY: &str = "GetVelocity";
    pub const GET_SATELLITE: &str = "GetSatellite";
    pub const GET_LAST_SATELLITE: &str = "GetLastSatellite";
    pub const INJECT_POSITION: &str = "InjectPosition";
    pub const GET_MAGNETIC_VARIATION: &str = "GetMagneticVariation";
    pub const GET_POWERED: &str = "GetPowered";
    pub const SET_POWERED: &str = "SetPowered";
}

/// Broadcast signal names.
pub mod signals {
    pub const STATUS_CHANGED: &str = "StatusChanged";
    pub const POSITION_CHANGED: &str = "PositionChanged";
    pub const VELOCITY_CHANGED: &str = "VelocityChanged";
    pub const SATELLITE_CHANGED: &str = "SatelliteChanged";
}
