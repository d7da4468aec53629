//! Bus service trait.
//!
//! The coordination loop owns one [`BusService`] and feeds it every method
//! call that is not a built-in. Implementations are only ever touched from
//! that loop, so they take `&mut self` and need no locking.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::MethodError;
use crate::protocol::Signal;

pub trait BusService {
    /// Service name (logs and `health`).
    fn name(&self) -> &str;

    /// Service version (semver).
    fn version(&self) -> &str;

    /// Dispatch a method call.
    ///
    /// # Arguments
    /// * `caller` - Bus identity of the calling peer; `None` for in-process calls
    /// * `method` - The method name (e.g. "AddReference")
    /// * `params` - Method parameters as key-value pairs
    fn dispatch(
        &mut self,
        caller: Option<&str>,
        method: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Value, MethodError>;

    /// Methods advertised by the `methods` built-in.
    fn method_list(&self) -> Vec<MethodInfo> {
        vec![]
    }

    /// Service-specific entries for the `health` built-in.
    fn health_check(&self) -> HashMap<String, HealthStatus> {
        HashMap::new()
    }
}

/// Destination for broadcast signals.
pub trait SignalSink: Send {
    fn emit(&self, signal: Signal);
}

/// Method information for the `methods` response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamInfo>,
    /// Whether the method needs a caller identity
    #[serde(default)]
    pub requires_caller: bool,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: vec![],
            requires_caller: false,
        }
    }

    pub fn param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn requires_caller(mut self) -> Self {
        self.requires_caller = true;
        self
    }
}

/// Parameter information for method documentation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParamInfo {
    pub name: String,
    /// "integer", "number", "boolean", "object"
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamInfo {
    pub fn required(name: &str, param_type: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, default: Value) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// Health of one component.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn healthy_with(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Overall status string for a set of component health entries.
pub fn overall_status(services: &HashMap<String, HealthStatus>) -> &'static str {
    if services.values().all(|s| s.ok) {
        "healthy"
    } else if services.values().any(|s| s.ok) {
        "degraded"
    } else {
        "unhealthy"
    }
}
