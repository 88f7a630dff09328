//! Control channel wire format: one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only procedure exposed by the control plane.
pub const SET_MAINTENANCE: &str = "Control.SetMaintenance";

/// Reply when maintenance was switched on.
pub const MAINTENANCE_ON: &str = "Server in maintenance mode";

/// Reply when maintenance was switched off.
pub const MAINTENANCE_OFF: &str = "Server live!";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: u64,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(id: u64, result: impl Into<String>) -> Self {
        Self {
            id,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Boolean argument of `SetMaintenance`, given bare or as a one-element list.
pub fn bool_param(params: &Value) -> Option<bool> {
    match params {
        Value::Bool(value) => Some(*value),
        Value::Array(items) if items.len() == 1 => items[0].as_bool(),
        _ => None,
    }
}
