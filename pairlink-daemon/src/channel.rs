/*!
 * Method Channel
 * Named request/response endpoint the host application calls into
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::address::AddressError;
use crate::broker::PairingBroker;
use crate::outcome::{PairingError, PairingOutcome};

pub const PAIR_DEVICE: &str = "pairDevice";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn pair_device(address: &str) -> Self {
        Self {
            id: None,
            channel: None,
            method: PAIR_DEVICE.to_string(),
            arguments: serde_json::json!({ "address": address }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        result: bool,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        code: String,
        message: String,
        details: Option<String>,
    },
    NotImplemented {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        method: String,
    },
    /// The request line was not a method call at all.
    Malformed { message: String },
}

impl Response {
    pub fn from_outcome(id: Option<u64>, outcome: &PairingOutcome) -> Self {
        match outcome {
            PairingOutcome::Paired | PairingOutcome::Connected => Response::Success { id, result: true },
            PairingOutcome::Failed(error) => Response::from_error(id, error),
        }
    }

    pub fn from_error(id: Option<u64>, error: &PairingError) -> Self {
        Response::Error {
            id,
            code: error.code().to_string(),
            message: error.message().to_string(),
            details: error.details(),
        }
    }
}

pub struct MethodChannel {
    name: String,
    broker: Arc<PairingBroker>,
}

impl MethodChannel {
    pub fn new(name: impl Into<String>, broker: Arc<PairingBroker>) -> Self {
        Self {
            name: name.into(),
            broker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<MethodCall>(line) {
            Ok(call) => self.handle(call).await,
            Err(e) => Response::Malformed {
                message: e.to_string(),
            },
        }
    }

    pub async fn handle(&self, call: MethodCall) -> Response {
        if let Some(channel) = call.channel.as_deref() {
            if channel != self.name {
                tracing::debug!("No handler on channel {}", channel);
                return Response::NotImplemented {
                    id: call.id,
                    method: call.method,
                };
            }
        }

        match call.method.as_str() {
            PAIR_DEVICE => match call.arguments.get("address").and_then(Value::as_str) {
                Some(address) => {
                    let outcome = self.broker.request_pairing(address).await;
                    Response::from_outcome(call.id, &outcome)
                }
                None => Response::from_error(
                    call.id,
                    &PairingError::InvalidAddress(AddressError::Missing),
                ),
            },
            _ => {
                tracing::debug!("Method {} not implemented", call.method);
                Response::NotImplemented {
                    id: call.id,
                    method: call.method,
                }
            }
        }
    }
}
