//! # Envelopes
//!
//! The messages carried over pub/sub channels. A request names its target,
//! scope and method and says where to publish the answer; a response carries
//! the correlation key back with either a result or a failure.
//!
//! Envelopes are JSON so any process (or tooling) on the bus can read them.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;
use crate::handler::Scope;

/// Pairs a request with its response. Unique for the lifetime of a call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(node_id: &str, seq: u64) -> Self {
        Self(format!("{}/{}", node_id, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a request is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A named service, located through the service directory.
    Service(String),
    /// A single connected client, addressed by player id.
    Connection(String),
}

impl Target {
    pub fn service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    pub fn connection(player: impl Into<String>) -> Self {
        Self::Connection(player.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Service(name) | Self::Connection(name) => name,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service(name) => write!(f, "service:{}", name),
            Self::Connection(player) => write!(f, "connection:{}", player),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub key: CorrelationKey,
    /// Channel the response must be published on.
    pub reply_to: String,
    pub caller: String,
    pub target: Target,
    pub scope: Scope,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub key: CorrelationKey,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(Value),
    Error(Failure),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Handler,
    Malformed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Failure {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::NotFound, message: message.into(), payload: None }
    }

    pub fn handler(payload: Value) -> Self {
        Self { kind: FailureKind::Handler, message: "handler reported failure".into(), payload: Some(payload) }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Malformed, message: message.into(), payload: None }
    }
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        match f.kind {
            FailureKind::NotFound => Error::NotFound(f.message),
            FailureKind::Handler => Error::Handler(f.payload.unwrap_or(Value::String(f.message))),
            FailureKind::Malformed => Error::MalformedValue(f.message),
        }
    }
}

impl Outcome {
    pub fn into_result(self) -> Result<Value> {
        match self {
            Outcome::Result(v) => Ok(v),
            Outcome::Error(f) => Err(f.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

impl Envelope {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
