//! Wire-adjacent data model: requests, response envelopes, management
//! records and the events that cross the core boundary.
//!
//! The core never interprets QMP/QGA schema types (spec.md §1) — outgoing
//! requests are an opaque `(id, execute, arguments)` triple and incoming
//! responses are classified into one of four shapes (spec.md §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A caller-submitted command. `id` is the correlation identifier; an empty
/// id means "no correlation" and the request can never be awaited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, execute: impl Into<String>, arguments: Option<Value>) -> Self {
        let id = id.into();
        Request {
            id: if id.is_empty() { None } else { Some(id) },
            execute: execute.into(),
            arguments,
        }
    }

    /// The correlation id, or `""` if this request carries no id.
    pub fn request_id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

/// A loose pre-classification shape used only to decide which of the four
/// categories (spec.md §3) an inbound envelope belongs to, before doing the
/// typed decode. Mirrors the two-phase decode in
/// `examples/original_source/src/monitor/monitor.go` (`client.RawResponse`).
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub id: Option<String>,
    /// `Option<Option<Value>>`, not `Option<Value>`: serde collapses a
    /// present-but-`null` `return` field to `None` under the latter, which
    /// would misclassify `{"return":null,"id":"x"}` as `Generic` even though
    /// spec.md §3 item 2 explicitly allows a null result ("possibly null
    /// JSON"). The outer `Option` tracks field *presence*; the inner one is
    /// the actual (possibly null) payload.
    #[serde(rename = "return", default)]
    pub result: Option<Option<Value>>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Classification of an inbound response envelope, in priority order per
/// spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Event,
    Result,
    ErrorResult,
    Generic,
}

impl RawEnvelope {
    pub fn classify(&self) -> EnvelopeKind {
        if self.event.as_deref().is_some_and(|s| !s.is_empty())
            && self.data.is_some()
            && self.timestamp.is_some()
        {
            EnvelopeKind::Event
        } else if self.result.is_some() {
            EnvelopeKind::Result
        } else if self.error.is_some() {
            EnvelopeKind::ErrorResult
        } else {
            EnvelopeKind::Generic
        }
    }
}

/// Tagged union transmitted over the internal management pipe, one JSON
/// object per record (spec.md §3, §6). `action` doubles as the
/// discriminant so the wire format matches the external interface spec
/// exactly (`{action:int, add?:..., cancel?:..., execute?:...}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementRecord {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<AddConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<CancelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteConfig>,
}

/// Wire value is the bare integer (spec.md §6: `action:int`), not the
/// variant name — `serde`'s derive defaults to the latter for a fieldless
/// enum, so the `into`/`try_from` detour below is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum Action {
    Add = 0,
    Cancel = 1,
    Close = 2,
    Execute = 3,
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Action::Add),
            1 => Ok(Action::Cancel),
            2 => Ok(Action::Close),
            3 => Ok(Action::Execute),
            other => Err(format!("unknown management action code {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConfig {
    pub id: String,
    pub config: CommConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteConfig {
    pub id: String,
    pub request: Request,
}

impl ManagementRecord {
    pub fn add(id: impl Into<String>, config: CommConfig) -> Self {
        ManagementRecord {
            action: Action::Add,
            add: Some(AddConfig { id: id.into(), config }),
            cancel: None,
            execute: None,
        }
    }

    pub fn execute(id: impl Into<String>, request: Request) -> Self {
        ManagementRecord {
            action: Action::Execute,
            add: None,
            cancel: None,
            execute: Some(ExecuteConfig { id: id.into(), request }),
        }
    }

    pub fn cancel(request_id: impl Into<String>) -> Self {
        ManagementRecord {
            action: Action::Cancel,
            add: None,
            cancel: Some(CancelConfig { id: request_id.into() }),
            execute: None,
        }
    }

    pub fn close() -> Self {
        ManagementRecord {
            action: Action::Close,
            add: None,
            cancel: None,
            execute: None,
        }
    }
}

/// Tagged union describing how to reach an instance (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommConfig {
    UnixDomain { socket_path: String },
    Pipe,
}

/// `Added`/`Removed` transitions for a named instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Added,
    Removed,
}

/// Classification of a `DataMessage` payload, matching spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Event,
    Result,
    Generic,
}

/// What crosses the public `Messages()` boundary (spec.md §3
/// `MonitorEvent`, minus the internal-only `ControlAck` variant which never
/// leaves the event loop / dispatcher wiring).
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Instance {
        instance: String,
        kind: InstanceKind,
    },
    Data {
        instance: String,
        kind: DataKind,
        payload: Option<Vec<u8>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_return_still_classifies_as_result() {
        let envelope: RawEnvelope = serde_json::from_str(r#"{"return":null,"id":"x"}"#).unwrap();
        assert_eq!(envelope.classify(), EnvelopeKind::Result);
        assert_eq!(envelope.result, Some(None));
    }

    #[test]
    fn missing_return_does_not_classify_as_result() {
        let envelope: RawEnvelope = serde_json::from_str(r#"{"QMP":{"version":{}}}"#).unwrap();
        assert_eq!(envelope.classify(), EnvelopeKind::Generic);
        assert_eq!(envelope.result, None);
    }

    #[test]
    fn object_return_classifies_as_result() {
        let envelope: RawEnvelope = serde_json::from_str(r#"{"return":{"ok":true},"id":"x"}"#).unwrap();
        assert_eq!(envelope.classify(), EnvelopeKind::Result);
        assert_eq!(envelope.result, Some(Some(serde_json::json!({"ok": true}))));
    }
}
