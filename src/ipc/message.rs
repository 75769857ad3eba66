//! # Protocol messages.
//!
//! Both directions are JSON objects tagged by a `type` field. Parsing is lenient
//! where the protocol is open (unknown types are passed through as custom
//! messages) and strict where correlation depends on it (`eval`/`fetch`
//! responses must carry an `id`).

use serde_json::{Map, Value, json};

use crate::error::IpcError;
use crate::ipc::Script;

/// Worker log level carried by `log` messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses a level name; unknown names map to `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "error" | "fatal" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" | "verbose" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Message sent by a worker to the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Worker finished its own startup (or resumed after a disconnect).
    Ready,
    /// Advisory: upstream connection lost.
    Disconnect,
    /// Advisory: upstream connection being re-established.
    Reconnecting,
    /// Answer to an `eval` request.
    Eval {
        id: String,
        outcome: Result<Value, String>,
    },
    /// Answer to a `fetch` request.
    Fetch {
        id: String,
        outcome: Result<Value, String>,
    },
    /// Worker-pushed metrics.
    Stats(Value),
    /// Log line to re-emit on the orchestrator side.
    Log { level: LogLevel, message: String },
    /// Anything else, passed through unchanged.
    Custom(Value),
}

impl Inbound {
    /// Interprets a decoded JSON value.
    pub fn parse(value: Value) -> Result<Self, IpcError> {
        let Value::Object(mut obj) = value else {
            return Err(IpcError::Malformed {
                reason: "message is not a JSON object".into(),
            });
        };
        let kind = obj.get("type").and_then(Value::as_str).map(str::to_owned);

        Ok(match kind.as_deref() {
            Some("ready") => Inbound::Ready,
            Some("disconnect") => Inbound::Disconnect,
            Some("reconnecting") => Inbound::Reconnecting,
            Some("eval") => {
                let (id, outcome) = take_response(&mut obj, "eval")?;
                Inbound::Eval { id, outcome }
            }
            Some("fetch") => {
                let (id, outcome) = take_response(&mut obj, "fetch")?;
                Inbound::Fetch { id, outcome }
            }
            Some("stats") => Inbound::Stats(obj.remove("data").unwrap_or(Value::Null)),
            Some("log") => Inbound::Log {
                level: LogLevel::parse(obj.get("level").and_then(Value::as_str).unwrap_or("info")),
                message: match obj.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            },
            _ => Inbound::Custom(Value::Object(obj)),
        })
    }

    /// Encodes the message for the wire (used by the worker side).
    pub fn into_value(self) -> Value {
        match self {
            Inbound::Ready => json!({"type": "ready"}),
            Inbound::Disconnect => json!({"type": "disconnect"}),
            Inbound::Reconnecting => json!({"type": "reconnecting"}),
            Inbound::Eval { id, outcome } => response("eval", id, outcome),
            Inbound::Fetch { id, outcome } => response("fetch", id, outcome),
            Inbound::Stats(data) => json!({"type": "stats", "data": data}),
            Inbound::Log { level, message } => {
                json!({"type": "log", "level": level.as_str(), "message": message})
            }
            Inbound::Custom(v) => v,
        }
    }
}

/// Message sent by the orchestrator to a worker.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Remote evaluation request.
    Eval { id: String, script: Script },
    /// Client property request.
    Fetch { id: String, prop: String },
    /// Application-level broadcast envelope.
    Broadcast(Value),
    /// Arbitrary message, sent unchanged.
    Custom(Value),
}

impl Outbound {
    /// Encodes the message for the wire.
    pub fn into_value(self) -> Result<Value, IpcError> {
        Ok(match self {
            Outbound::Eval { id, script } => {
                json!({"type": "eval", "id": id, "script": serde_json::to_value(script)?})
            }
            Outbound::Fetch { id, prop } => json!({"type": "fetch", "id": id, "prop": prop}),
            Outbound::Broadcast(message) => json!({"type": "broadcast", "message": message}),
            Outbound::Custom(v) => v,
        })
    }

    /// Interprets a decoded JSON value (used by the worker side).
    pub fn parse(value: Value) -> Result<Self, IpcError> {
        let Value::Object(mut obj) = value else {
            return Err(IpcError::Malformed {
                reason: "message is not a JSON object".into(),
            });
        };
        let kind = obj.get("type").and_then(Value::as_str).map(str::to_owned);

        Ok(match kind.as_deref() {
            Some("eval") => {
                let id = take_id(&mut obj, "eval")?;
                let script = obj.remove("script").ok_or_else(|| IpcError::Malformed {
                    reason: "eval request without script".into(),
                })?;
                Outbound::Eval {
                    id,
                    script: serde_json::from_value(script)?,
                }
            }
            Some("fetch") => {
                let id = take_id(&mut obj, "fetch")?;
                let prop = obj
                    .get("prop")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Outbound::Fetch { id, prop }
            }
            Some("broadcast") => Outbound::Broadcast(obj.remove("message").unwrap_or(Value::Null)),
            _ => Outbound::Custom(Value::Object(obj)),
        })
    }
}

fn take_id(obj: &mut Map<String, Value>, kind: &str) -> Result<String, IpcError> {
    match obj.remove("id") {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(IpcError::Malformed {
            reason: format!("{kind} message without id"),
        }),
    }
}

fn take_response(
    obj: &mut Map<String, Value>,
    kind: &str,
) -> Result<(String, Result<Value, String>), IpcError> {
    let id = take_id(obj, kind)?;
    let outcome = match obj.remove("error") {
        Some(Value::Null) | None => Ok(obj.remove("result").unwrap_or(Value::Null)),
        Some(Value::String(s)) => Err(s),
        Some(other) => Err(other.to_string()),
    };
    Ok((id, outcome))
}

fn response(kind: &str, id: String, outcome: Result<Value, String>) -> Value {
    match outcome {
        Ok(result) => json!({"type": kind, "id": id, "result": result}),
        Err(error) => json!({"type": kind, "id": id, "error": error}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_messages() {
        assert_eq!(Inbound::parse(json!({"type": "ready"})).unwrap(), Inbound::Ready);
        assert_eq!(
            Inbound::parse(json!({"type": "reconnecting"})).unwrap(),
            Inbound::Reconnecting
        );
    }

    #[test]
    fn eval_response_with_error_wins_over_result() {
        let msg = Inbound::parse(json!({"type": "eval", "id": "a-1", "error": "boom", "result": 1}));
        assert_eq!(
            msg.unwrap(),
            Inbound::Eval {
                id: "a-1".into(),
                outcome: Err("boom".into())
            }
        );
    }

    #[test]
    fn response_without_id_is_malformed() {
        let err = Inbound::parse(json!({"type": "fetch", "result": 3})).unwrap_err();
        assert_eq!(err.as_label(), "ipc_malformed");
        assert!(Inbound::parse(json!("ready")).is_err());
    }

    #[test]
    fn unknown_types_pass_through() {
        let raw = json!({"type": "guildCreate", "guild": 9});
        assert_eq!(Inbound::parse(raw.clone()).unwrap(), Inbound::Custom(raw));
    }

    #[test]
    fn log_level_names_are_forgiving() {
        let msg = Inbound::parse(json!({"type": "log", "level": "WARNING", "message": "slow"}));
        assert_eq!(
            msg.unwrap(),
            Inbound::Log {
                level: LogLevel::Warn,
                message: "slow".into()
            }
        );
    }

    #[test]
    fn worker_side_reads_eval_requests() {
        let wire = Outbound::Eval {
            id: "7-00ff".into(),
            script: Script::invoke("stats"),
        }
        .into_value()
        .unwrap();
        assert_eq!(wire["type"], "eval");
        assert_eq!(
            Outbound::parse(wire).unwrap(),
            Outbound::Eval {
                id: "7-00ff".into(),
                script: Script::invoke("stats")
            }
        );
    }
}
