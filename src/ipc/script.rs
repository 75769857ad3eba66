//! # Remote evaluation payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a worker is asked to evaluate.
///
/// A `Snippet` is sent as a bare JSON string. An `Invoke` names a function the
/// worker runs with its own client bound as `self`, and is sent as
/// `{"function": .., "args": [..]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Script {
    /// Literal source snippet.
    Snippet(String),
    /// Named function executed inside the worker's context.
    Invoke {
        /// Function name as known by the worker.
        function: String,
        /// Positional arguments passed after the bound client.
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Script {
    /// Literal snippet.
    pub fn snippet(src: impl Into<String>) -> Self {
        Script::Snippet(src.into())
    }

    /// Function invocation with no arguments.
    pub fn invoke(function: impl Into<String>) -> Self {
        Script::Invoke {
            function: function.into(),
            args: Vec::new(),
        }
    }

    /// Function invocation with arguments.
    pub fn invoke_with(function: impl Into<String>, args: Vec<Value>) -> Self {
        Script::Invoke {
            function: function.into(),
            args,
        }
    }
}

impl From<&str> for Script {
    fn from(src: &str) -> Self {
        Script::Snippet(src.to_owned())
    }
}

impl From<String> for Script {
    fn from(src: String) -> Self {
        Script::Snippet(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snippet_is_a_plain_string() {
        let v = serde_json::to_value(Script::from("this.guilds.size")).unwrap();
        assert_eq!(v, json!("this.guilds.size"));
    }

    #[test]
    fn invoke_is_an_object() {
        let v = serde_json::to_value(Script::invoke_with("lookup", vec![json!(42)])).unwrap();
        assert_eq!(v, json!({"function": "lookup", "args": [42]}));

        let back: Script = serde_json::from_value(json!({"function": "stats"})).unwrap();
        assert_eq!(back, Script::invoke("stats"));
    }
}
