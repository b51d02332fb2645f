//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Inbound command and outbound message models for the control channel."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use gr_telemetry::Payload;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
    #[error("unable to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key/value pairs from one inbound text frame, in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundCommand {
    pairs: IndexMap<String, String>,
}

impl InboundCommand {
    /// Parse a JSON object, coercing every value to a string.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let object: IndexMap<String, Value> = serde_json::from_str(text)
            .map_err(|err| FrameError::Malformed(err.to_string()))?;
        let pairs = object
            .into_iter()
            .map(|(key, value)| (key, coerce(value)))
            .collect();
        Ok(Self { pairs })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

}

fn coerce(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ordered reply or telemetry payload, encoded as one text frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    entries: IndexMap<String, Value>,
}

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`; a repeated key keeps its first position and takes the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the largest entries until the frame encodes within `limit`.
    /// Surviving values are never shortened. Returns the dropped keys.
    pub fn fit_within(&mut self, limit: usize) -> Vec<String> {
        let mut dropped = Vec::new();
        while !self.entries.is_empty() {
            if !matches!(self.encode(limit), Err(FrameError::TooLarge { .. })) {
                break;
            }
            let largest = self
                .entries
                .iter()
                .enumerate()
                .max_by_key(|(_, (key, value))| key.len() + value.to_string().len())
                .map(|(index, _)| index);
            match largest.and_then(|index| self.entries.shift_remove_index(index)) {
                Some((key, _)) => dropped.push(key),
                None => break,
            }
        }
        dropped
    }

    /// Serialise to compact JSON, refusing anything longer than `limit` bytes.
    pub fn encode(&self, limit: usize) -> Result<String, FrameError> {
        let text = serde_json::to_string(&self.entries)?;
        if text.len() > limit {
            return Err(FrameError::TooLarge {
                len: text.len(),
                limit,
            });
        }
        Ok(text)
    }
}

impl From<Payload> for OutboundMessage {
    fn from(entries: Payload) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_key_order_and_coerces() {
        let command =
            InboundCommand::parse(r#"{"zeta":"1","alpha":2,"flag":true,"none":null,"list":[1,"a"]}"#)
                .unwrap();
        let pairs: Vec<_> = command.iter().collect();
        assert_eq!(
            pairs,
            [
                ("zeta", "1"),
                ("alpha", "2"),
                ("flag", "true"),
                ("none", ""),
                ("list", "[1,\"a\"]"),
            ]
        );
    }

    #[test]
    fn non_objects_are_malformed() {
        for text in ["", "not json", "[1,2]", "\"ready\"", "{\"a\":"] {
            assert!(
                matches!(InboundCommand::parse(text), Err(FrameError::Malformed(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn encode_enforces_limit() {
        let mut message = OutboundMessage::new();
        message.insert("listFiles", "/a,".repeat(40));
        assert!(message.encode(4096).is_ok());
        match message.encode(64) {
            Err(FrameError::TooLarge { len, limit }) => {
                assert_eq!(limit, 64);
                assert!(len > 64);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fit_within_drops_only_the_oversized_entries() {
        let mut message = OutboundMessage::new();
        message.insert("fileDeleted", "a.txt");
        message.insert("echo", "e".repeat(300));
        message.insert("server", "ready");

        assert_eq!(message.fit_within(128), ["echo".to_owned()]);
        assert_eq!(
            message.encode(128).unwrap(),
            r#"{"fileDeleted":"a.txt","server":"ready"}"#
        );
        assert!(message.fit_within(128).is_empty());
    }

    #[test]
    fn encode_preserves_insertion_order() {
        let mut message = OutboundMessage::new();
        message.insert("version", "3.0.7");
        message.insert("mode", "base");
        message.insert("units", "meters");
        assert_eq!(
            message.encode(256).unwrap(),
            r#"{"version":"3.0.7","mode":"base","units":"meters"}"#
        );
    }
}
