//! Typed message envelopes.
//!
//! A [`Message`] wraps one unit of payload: a JSON value or a piece of TTL
//! text. It is built either from wire text (as read by a consumer) or from
//! an in-memory value (as produced by stage code). Wire text is decoded
//! lazily on the first [`Message::content`] call; the result, including a
//! failure, is cached and never recomputed.

use crate::error::DecodeError;
use serde_json::Value;
use std::cell::OnceCell;
use std::fmt;

/// Field used to mark JSON messages that skipped part of the dataflow.
pub const INCOMPLETE_KEY: &str = "_incomplete";

/// Wire format of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Json,
    Ttl,
}

impl MessageType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Ttl => "TTL",
        }
    }

    /// File extension (with the leading dot) of files holding this type.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => ".json",
            Self::Ttl => ".ttl",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// TTL is carried as text; no structural decoding is done.
    Ttl(String),
}

impl Payload {
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Json(_) => MessageType::Json,
            Self::Ttl(_) => MessageType::Ttl,
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Ttl(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Ttl(s) => Some(s),
            Self::Json(_) => None,
        }
    }

    fn encode(&self) -> String {
        match self {
            Self::Json(v) => v.to_string(),
            Self::Ttl(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    /// Built from wire text; decoded on first access.
    Wire {
        text: String,
        decoded: OnceCell<Result<Payload, DecodeError>>,
    },
    /// Built from (or rewritten to) an in-memory value.
    Value(Payload),
}

/// One unit of data moving through a stage.
#[derive(Debug, Clone)]
pub struct Message {
    msg_type: MessageType,
    state: State,
    incomplete: bool,
}

impl Message {
    /// Wrap raw wire text. Decoding is deferred to [`Message::content`],
    /// so malformed text does not fail here.
    pub fn from_wire(msg_type: MessageType, text: impl Into<String>) -> Self {
        Self {
            msg_type,
            state: State::Wire {
                text: text.into(),
                decoded: OnceCell::new(),
            },
            incomplete: false,
        }
    }

    /// Wrap an already decoded payload.
    #[must_use]
    pub fn from_payload(payload: Payload) -> Self {
        Self {
            msg_type: payload.message_type(),
            state: State::Value(payload),
            incomplete: false,
        }
    }

    #[must_use]
    pub fn json(value: Value) -> Self {
        Self::from_payload(Payload::Json(value))
    }

    pub fn ttl(text: impl Into<String>) -> Self {
        Self::from_payload(Payload::Ttl(text.into()))
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    /// Decoded content.
    ///
    /// # Errors
    ///
    /// Returns the (cached) [`DecodeError`] if the wire text is not valid
    /// for the message type.
    pub fn content(&self) -> Result<&Payload, DecodeError> {
        match &self.state {
            State::Value(payload) => Ok(payload),
            State::Wire { text, decoded } => decoded
                .get_or_init(|| decode(self.msg_type, text))
                .as_ref()
                .map_err(Clone::clone),
        }
    }

    /// Decoded JSON content.
    ///
    /// # Errors
    ///
    /// Fails if the message does not decode, or is not a JSON message.
    pub fn as_json(&self) -> Result<&Value, DecodeError> {
        self.content()?.as_json().ok_or_else(|| {
            DecodeError::new(self.msg_type, "message is not a JSON message")
        })
    }

    /// TTL text content.
    ///
    /// # Errors
    ///
    /// Fails if the message is not a TTL message.
    pub fn as_text(&self) -> Result<&str, DecodeError> {
        self.content()?
            .as_text()
            .ok_or_else(|| DecodeError::new(self.msg_type, "message is not a TTL message"))
    }

    /// Consume the message and return its decoded content.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the wire text is invalid.
    pub fn into_content(self) -> Result<Payload, DecodeError> {
        match self.state {
            State::Value(payload) => Ok(payload),
            State::Wire { text, decoded } => match decoded.into_inner() {
                Some(result) => result,
                None => decode(self.msg_type, &text),
            },
        }
    }

    /// Wire text of the message.
    ///
    /// Messages read from the wire are passed through verbatim; messages
    /// holding a value are serialized (compact JSON, or TTL text as is).
    #[must_use]
    pub fn encode(&self) -> String {
        match &self.state {
            State::Wire { text, .. } => text.clone(),
            State::Value(payload) => payload.encode(),
        }
    }

    /// Mark the message as incomplete and return the previous marker.
    ///
    /// JSON messages carry the marker in the `_incomplete` field, which
    /// requires the content to be a JSON object.
    ///
    /// # Errors
    ///
    /// Fails if the content cannot be decoded or is not a JSON object.
    pub fn mark_incomplete(&mut self) -> Result<bool, DecodeError> {
        let previous = self.is_incomplete();
        if self.msg_type == MessageType::Json {
            let mut value = self.as_json()?.clone();
            let Some(object) = value.as_object_mut() else {
                return Err(DecodeError::new(
                    self.msg_type,
                    "incomplete marker requires a JSON object",
                ));
            };
            object.insert(INCOMPLETE_KEY.to_string(), Value::Bool(true));
            self.state = State::Value(Payload::Json(value));
        }
        self.incomplete = true;
        Ok(previous)
    }

    /// Whether the message was marked incomplete here or upstream.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
            || self
                .as_json()
                .ok()
                .and_then(|v| v.get(INCOMPLETE_KEY))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

fn decode(msg_type: MessageType, text: &str) -> Result<Payload, DecodeError> {
    match msg_type {
        MessageType::Json => serde_json::from_str(text)
            .map(Payload::Json)
            .map_err(|e| DecodeError::new(msg_type, e.to_string())),
        MessageType::Ttl => Ok(Payload::Ttl(text.to_string())),
    }
}
