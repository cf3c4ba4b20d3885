//! Envelope codec: domain event ⇄ transport message.
//!
//! A [`TransportEnvelope`] is the broker-facing shape of a [`DomainEvent`]:
//!
//! - `key`: the event's business key (partitioning)
//! - `headers["eventKey"]`: the event kind's wire tag
//! - `body`: a JSON object with `eventID`, `createdAt` and the payload fields
//!
//! Both directions are pure; no I/O happens here.
//!
//! # Decode failures
//!
//! Every [`DecodeError`] is terminal for the message it came from. A
//! structurally invalid message can never succeed on retry, so callers log it
//! and treat the message as handled.

use crate::event::{DomainEvent, EventKind, EventPayload};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Header carrying the event kind's wire tag.
pub const EVENT_KEY_HEADER: &str = "eventKey";

/// Header carrying the rendered failure on dead-lettered messages.
pub const ERROR_HEADER: &str = "error";

const EVENT_ID_FIELD: &str = "eventID";
const CREATED_AT_FIELD: &str = "createdAt";

/// Transport-level wrapper around a serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportEnvelope {
    /// Message key (business key of the event)
    pub key: String,
    /// Message headers
    pub headers: BTreeMap<String, String>,
    /// UTF-8 JSON body
    pub body: Vec<u8>,
}

impl TransportEnvelope {
    /// The `eventKey` header, if present.
    #[must_use]
    pub fn event_key(&self) -> Option<&str> {
        self.headers.get(EVENT_KEY_HEADER).map(String::as_str)
    }
}

/// Reasons a transport message could not be turned into a [`DomainEvent`].
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The `eventKey` header is absent.
    #[error("Message has no '{EVENT_KEY_HEADER}' header")]
    MissingTypeHeader,

    /// The `eventKey` header names no known event kind.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The body is absent or empty.
    #[error("Message body is empty")]
    EmptyBody,

    /// The body is not valid JSON.
    #[error("Message body is not valid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// The body is JSON but not a well-formed event of the announced kind.
    #[error("Message body does not match event shape of {kind}: {reason}")]
    InvalidShape {
        /// Kind announced by the `eventKey` header
        kind: EventKind,
        /// What was wrong with the body
        reason: String,
    },
}

impl DecodeError {
    /// Short label for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingTypeHeader => "missing_type_header",
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::EmptyBody => "empty_body",
            Self::MalformedJson(_) => "malformed_json",
            Self::InvalidShape { .. } => "invalid_shape",
        }
    }
}

/// Failure to serialize an event into an envelope.
#[derive(Error, Debug)]
#[error("Failed to serialize event {kind}: {source}")]
pub struct EncodeError {
    /// Kind of the event that failed
    pub kind: EventKind,
    /// Underlying serializer error
    #[source]
    pub source: serde_json::Error,
}

/// Encode a domain event into a transport envelope.
///
/// # Errors
///
/// Returns [`EncodeError`] if the payload cannot be serialized, or does not
/// serialize to a JSON object.
pub fn encode(event: &DomainEvent) -> Result<TransportEnvelope, EncodeError> {
    let kind = event.kind();
    let wrap = |source| EncodeError { kind, source };

    let mut body = match event.payload().to_json().map_err(wrap)? {
        Value::Object(fields) => fields,
        other => {
            return Err(wrap(serde::ser::Error::custom(format!(
                "payload serialized to non-object JSON: {other}"
            ))));
        },
    };
    body.insert(
        EVENT_ID_FIELD.to_string(),
        Value::String(event.event_id().to_string()),
    );
    body.insert(
        CREATED_AT_FIELD.to_string(),
        serde_json::to_value(event.created_at()).map_err(wrap)?,
    );

    let body = serde_json::to_vec(&Value::Object(body)).map_err(wrap)?;

    let mut headers = BTreeMap::new();
    headers.insert(EVENT_KEY_HEADER.to_string(), kind.tag().to_string());

    Ok(TransportEnvelope {
        key: event.routing_key(),
        headers,
        body,
    })
}

/// Decode a transport envelope back into a domain event.
///
/// Checks happen in order: type header, known kind, non-empty body, JSON
/// syntax, then shape.
///
/// # Errors
///
/// Returns the first [`DecodeError`] encountered.
pub fn decode(envelope: &TransportEnvelope) -> Result<DomainEvent, DecodeError> {
    let tag = envelope.event_key().ok_or(DecodeError::MissingTypeHeader)?;
    let kind =
        EventKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownEventType(tag.to_string()))?;

    if envelope.body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyBody);
    }

    let value: Value = serde_json::from_slice(&envelope.body).map_err(DecodeError::MalformedJson)?;
    let shape_error = |reason: String| DecodeError::InvalidShape { kind, reason };

    let mut fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return Err(shape_error("body is null".to_string())),
        Value::Array(_) => return Err(shape_error("body is an array".to_string())),
        other => return Err(shape_error(format!("body is not an object: {other}"))),
    };

    let event_id = take_field::<Uuid>(&mut fields, EVENT_ID_FIELD).map_err(shape_error)?;
    let created_at =
        take_field::<DateTime<Utc>>(&mut fields, CREATED_AT_FIELD).map_err(shape_error)?;
    let payload = EventPayload::from_json(kind, Value::Object(fields))
        .map_err(|e| shape_error(e.to_string()))?;

    Ok(DomainEvent::from_parts(event_id, created_at, payload))
}

fn take_field<T: serde::de::DeserializeOwned>(
    fields: &mut Map<String, Value>,
    name: &str,
) -> Result<T, String> {
    let value = fields
        .remove(name)
        .ok_or_else(|| format!("missing field `{name}`"))?;
    serde_json::from_value(value).map_err(|e| format!("invalid field `{name}`: {e}"))
}
