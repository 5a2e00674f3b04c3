//! NIP-01 relay wire codec.
//!
//! Frames are encoded and decoded by the `nostr` crate's message types;
//! this module narrows them to the handful Keepsake acts on and converts
//! events into [`Record`]s.
//!
//! Labels Keepsake does not act on (`AUTH`, `COUNT`, ...) decode to
//! [`RelayMessage::Other`] so a relay speaking a newer dialect is not treated
//! as faulty. A frame that is not a labelled array, or a known label with the
//! wrong arity or types, is a [`Error::MalformedMessage`].

use std::borrow::Cow;

use nostr::message::MessageHandleError;
use nostr::{Event, Filter, JsonUtil, SubscriptionId};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::Record;

/// Labels decoded into a typed [`RelayMessage`]; anything else is `Other`.
const HANDLED_LABELS: &[&str] = &["EVENT", "EOSE", "OK", "NOTICE", "CLOSED"];

/// A frame sent from Keepsake to a relay.
#[derive(Debug, Clone, Copy)]
pub enum ClientMessage<'a> {
    /// `["REQ", <subscription_id>, <filter>...]`
    Req {
        subscription_id: &'a str,
        filters: &'a [Filter],
    },
    /// `["EVENT", <event>]`
    Event(&'a Event),
    /// `["CLOSE", <subscription_id>]`
    Close(&'a str),
}

impl ClientMessage<'_> {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        let wire = match *self {
            Self::Req {
                subscription_id,
                filters,
            } => nostr::ClientMessage::ReqMultiFilter {
                subscription_id: Cow::Owned(SubscriptionId::new(subscription_id)),
                filters: filters.to_vec(),
            },
            Self::Event(event) => nostr::ClientMessage::Event(Cow::Borrowed(event)),
            Self::Close(subscription_id) => {
                nostr::ClientMessage::close(SubscriptionId::new(subscription_id))
            }
        };
        wire.try_as_json()
            .map_err(|e| Error::Encode(e.to_string()))
    }
}

/// A frame received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription_id>, <record>]`
    Event {
        subscription_id: String,
        record: Box<Record>,
    },
    /// `["EOSE", <subscription_id>]`
    EndOfStoredEvents(String),
    /// `["OK", <record_id>, <accepted>, <reason>]`
    Ok {
        record_id: String,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// `["CLOSED", <subscription_id>, <message>]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// Any other labelled frame; carries the label.
    Other(String),
}

impl RelayMessage {
    /// Decode a JSON text frame.
    ///
    /// Event signatures are not verified; records are relayed verbatim.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| Error::MalformedMessage(format!("invalid JSON: {e}")))?;

        let Some(items) = value.as_array_mut() else {
            return Err(Error::MalformedMessage("frame is not an array".to_string()));
        };
        let label = match items.first() {
            Some(Value::String(label)) => label.clone(),
            Some(other) => {
                return Err(Error::MalformedMessage(format!(
                    "frame label is not a string: {other}"
                )));
            }
            None => return Err(Error::MalformedMessage("empty frame".to_string())),
        };

        if !HANDLED_LABELS.contains(&label.as_str()) {
            return Ok(Self::Other(label));
        }

        // Some relays omit the OK reason string.
        if label == "OK" && items.len() == 3 {
            items.push(Value::String(String::new()));
        }

        let wire = nostr::RelayMessage::from_value(value).map_err(|e| malformed(&label, e))?;
        Ok(match wire {
            nostr::RelayMessage::Event {
                subscription_id,
                event,
            } => Self::Event {
                subscription_id: subscription_id.as_str().to_owned(),
                record: Box::new(Record::from(event.into_owned())),
            },
            nostr::RelayMessage::EndOfStoredEvents(subscription_id) => {
                Self::EndOfStoredEvents(subscription_id.as_str().to_owned())
            }
            nostr::RelayMessage::Ok {
                event_id,
                status,
                message,
            } => Self::Ok {
                record_id: event_id.to_hex(),
                accepted: status,
                message: message.into_owned(),
            },
            nostr::RelayMessage::Notice(message) => Self::Notice(message.into_owned()),
            nostr::RelayMessage::Closed {
                subscription_id,
                message,
            } => Self::Closed {
                subscription_id: subscription_id.as_str().to_owned(),
                message: message.into_owned(),
            },
            _ => Self::Other(label),
        })
    }
}

fn malformed(label: &str, err: MessageHandleError) -> Error {
    Error::MalformedMessage(format!("invalid {label} frame: {err}"))
}
