//! Socket.IO v5 framing over Engine.IO v4 text packets.
//!
//! The live-update server speaks Socket.IO on the default namespace. A text
//! message is an Engine.IO packet type digit followed by its payload; message
//! packets (`4`) carry a Socket.IO packet, whose events look like
//! `42["event", data]`.

use serde_json::Value;

use super::events::Frame;
use crate::error::NotifierError;

/// Path the server mounts Socket.IO under.
pub const SOCKET_IO_PATH: &str = "/socket.io/";
/// Query selecting Engine.IO v4 over a plain websocket.
pub const WEBSOCKET_QUERY: &str = "EIO=4&transport=websocket";

/// Client request to join the default namespace.
pub const CONNECT: &str = "40";
pub const DISCONNECT: &str = "41";
pub const PONG: &str = "3";

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake, carrying the session parameters.
    Open(Value),
    /// Engine.IO close, or a Socket.IO disconnect of the namespace.
    Close,
    Ping,
    Pong,
    /// Namespace joined.
    Connected,
    ConnectError(String),
    Event(Frame),
    /// Packets this client has no use for (acks, upgrades, noop, other
    /// namespaces).
    Ignored,
}

pub fn encode_event(frame: &Frame) -> Result<String, NotifierError> {
    let body = serde_json::to_string(&(&frame.event, &frame.data))
        .map_err(|e| NotifierError::Protocol(e.to_string()))?;
    Ok(format!("42{}", body))
}

pub fn decode(text: &str) -> Result<Packet, NotifierError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| NotifierError::Protocol("empty packet".to_string()))?;
    let payload = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(parse_json(payload)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(payload),
        '5' | '6' => Ok(Packet::Ignored),
        other => Err(NotifierError::Protocol(format!(
            "unknown packet type '{}'",
            other
        ))),
    }
}

fn decode_message(payload: &str) -> Result<Packet, NotifierError> {
    let mut chars = payload.chars();
    let kind = chars
        .next()
        .ok_or_else(|| NotifierError::Protocol("empty message".to_string()))?;
    let rest = chars.as_str();

    if rest.starts_with('/') {
        return Ok(Packet::Ignored);
    }

    match kind {
        '0' => Ok(Packet::Connected),
        '1' => Ok(Packet::Close),
        '2' => decode_event(rest),
        '4' => {
            let message = parse_json(rest)
                .ok()
                .and_then(|data| data.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "connection refused".to_string());
            Ok(Packet::ConnectError(message))
        }
        '3' | '5' | '6' => Ok(Packet::Ignored),
        other => Err(NotifierError::Protocol(format!(
            "unknown message type '{}'",
            other
        ))),
    }
}

fn decode_event(rest: &str) -> Result<Packet, NotifierError> {
    // An ack id may sit between the type and the array.
    let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let mut items = match parse_json(body)? {
        Value::Array(items) => items.into_iter(),
        _ => return Err(NotifierError::Protocol("event is not an array".to_string())),
    };

    let event = match items.next() {
        Some(Value::String(event)) => event,
        _ => return Err(NotifierError::Protocol("event without a name".to_string())),
    };
    let data = items.next().unwrap_or(Value::Null);

    Ok(Packet::Event(Frame::new(event, data)))
}

fn parse_json(text: &str) -> Result<Value, NotifierError> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| NotifierError::Protocol(e.to_string()))
}
