// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! OSC-side wire types: module protocol/port addressing and the
//! `(address, args, src)` inbound/outbound envelopes an
//! [OscTransport](crate::traits::OscTransport) exchanges with the core.
//!
//! Message values use `rosc::OscType` at the transport boundary and
//! [crate::value::Value] everywhere inside the core; [Value::to_osc_type]
//! and [Value::from_osc_type] convert a single argument between the two,
//! and [OscMessage::to_rosc]/[OscMessage::from_rosc] lift that over a whole
//! message.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A module's transport protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Protocol {
    /// UDP OSC.
    Osc,
    /// TCP OSC.
    OscTcp,
    /// Unix-domain-socket OSC.
    OscUnix,
    /// MIDI, routed through a named virtual port rather than a network
    /// address.
    Midi,
    /// No transport: the module is purely internal (no outbound port).
    Nil,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Osc => "osc",
            Protocol::OscTcp => "osc.tcp",
            Protocol::OscUnix => "osc.unix",
            Protocol::Midi => "midi",
            Protocol::Nil => "nil",
        })
    }
}

/// A module's port, inherited from its parent if unset at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Port {
    /// A UDP or TCP port number.
    Number(u16),
    /// A Unix-domain-socket path.
    Socket(String),
    /// A host URL, used for non-local senders that don't match a registered
    /// module.
    Url(String),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Number(n) => write!(f, "{n}"),
            Port::Socket(s) => write!(f, "{s}"),
            Port::Url(u) => write!(f, "{u}"),
        }
    }
}

/// Where an inbound OSC message came from, or where an outbound one is
/// headed: enough to key the `(protocol, port)` module-resolution table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscSource {
    /// Which transport carried this message.
    pub protocol: Protocol,
    /// The local port/socket/URL the message was received on or is destined
    /// for.
    pub port: Port,
    /// The remote peer's host, if known (empty for Unix sockets).
    pub host: String,
    /// The remote peer's full URL, used as a fallback logical port for
    /// unregistered senders.
    pub url: String,
}

/// A decoded OSC message: address plus a homogeneous value/typetag sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscMessage {
    /// The OSC address pattern, e.g. `/engine/module/param`.
    pub address: String,
    /// The message's arguments, already coerced into [Value]s.
    pub args: Vec<Value>,
}

impl OscMessage {
    /// Builds a message from an address and values.
    pub fn new(address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Splits `/a/b/c` into `["a", "b", "c"]`, used to walk the module tree.
    pub fn path_segments(&self) -> Vec<&str> {
        self.address
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Converts to the wire type an [OscTransport](crate::traits::OscTransport)
    /// implementation actually sends.
    pub fn to_rosc(&self) -> rosc::OscMessage {
        rosc::OscMessage {
            addr: self.address.clone(),
            args: self.args.iter().map(Value::to_osc_type).collect(),
        }
    }

    /// Converts from the wire type an [OscTransport](crate::traits::OscTransport)
    /// implementation actually receives.
    pub fn from_rosc(message: rosc::OscMessage) -> Self {
        Self {
            address: message.addr,
            args: message.args.into_iter().map(Value::from_osc_type).collect(),
        }
    }
}

/// An OSC message paired with where it arrived, as handed to the engine by
/// an [OscTransport](crate::traits::OscTransport).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscInbound {
    /// The decoded message.
    pub message: OscMessage,
    /// Its source.
    pub source: OscSource,
}

/// An OSC message paired with where it should be sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscOutbound {
    /// The message to send.
    pub message: OscMessage,
    /// Its destination.
    pub destination: OscSource,
    /// Monotonic enqueue timestamp (ns), used to flush the outbound queue
    /// in enqueue order.
    pub enqueued_at_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_ignore_leading_slash() {
        let m = OscMessage::new("/engine/mod/vol", vec![]);
        assert_eq!(m.path_segments(), vec!["engine", "mod", "vol"]);
    }

    #[test]
    fn rosc_round_trip_preserves_address_and_args() {
        let m = OscMessage::new(
            "/mod/vol",
            vec![Value::Double(0.5), Value::String("hi".into())],
        );
        let back = OscMessage::from_rosc(m.to_rosc());
        assert_eq!(back, m);
    }
}
