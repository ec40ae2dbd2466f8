// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A UDP-socket-backed [OscTransport](crate::traits::OscTransport).
//!
//! Each configured local port gets its own bound `UdpSocket` and a
//! background reader thread blocking on `recv_from`; decoded messages are
//! pushed onto a single bounded channel the engine drains from on its own
//! schedule. TCP and Unix-domain transports are the spec's stated
//! Non-goals for this boundary's first cut; [Protocol::OscTcp] and
//! [Protocol::OscUnix] modules are accepted by the module tree but have no
//! concrete transport here yet.

use crate::osc::{OscInbound, OscMessage, OscOutbound, OscSource, Port, Protocol};
use crate::traits::OscTransport;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::time::Duration;

/// One bound local UDP port, readable and writable from the engine thread.
struct Bound {
    socket: UdpSocket,
    port: u16,
}

/// A multi-port UDP OSC transport: binds one socket per configured local
/// port, and dispatches outbound messages through whichever bound socket
/// matches the destination's port (falling back to the first bound socket
/// when the destination names a port this transport never bound).
pub struct UdpOscTransport {
    bound: Vec<Bound>,
    inbound_rx: Receiver<OscInbound>,
    _inbound_tx: Sender<OscInbound>,
}

impl UdpOscTransport {
    /// Binds one UDP socket per port in `ports` on `0.0.0.0`, and spawns one
    /// reader thread per socket. Returns an error if any port is already in
    /// use.
    pub fn bind(ports: &[u16]) -> anyhow::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(1024);
        let mut bound = Vec::with_capacity(ports.len());
        for &port in ports {
            let socket = UdpSocket::bind(("0.0.0.0", port))
                .map_err(|err| anyhow::anyhow!("binding OSC UDP port {port}: {err}"))?;
            let reader = socket.try_clone()?;
            let reader_tx = tx.clone();
            std::thread::Builder::new()
                .name(format!("osc-udp-{port}"))
                .spawn(move || read_loop(reader, port, reader_tx))?;
            bound.push(Bound { socket, port });
        }
        Ok(Self {
            bound,
            inbound_rx: rx,
            _inbound_tx: tx,
        })
    }

    fn socket_for_port(&self, port: u16) -> Option<&UdpSocket> {
        self.bound
            .iter()
            .find(|b| b.port == port)
            .or(self.bound.first())
            .map(|b| &b.socket)
    }
}

/// Blocks on `recv_from` forever, decoding each datagram and forwarding it.
/// Exits quietly once the channel's receive side is dropped.
fn read_loop(socket: UdpSocket, port: u16, tx: Sender<OscInbound>) {
    let mut buf = [0u8; 65536];
    loop {
        let (count, peer) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(port, %err, "osc udp recv_from failed");
                continue;
            }
        };
        let packet = match rosc::decoder::decode_udp(&buf[..count]) {
            Ok((_, packet)) => packet,
            Err(err) => {
                tracing::warn!(port, ?err, "dropping malformed OSC packet");
                continue;
            }
        };
        for message in flatten_packet(packet) {
            let inbound = OscInbound {
                message: OscMessage::from_rosc(message),
                source: OscSource {
                    protocol: Protocol::Osc,
                    port: Port::Number(port),
                    host: peer.ip().to_string(),
                    url: format!("osc.udp://{peer}"),
                },
            };
            if tx.send(inbound).is_err() {
                return;
            }
        }
    }
}

/// OSC bundles nest; this walks a packet down to its leaf messages, in
/// the order they appear, ignoring bundle timetags (this transport doesn't
/// defer message delivery against a bundle's schedule).
fn flatten_packet(packet: rosc::OscPacket) -> Vec<rosc::OscMessage> {
    match packet {
        rosc::OscPacket::Message(message) => vec![message],
        rosc::OscPacket::Bundle(bundle) => bundle
            .content
            .into_iter()
            .flat_map(flatten_packet)
            .collect(),
    }
}

impl OscTransport for UdpOscTransport {
    fn recv_timeout(&mut self, timeout: Duration) -> Option<OscInbound> {
        self.inbound_rx.recv_timeout(timeout).ok()
    }

    fn send(&mut self, message: OscOutbound) -> anyhow::Result<()> {
        let target_port = match &message.destination.port {
            Port::Number(n) => *n,
            _ => 0,
        };
        let socket = self
            .socket_for_port(target_port)
            .ok_or_else(|| anyhow::anyhow!("no bound OSC socket available to send on"))?;
        let addr = format!("{}:{}", message.destination.host, resolve_remote_port(&message.destination));
        let bytes = rosc::encoder::encode(&rosc::OscPacket::Message(message.message.to_rosc()))?;
        socket
            .send_to(&bytes, addr.as_str())
            .map(|_| ())
            .map_err(|err| anyhow::anyhow!("sending OSC to {addr}: {err}"))
    }
}

/// The destination's own port, when it's a plain port number; hosts
/// addressed by URL or socket path carry their port embedded already.
fn resolve_remote_port(destination: &OscSource) -> String {
    match &destination.port {
        Port::Number(n) => n.to_string(),
        Port::Socket(s) | Port::Url(s) => s.clone(),
    }
}

/// A passthrough, channel-backed [OscTransport] used in tests and by
/// embedders that want to drive the engine without binding a real socket.
#[derive(Default)]
pub struct NullOscTransport;
impl OscTransport for NullOscTransport {
    fn recv_timeout(&mut self, _timeout: Duration) -> Option<OscInbound> {
        None
    }
    fn send(&mut self, _message: OscOutbound) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn null_transport_never_yields_a_message() {
        let mut t = NullOscTransport;
        assert!(t.recv_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn null_transport_accepts_sends_without_error() {
        let mut t = NullOscTransport;
        let outbound = OscOutbound {
            message: OscMessage::new("/a", vec![Value::Int(1)]),
            destination: OscSource {
                protocol: Protocol::Osc,
                port: Port::Number(9000),
                host: "127.0.0.1".into(),
                url: String::new(),
            },
            enqueued_at_ns: 0,
        };
        assert!(t.send(outbound).is_ok());
    }

    #[test]
    fn real_udp_round_trip_delivers_a_decoded_message() {
        let mut server = UdpOscTransport::bind(&[0]).unwrap();
        let local_port = server.bound[0].socket.local_addr().unwrap().port();
        server.bound[0].port = local_port;

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = rosc::OscPacket::Message(rosc::OscMessage {
            addr: "/ping".into(),
            args: vec![rosc::OscType::Int(7)],
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        client.send_to(&bytes, ("127.0.0.1", local_port)).unwrap();

        let inbound = server
            .recv_timeout(Duration::from_secs(2))
            .expect("expected a decoded OSC message");
        assert_eq!(inbound.message.address, "/ping");
        assert_eq!(inbound.message.args, vec![Value::Int(7)]);
    }
}
