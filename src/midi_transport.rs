// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A `midir`-backed [MidiTransport](crate::traits::MidiTransport): one named
//! virtual input and output port per configured module, hand-rolled MIDI
//! byte encode/decode for exactly the nine [MidiEventKind] rows, and a
//! send-then-drain queue so [MidiTransport::send] never blocks the caller
//! on a slow port.

use crate::midi::{MidiChannel, MidiEvent, MidiEventKind};
use crate::traits::MidiTransport;
use crossbeam_channel::{Receiver, Sender};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::collections::HashMap;
use std::time::Duration;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const KEY_PRESSURE: u8 = 0xA0;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const PITCH_BEND: u8 = 0xE0;
const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;
const START: u8 = 0xFA;
const CONTINUE: u8 = 0xFB;
const STOP: u8 = 0xFC;

/// Encodes one event into the raw bytes a MIDI port expects, dropping the
/// destination port name (the caller already used it to pick the output
/// connection to write to).
pub fn encode(kind: &MidiEventKind) -> Vec<u8> {
    match kind {
        MidiEventKind::NoteOn { channel, note, velocity } => {
            vec![NOTE_ON | channel.0 & 0x0F, *note, *velocity]
        }
        MidiEventKind::NoteOff { channel, note } => {
            vec![NOTE_OFF | channel.0 & 0x0F, *note, 0]
        }
        MidiEventKind::ControlChange { channel, controller, value } => {
            vec![CONTROL_CHANGE | channel.0 & 0x0F, *controller, *value]
        }
        MidiEventKind::ProgramChange { channel, program } => {
            vec![PROGRAM_CHANGE | channel.0 & 0x0F, *program]
        }
        MidiEventKind::PitchBend { channel, value } => {
            let value = (*value).min(0x3FFF);
            vec![
                PITCH_BEND | channel.0 & 0x0F,
                (value & 0x7F) as u8,
                (value >> 7) as u8,
            ]
        }
        MidiEventKind::ChannelPressure { channel, value } => {
            vec![CHANNEL_PRESSURE | channel.0 & 0x0F, *value]
        }
        MidiEventKind::KeyPressure { channel, note, pressure } => {
            vec![KEY_PRESSURE | channel.0 & 0x0F, *note, *pressure]
        }
        MidiEventKind::SysEx(data) => {
            let mut bytes = Vec::with_capacity(data.len() + 2);
            bytes.push(SYSEX_START);
            bytes.extend_from_slice(data);
            bytes.push(SYSEX_END);
            bytes
        }
        MidiEventKind::Start => vec![START],
        MidiEventKind::Continue => vec![CONTINUE],
        MidiEventKind::Stop => vec![STOP],
    }
}

/// Decodes raw MIDI bytes into one of the nine recognized kinds. Anything
/// else (aftertouch variants aside, clock, active sensing, running status)
/// returns `None`; the caller treats an unrecognized message as absent
/// rather than translating it to `Value::Nil` itself — that coercion
/// happens one layer up, at the codec.
pub fn decode(bytes: &[u8]) -> Option<MidiEventKind> {
    let status = *bytes.first()?;
    if status == SYSEX_START {
        let end = bytes.iter().position(|&b| b == SYSEX_END).unwrap_or(bytes.len());
        return Some(MidiEventKind::SysEx(bytes[1..end].to_vec()));
    }
    if status == START {
        return Some(MidiEventKind::Start);
    }
    if status == CONTINUE {
        return Some(MidiEventKind::Continue);
    }
    if status == STOP {
        return Some(MidiEventKind::Stop);
    }
    let channel = MidiChannel::from(status & 0x0F);
    match status & 0xF0 {
        NOTE_ON => {
            let note = *bytes.get(1)?;
            let velocity = *bytes.get(2)?;
            if velocity == 0 {
                Some(MidiEventKind::NoteOff { channel, note })
            } else {
                Some(MidiEventKind::NoteOn { channel, note, velocity })
            }
        }
        NOTE_OFF => Some(MidiEventKind::NoteOff { channel, note: *bytes.get(1)? }),
        CONTROL_CHANGE => Some(MidiEventKind::ControlChange {
            channel,
            controller: *bytes.get(1)?,
            value: *bytes.get(2)?,
        }),
        PROGRAM_CHANGE => Some(MidiEventKind::ProgramChange { channel, program: *bytes.get(1)? }),
        PITCH_BEND => {
            let lsb = *bytes.get(1)? as u16;
            let msb = *bytes.get(2)? as u16;
            Some(MidiEventKind::PitchBend { channel, value: (msb << 7) | lsb })
        }
        CHANNEL_PRESSURE => Some(MidiEventKind::ChannelPressure { channel, value: *bytes.get(1)? }),
        KEY_PRESSURE => Some(MidiEventKind::KeyPressure {
            channel,
            note: *bytes.get(1)?,
            pressure: *bytes.get(2)?,
        }),
        _ => None,
    }
}

/// A `midir`-backed transport: one virtual input/output port pair per name
/// passed to [MidirTransport::open]. Connections must outlive the
/// transport, so they're kept in `_inputs`/`outputs` even though the input
/// side is never read directly (its callback feeds `inbound_tx`).
pub struct MidirTransport {
    _inputs: Vec<MidiInputConnection<()>>,
    outputs: HashMap<String, MidiOutputConnection>,
    inbound_rx: Receiver<MidiEvent>,
    pending: Vec<MidiEvent>,
}

impl MidirTransport {
    /// Opens a virtual input and output port named `port` for each entry in
    /// `port_names`. On Linux/macOS this creates a port other applications
    /// can connect to directly; `midir`'s virtual-port support does not
    /// extend to Windows, where callers should instead connect to an
    /// existing named port (out of scope here).
    pub fn open(client_name: &str, port_names: &[String]) -> anyhow::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(1024);
        let mut inputs = Vec::with_capacity(port_names.len());
        let mut outputs = HashMap::with_capacity(port_names.len());
        for name in port_names {
            let input = MidiInput::new(&format!("{client_name}-in-{name}"))?;
            let dest = name.clone();
            let port_tx = tx.clone();
            let connection = input
                .create_virtual(name, move |_timestamp, bytes, _| {
                    if let Some(kind) = decode(bytes) {
                        let _ = port_tx.send(MidiEvent::new(kind, dest.clone()));
                    }
                }, ())
                .map_err(|err| anyhow::anyhow!("opening MIDI input port {name}: {err}"))?;
            inputs.push(connection);

            let output = MidiOutput::new(&format!("{client_name}-out-{name}"))?;
            let connection = output
                .create_virtual(name)
                .map_err(|err| anyhow::anyhow!("opening MIDI output port {name}: {err}"))?;
            outputs.insert(name.clone(), connection);
        }
        Ok(Self {
            _inputs: inputs,
            outputs,
            inbound_rx: rx,
            pending: Vec::new(),
        })
    }
}

impl MidiTransport for MidirTransport {
    fn recv_timeout(&mut self, timeout: Duration) -> Option<MidiEvent> {
        self.inbound_rx.recv_timeout(timeout).ok()
    }

    fn send(&mut self, event: MidiEvent) -> anyhow::Result<()> {
        if self.pending.len() >= self.pending.capacity().max(1024) {
            anyhow::bail!("midi outbound buffer full, dropping event for {}", event.dest);
        }
        self.pending.push(event);
        Ok(())
    }

    fn drain(&mut self) -> anyhow::Result<()> {
        for event in self.pending.drain(..) {
            let Some(connection) = self.outputs.get_mut(&event.dest) else {
                tracing::warn!(port = %event.dest, "dropping MIDI event for unknown output port");
                continue;
            };
            let bytes = encode(&event.kind);
            connection
                .send(&bytes)
                .map_err(|err| anyhow::anyhow!("sending MIDI to {}: {err}", event.dest))?;
        }
        Ok(())
    }
}

/// A passthrough [MidiTransport] that never connects to any real device,
/// used in tests and by embedders running OSC-only configurations.
#[derive(Default)]
pub struct NullMidiTransport;
impl MidiTransport for NullMidiTransport {
    fn recv_timeout(&mut self, _timeout: Duration) -> Option<MidiEvent> {
        None
    }
    fn send(&mut self, _event: MidiEvent) -> anyhow::Result<()> {
        Ok(())
    }
    fn drain(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_with_zero_velocity_decodes_as_note_off() {
        let bytes = [NOTE_ON, 60, 0];
        assert_eq!(
            decode(&bytes),
            Some(MidiEventKind::NoteOff { channel: MidiChannel(0), note: 60 })
        );
    }

    #[test]
    fn pitch_bend_round_trips_through_encode_and_decode() {
        let kind = MidiEventKind::PitchBend { channel: MidiChannel(3), value: 10000 };
        let bytes = encode(&kind);
        assert_eq!(decode(&bytes), Some(kind));
    }

    #[test]
    fn sysex_round_trips_its_payload() {
        let kind = MidiEventKind::SysEx(vec![1, 2, 3]);
        let bytes = encode(&kind);
        assert_eq!(decode(&bytes), Some(kind));
    }

    #[test]
    fn transport_events_round_trip_through_start_continue_stop() {
        for kind in [MidiEventKind::Start, MidiEventKind::Continue, MidiEventKind::Stop] {
            let bytes = encode(&kind);
            assert_eq!(decode(&bytes), Some(kind));
        }
    }

    #[test]
    fn unknown_status_byte_decodes_to_none() {
        assert_eq!(decode(&[0xF8]), None);
    }

    #[test]
    fn null_transport_accepts_sends_and_drains_without_error() {
        let mut t = NullMidiTransport;
        assert!(t
            .send(MidiEvent::new(MidiEventKind::Start, "out".into()))
            .is_ok());
        assert!(t.drain().is_ok());
        assert!(t.recv_timeout(Duration::from_millis(1)).is_none());
    }
}
