// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The MIDI side of the codec: a small event enum covering exactly the
//! nine rows of the OSC↔MIDI table, plus the `(type, data, dest)` metadata
//! a [MidiTransport](crate::traits::MidiTransport) attaches to each event.
//!
//! Channel/key/velocity newtypes are re-exported from `midly` rather than
//! redefined here.

use derive_more::Display as DeriveDisplay;
use serde::{Deserialize, Serialize};

pub use midly::num::{u4, u7};

/// A MIDI channel, 0-15.
#[derive(
    Clone, Copy, Debug, Default, DeriveDisplay, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct MidiChannel(pub u8);
impl MidiChannel {
    /// Smallest representable channel.
    pub const MIN_VALUE: u8 = 0;
    /// Largest representable channel (inclusive).
    pub const MAX_VALUE: u8 = 15;
}
impl From<u4> for MidiChannel {
    fn from(value: u4) -> Self {
        Self(value.as_int())
    }
}
impl From<u8> for MidiChannel {
    fn from(value: u8) -> Self {
        Self(value.min(Self::MAX_VALUE))
    }
}
impl From<MidiChannel> for u8 {
    fn from(value: MidiChannel) -> Self {
        value.0
    }
}
impl From<MidiChannel> for u4 {
    fn from(value: MidiChannel) -> Self {
        u4::from(value.0)
    }
}

/// The nine MIDI event kinds in the codec table. Everything
/// else a real MIDI stream can carry (aftertouch polynomial key pressure vs.
/// channel pressure aside) is out of scope: unknown event kinds translate to
/// `Value::Nil` at the codec boundary, never to a variant here.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MidiEventKind {
    /// `/note_on` — channel, note, velocity.
    NoteOn { channel: MidiChannel, note: u8, velocity: u8 },
    /// `/note_off` — channel, note, 0.
    NoteOff { channel: MidiChannel, note: u8 },
    /// `/control_change` — channel, controller, value.
    ControlChange { channel: MidiChannel, controller: u8, value: u8 },
    /// `/program_change` — channel, value.
    ProgramChange { channel: MidiChannel, program: u8 },
    /// `/pitch_bend` — channel, value (14-bit, centered at 8192).
    PitchBend { channel: MidiChannel, value: u16 },
    /// `/channel_pressure` — channel, value.
    ChannelPressure { channel: MidiChannel, value: u8 },
    /// `/key_pressure` — channel, note, pressure.
    KeyPressure { channel: MidiChannel, note: u8, pressure: u8 },
    /// `/sysex` — a raw byte sequence (the leading `0xF0`/trailing `0xF7` are
    /// not included; a transport that needs them re-adds them).
    SysEx(Vec<u8>),
    /// `/start` — transport start, no data.
    Start,
    /// `/continue` — transport continue, no data.
    Continue,
    /// `/stop` — transport stop, no data.
    Stop,
}

/// A MIDI event plus the destination-port metadata (`type`, `data`,
/// `dest`): which named virtual port it arrived on or should be sent to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// The event itself.
    pub kind: MidiEventKind,
    /// The named virtual MIDI port this event arrived on (inbound) or is
    /// addressed to (outbound).
    pub dest: String,
}

impl MidiEvent {
    /// Convenience constructor.
    pub fn new(kind: MidiEventKind, dest: impl Into<String>) -> Self {
        Self {
            kind,
            dest: dest.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_clamps_to_valid_range() {
        assert_eq!(MidiChannel::from(200u8).0, MidiChannel::MAX_VALUE);
    }
}
