// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Structural translation between OSC addresses and MIDI events, a
//! one-to-one table over nine rows: `note_on`, `note_off`,
//! `control_change`, `program_change`, `pitch_bend`, `channel_pressure`,
//! `key_pressure`, `sysex`, and the `start`/`continue`/`stop` transport
//! triplet.

use crate::midi::{MidiChannel, MidiEventKind};
use crate::osc::OscMessage;
use crate::value::Value;

/// Converts an incoming MIDI event kind into its OSC equivalent. Unknown
/// kinds have no representation in this table, but `MidiEventKind` is
/// already closed over exactly the nine rows, so this never returns `None`
/// in practice; it's `Option` to mirror `midi_to_osc`'s Python counterpart,
/// which returns `None` for event types outside the table.
pub fn midi_to_osc(event: &MidiEventKind) -> Option<OscMessage> {
    let (address, args): (&str, Vec<Value>) = match *event {
        MidiEventKind::NoteOn { channel, note, velocity } => (
            "/note_on",
            vec![int(channel), Value::Int(note as i32), Value::Int(velocity as i32)],
        ),
        MidiEventKind::NoteOff { channel, note } => (
            "/note_off",
            vec![int(channel), Value::Int(note as i32), Value::Int(0)],
        ),
        MidiEventKind::ControlChange { channel, controller, value } => (
            "/control_change",
            vec![int(channel), Value::Int(controller as i32), Value::Int(value as i32)],
        ),
        MidiEventKind::ProgramChange { channel, program } => (
            "/program_change",
            vec![int(channel), Value::Int(program as i32)],
        ),
        MidiEventKind::PitchBend { channel, value } => (
            "/pitch_bend",
            vec![int(channel), Value::Int(value as i32)],
        ),
        MidiEventKind::ChannelPressure { channel, value } => (
            "/channel_pressure",
            vec![int(channel), Value::Int(value as i32)],
        ),
        MidiEventKind::KeyPressure { channel, note, pressure } => (
            "/key_pressure",
            vec![int(channel), Value::Int(note as i32), Value::Int(pressure as i32)],
        ),
        MidiEventKind::SysEx(ref bytes) => {
            return Some(OscMessage::new(
                "/sysex",
                bytes.iter().map(|b| Value::Int(*b as i32)).collect(),
            ))
        }
        MidiEventKind::Start => ("/start", vec![]),
        MidiEventKind::Continue => ("/continue", vec![]),
        MidiEventKind::Stop => ("/stop", vec![]),
    };
    Some(OscMessage::new(address, args))
}

/// Converts an incoming OSC message into its MIDI equivalent. Returns `None`
/// for addresses outside the table or argument lists that don't coerce
/// cleanly to integers.
pub fn osc_to_midi(message: &OscMessage) -> Option<MidiEventKind> {
    let ints: Option<Vec<i64>> = message.args.iter().map(as_int).collect();

    match message.address.as_str() {
        "/note_on" => {
            let ints = ints?;
            let [channel, note, velocity] = three(&ints)?;
            Some(MidiEventKind::NoteOn {
                channel: MidiChannel::from(channel as u8),
                note: note as u8,
                velocity: velocity as u8,
            })
        }
        "/note_off" => {
            let ints = ints?;
            let [channel, note, _zero] = three(&ints)?;
            Some(MidiEventKind::NoteOff {
                channel: MidiChannel::from(channel as u8),
                note: note as u8,
            })
        }
        "/control_change" => {
            let ints = ints?;
            let [channel, controller, value] = three(&ints)?;
            Some(MidiEventKind::ControlChange {
                channel: MidiChannel::from(channel as u8),
                controller: controller as u8,
                value: value as u8,
            })
        }
        "/program_change" => {
            let ints = ints?;
            let [channel, program] = two(&ints)?;
            Some(MidiEventKind::ProgramChange {
                channel: MidiChannel::from(channel as u8),
                program: program as u8,
            })
        }
        "/pitch_bend" => {
            let ints = ints?;
            let [channel, value] = two(&ints)?;
            Some(MidiEventKind::PitchBend {
                channel: MidiChannel::from(channel as u8),
                value: value as u16,
            })
        }
        "/channel_pressure" => {
            let ints = ints?;
            let [channel, value] = two(&ints)?;
            Some(MidiEventKind::ChannelPressure {
                channel: MidiChannel::from(channel as u8),
                value: value as u8,
            })
        }
        "/key_pressure" => {
            let ints = ints?;
            let [channel, note, pressure] = three(&ints)?;
            Some(MidiEventKind::KeyPressure {
                channel: MidiChannel::from(channel as u8),
                note: note as u8,
                pressure: pressure as u8,
            })
        }
        "/sysex" => Some(MidiEventKind::SysEx(
            ints?.into_iter().map(|v| v as u8).collect(),
        )),
        "/start" => Some(MidiEventKind::Start),
        "/continue" => Some(MidiEventKind::Continue),
        "/stop" => Some(MidiEventKind::Stop),
        _ => None,
    }
}

fn int(channel: MidiChannel) -> Value {
    Value::Int(channel.0 as i32)
}

/// Coerces a loosely-typed OSC argument to an integer.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v as i64),
        Value::Long(v) => Some(*v),
        Value::Float(v) => Some(v.round() as i64),
        Value::Double(v) => Some(v.round() as i64),
        Value::True => Some(1),
        Value::False => Some(0),
        _ => None,
    }
}

fn two(values: &[i64]) -> Option<[i64; 2]> {
    match values {
        [a, b] => Some([*a, *b]),
        _ => None,
    }
}

fn three(values: &[i64]) -> Option<[i64; 3]> {
    match values {
        [a, b, c] => Some([*a, *b, *c]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_round_trips() {
        let kind = MidiEventKind::NoteOn {
            channel: MidiChannel(3),
            note: 60,
            velocity: 100,
        };
        let osc = midi_to_osc(&kind).unwrap();
        assert_eq!(osc.address, "/note_on");
        let back = osc_to_midi(&osc).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn note_off_velocity_is_forced_zero_on_the_wire() {
        let kind = MidiEventKind::NoteOff {
            channel: MidiChannel(0),
            note: 64,
        };
        let osc = midi_to_osc(&kind).unwrap();
        assert_eq!(osc.args[2], Value::Int(0));
    }

    #[test]
    fn transport_events_carry_no_args() {
        for (address, kind) in [
            ("/start", MidiEventKind::Start),
            ("/continue", MidiEventKind::Continue),
            ("/stop", MidiEventKind::Stop),
        ] {
            let osc = midi_to_osc(&kind).unwrap();
            assert_eq!(osc.address, address);
            assert!(osc.args.is_empty());
            assert_eq!(osc_to_midi(&osc).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_address_returns_nil() {
        let msg = OscMessage::new("/unknown_thing", vec![Value::Int(1)]);
        assert!(osc_to_midi(&msg).is_none());
    }

    #[test]
    fn non_integer_args_are_rejected() {
        let msg = OscMessage::new("/note_on", vec![Value::String("x".into())]);
        assert!(osc_to_midi(&msg).is_none());
    }

    #[test]
    fn sysex_round_trips_bytes() {
        let kind = MidiEventKind::SysEx(vec![1, 2, 3, 4]);
        let osc = midi_to_osc(&kind).unwrap();
        assert_eq!(osc_to_midi(&osc).unwrap(), kind);
    }
}
