// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A tagged-union value type with per-typetag coercion rules, making the
//! fixed typetag sequence each parameter carries explicit rather than
//! relying on duck typing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the value kinds a [Parameter](crate::parameter::Parameter) can
/// hold, and the wire representation used on OSC/state-snapshot boundaries.
/// Variant names follow OSC's own typetag letters: int,
/// long-int, float, double, string, char, bool-true, bool-false, time,
/// midi-blob, nil, impulse, raw-blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// `i` — 32-bit integer.
    Int(i32),
    /// `h` — 64-bit integer.
    Long(i64),
    /// `f` — 32-bit float.
    Float(f32),
    /// `d` — 64-bit float.
    Double(f64),
    /// `s` — string.
    String(String),
    /// `c` — single character.
    Char(char),
    /// `T` — boolean true. Carries no data; casting to this tag always
    /// yields `True` regardless of the input argument.
    True,
    /// `F` — boolean false. Carries no data; casting to this tag always
    /// yields `False` regardless of the input argument.
    False,
    /// `t` — OSC time tag, stored as nanoseconds since an engine-defined
    /// epoch.
    Time(u64),
    /// `m` — raw 4-byte MIDI message blob.
    MidiBlob([u8; 4]),
    /// `N` — nil / no value.
    Nil,
    /// `I` — impulse / bang. Carries no data.
    Impulse,
    /// `b` — arbitrary byte blob.
    RawBlob(Vec<u8>),
}

/// The typetag of a [Value], independent of any particular instance's data.
/// A [crate::parameter::Parameter]'s typetag sequence is a `Vec<TypeTag>`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TypeTag {
    /// See [Value::Int].
    Int,
    /// See [Value::Long].
    Long,
    /// See [Value::Float].
    Float,
    /// See [Value::Double].
    Double,
    /// See [Value::String].
    String,
    /// See [Value::Char].
    Char,
    /// See [Value::True].
    True,
    /// See [Value::False].
    False,
    /// See [Value::Time].
    Time,
    /// See [Value::MidiBlob].
    MidiBlob,
    /// See [Value::Nil].
    Nil,
    /// See [Value::Impulse].
    Impulse,
    /// See [Value::RawBlob].
    RawBlob,
}

impl Value {
    /// Returns this value's [TypeTag].
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Long(_) => TypeTag::Long,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::String(_) => TypeTag::String,
            Value::Char(_) => TypeTag::Char,
            Value::True => TypeTag::True,
            Value::False => TypeTag::False,
            Value::Time(_) => TypeTag::Time,
            Value::MidiBlob(_) => TypeTag::MidiBlob,
            Value::Nil => TypeTag::Nil,
            Value::Impulse => TypeTag::Impulse,
            Value::RawBlob(_) => TypeTag::RawBlob,
        }
    }

    /// Best-effort conversion to `f64`, used by easing/animation math and by
    /// the numeric-coercion rules of the OSC/MIDI codec.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::True => Some(1.0),
            Value::False => Some(0.0),
            Value::Time(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Casts `self` (an incoming, loosely-typed argument) to the given
    /// [TypeTag]: numeric rounding on integer tags, boolean tags ignore the
    /// argument and return their constant, unknown tags pass through.
    pub fn cast(&self, tag: TypeTag) -> Value {
        match tag {
            TypeTag::Int => Value::Int(self.as_f64().unwrap_or_default().round() as i32),
            TypeTag::Long => Value::Long(self.as_f64().unwrap_or_default().round() as i64),
            TypeTag::Float => Value::Float(self.as_f64().unwrap_or_default() as f32),
            TypeTag::Double => Value::Double(self.as_f64().unwrap_or_default()),
            TypeTag::String => match self {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            },
            TypeTag::Char => match self {
                Value::Char(c) => Value::Char(*c),
                Value::String(s) => Value::Char(s.chars().next().unwrap_or_default()),
                _ => Value::Char(char::default()),
            },
            // Boolean tags ignore the argument: they are constants.
            TypeTag::True => Value::True,
            TypeTag::False => Value::False,
            TypeTag::Time => Value::Time(self.as_f64().unwrap_or_default() as u64),
            TypeTag::MidiBlob => match self {
                Value::MidiBlob(b) => Value::MidiBlob(*b),
                _ => Value::MidiBlob([0; 4]),
            },
            TypeTag::Nil => Value::Nil,
            TypeTag::Impulse => Value::Impulse,
            // Unknown/blob tags pass the value through unchanged.
            TypeTag::RawBlob => match self {
                Value::RawBlob(b) => Value::RawBlob(b.clone()),
                other => other.clone(),
            },
        }
    }
}

impl Value {
    /// Converts to the wire type used at the OSC transport boundary.
    /// Blob-shaped values become `rosc::OscType::Blob`;
    /// [Value::MidiBlob] becomes `rosc::OscType::Midi` with a zero port/status
    /// byte left to the transport to fill in if it cares.
    pub fn to_osc_type(&self) -> rosc::OscType {
        match self {
            Value::Int(v) => rosc::OscType::Int(*v),
            Value::Long(v) => rosc::OscType::Long(*v),
            Value::Float(v) => rosc::OscType::Float(*v),
            Value::Double(v) => rosc::OscType::Double(*v),
            Value::String(v) => rosc::OscType::String(v.clone()),
            Value::Char(v) => rosc::OscType::Char(*v),
            Value::True => rosc::OscType::Bool(true),
            Value::False => rosc::OscType::Bool(false),
            Value::Time(v) => {
                rosc::OscType::Time(rosc::OscTime::from(std::time::Duration::from_nanos(*v)))
            }
            Value::MidiBlob(bytes) => rosc::OscType::Midi(rosc::OscMidiMessage {
                port: bytes[0],
                status: bytes[1],
                data1: bytes[2],
                data2: bytes[3],
            }),
            Value::Nil => rosc::OscType::Nil,
            Value::Impulse => rosc::OscType::Inf,
            Value::RawBlob(bytes) => rosc::OscType::Blob(bytes.clone()),
        }
    }

    /// Converts from the wire type received on the OSC transport boundary.
    pub fn from_osc_type(value: rosc::OscType) -> Value {
        match value {
            rosc::OscType::Int(v) => Value::Int(v),
            rosc::OscType::Long(v) => Value::Long(v),
            rosc::OscType::Float(v) => Value::Float(v),
            rosc::OscType::Double(v) => Value::Double(v),
            rosc::OscType::String(v) => Value::String(v),
            rosc::OscType::Char(v) => Value::Char(v),
            rosc::OscType::Bool(true) => Value::True,
            rosc::OscType::Bool(false) => Value::False,
            rosc::OscType::Time(v) => {
                let secs_since_epoch = std::time::Duration::from(v).as_nanos() as u64;
                Value::Time(secs_since_epoch)
            }
            rosc::OscType::Midi(m) => Value::MidiBlob([m.port, m.status, m.data1, m.data2]),
            rosc::OscType::Nil => Value::Nil,
            rosc::OscType::Inf => Value::Impulse,
            rosc::OscType::Blob(v) => Value::RawBlob(v),
            // Arrays have no direct typetag-sequence analogue; flatten to the wire value's string
            // form rather than dropping it silently.
            other => Value::String(format!("{other:?}")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::True => write!(f, "true"),
            Value::False => write!(f, "false"),
            Value::Time(v) => write!(f, "{v}"),
            Value::MidiBlob(v) => write!(f, "{v:02x?}"),
            Value::Nil => write!(f, "nil"),
            Value::Impulse => write!(f, "impulse"),
            Value::RawBlob(v) => write!(f, "{v:02x?}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        if v {
            Value::True
        } else {
            Value::False
        }
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_tags_ignore_argument() {
        assert_eq!(Value::Int(0).cast(TypeTag::True), Value::True);
        assert_eq!(Value::Int(12345).cast(TypeTag::False), Value::False);
    }

    #[test]
    fn numeric_rounding_on_integer_tags() {
        assert_eq!(Value::Double(2.6).cast(TypeTag::Int), Value::Int(3));
        assert_eq!(Value::Double(2.4).cast(TypeTag::Long), Value::Long(2));
    }

    #[test]
    fn double_cast_is_lossless_for_f64_inputs() {
        assert_eq!(Value::Double(1.5).cast(TypeTag::Double), Value::Double(1.5));
    }

    #[test]
    fn unknown_tag_variant_passes_blob_through() {
        let blob = Value::RawBlob(vec![1, 2, 3]);
        assert_eq!(blob.cast(TypeTag::RawBlob), blob);
    }
}
