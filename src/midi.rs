//! MIDI utilities and message types
//!
//! Provides MIDI message parsing and encoding, a byte-stream parser for the
//! mixer's MIDI-over-TCP feed, and the NRPN parameter-change builder.

use std::fmt;

/// Controller numbers of the NRPN parameter-change sequence, in send order
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_DATA_ENTRY_LSB: u8 = 38;

pub const CC_BANK_SELECT_MSB: u8 = 0;
pub const CC_BANK_SELECT_LSB: u8 = 32;

/// Largest 14-bit value
pub const MAX_14BIT: u16 = 16383;

/// MIDI channel messages understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), pressure (0-127)
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse a complete channel message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }
        if rest.len() < data_len(status) {
            return None;
        }
        Some(Self::from_parts(status, rest))
    }

    fn from_parts(status: u8, data: &[u8]) -> Self {
        let channel = status & 0x0F;
        let d1 = data[0] & 0x7F;
        let d2 = data.get(1).map(|b| b & 0x7F).unwrap_or(0);

        match status & 0xF0 {
            0x80 => MidiMessage::NoteOff { channel, note: d1, velocity: d2 },
            // Note On with velocity 0 = Note Off
            0x90 if d2 == 0 => MidiMessage::NoteOff { channel, note: d1, velocity: 0 },
            0x90 => MidiMessage::NoteOn { channel, note: d1, velocity: d2 },
            0xA0 => MidiMessage::PolyPressure { channel, note: d1, pressure: d2 },
            0xB0 => MidiMessage::ControlChange { channel, cc: d1, value: d2 },
            0xC0 => MidiMessage::ProgramChange { channel, program: d1 },
            0xD0 => MidiMessage::ChannelPressure { channel, pressure: d1 },
            _ => MidiMessage::PitchBend {
                channel,
                value: ((d2 as u16) << 7) | d1 as u16,
            },
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
        }
    }

    /// Channel (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Number of data bytes following a channel status byte
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Incremental parser for a raw MIDI byte stream.
///
/// A socket read can end in the middle of a message, so partial messages are
/// kept until the next chunk. Running status is honored; SysEx and system
/// common messages are skipped, realtime bytes are ignored wherever they occur.
#[derive(Debug, Default)]
pub struct MidiStreamParser {
    running_status: Option<u8>,
    pending: Vec<u8>,
    in_sysex: bool,
}

impl MidiStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every message it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<MidiMessage> {
        let mut out = Vec::new();

        for &byte in chunk {
            // Realtime messages may be interleaved anywhere
            if byte >= 0xF8 {
                continue;
            }

            if byte & 0x80 != 0 {
                self.pending.clear();
                match byte {
                    0xF0 => {
                        self.in_sysex = true;
                        self.running_status = None;
                    }
                    0xF7 => self.in_sysex = false,
                    0xF1..=0xF6 => {
                        self.in_sysex = false;
                        self.running_status = None;
                    }
                    _ => {
                        self.in_sysex = false;
                        self.running_status = Some(byte);
                    }
                }
                continue;
            }

            if self.in_sysex {
                continue;
            }

            let Some(status) = self.running_status else {
                continue;
            };

            self.pending.push(byte);
            if self.pending.len() == data_len(status) {
                out.push(MidiMessage::from_parts(status, &self.pending));
                self.pending.clear();
            }
        }

        out
    }
}

/// Build the four Control Change messages that set one NRPN parameter.
///
/// Order is fixed: parameter MSB (CC99), parameter LSB (CC98), value MSB
/// (CC6), value LSB (CC38). The mixer applies the change on the final LSB.
pub fn nrpn_sequence(channel: u8, address: u16, value: u16) -> [MidiMessage; 4] {
    let cc = |cc: u8, value: u8| MidiMessage::ControlChange { channel, cc, value };
    [
        cc(CC_NRPN_MSB, ((address >> 7) & 0x7F) as u8),
        cc(CC_NRPN_LSB, (address & 0x7F) as u8),
        cc(CC_DATA_ENTRY_MSB, ((value >> 7) & 0x7F) as u8),
        cc(CC_DATA_ENTRY_LSB, (value & 0x7F) as u8),
    ]
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
