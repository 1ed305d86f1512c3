//! Note label <-> MIDI note number table
//!
//! SoftKeys transmit Note On messages, and presets are keyed by the note they
//! fire on. Labels use scientific pitch notation with Middle C (`C4`) = 60, so
//! the playable range is `C-1` (0) up to `G9` (127).

use std::collections::HashMap;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Static bidirectional note table
#[derive(Debug, Clone)]
pub struct NoteTable {
    by_label: HashMap<String, u8>,
}

impl NoteTable {
    pub fn new() -> Self {
        let mut by_label = HashMap::with_capacity(128 * 2);
        for note in 0..=127u8 {
            by_label.insert(Self::label(note).to_uppercase(), note);
            if let Some(flat) = Self::flat_label(note) {
                by_label.insert(flat.to_uppercase(), note);
            }
        }
        Self { by_label }
    }

    /// Canonical (sharp) label for a note number, e.g. 49 -> "C#3"
    pub fn label(note: u8) -> String {
        let octave = (note as i32 / 12) - 1;
        format!("{}{}", SHARP_NAMES[(note % 12) as usize], octave)
    }

    fn flat_label(note: u8) -> Option<String> {
        let flat = match note % 12 {
            1 => "Db",
            3 => "Eb",
            6 => "Gb",
            8 => "Ab",
            10 => "Bb",
            _ => return None,
        };
        Some(format!("{}{}", flat, (note as i32 / 12) - 1))
    }

    /// Resolve a label ("C3", "c#3", "Db3", "NOTE_C3") to a note number
    pub fn lookup(&self, label: &str) -> Option<u8> {
        let trimmed = label.trim();
        let trimmed = trimmed
            .strip_prefix("NOTE_")
            .or_else(|| trimmed.strip_prefix("note_"))
            .unwrap_or(trimmed);
        let normalized = trimmed.to_uppercase().replace("SHARP", "#");
        self.by_label.get(&normalized).copied()
    }

    /// Resolve either a label or a plain note number ("48")
    pub fn resolve(&self, key: &str) -> Option<u8> {
        match key.trim().parse::<u8>() {
            Ok(n) if n <= 127 => Some(n),
            Ok(_) => None,
            Err(_) => self.lookup(key),
        }
    }
}

impl Default for NoteTable {
    fn default() -> Self {
        Self::new()
    }
}
