//! Softkey Bridge
//!
//! Recalls combined audio/video presets from Allen & Heath SQ SoftKey
//! triggers: Note On events from the mixer select a preset, whose blocks
//! drive the mixer (NRPN over MIDI) and a Kramer switcher (Protocol 3000).

pub mod config;
pub mod drivers;
pub mod error;
pub mod listener;
pub mod midi;
pub mod notes;
pub mod preset;
