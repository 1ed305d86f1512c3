//! Preset model: trigger note -> ordered device blocks -> ordered commands
//!
//! Everything here is resolved and validated when the configuration is
//! loaded; nothing is parsed while a trigger is being handled.

pub mod executor;


use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::drivers::mixer::address::ChannelRef;

pub use executor::{BlockOutcome, BlockReport, ErrorPolicy, ExecutionReport, PresetExecutor};

/// Device a block of commands is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Mixer,
    Switcher,
}

impl DeviceKind {
    /// Parse a device key from the preset file (`mixer`/`sq`, `switcher`/`kramer`)
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "mixer" | "sq" => Some(DeviceKind::Mixer),
            "switcher" | "kramer" => Some(DeviceKind::Switcher),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Mixer => "mixer",
            DeviceKind::Switcher => "switcher",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switcher video mute flag (Protocol 3000 `VMUTE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMuteMode {
    Enable = 0,
    Disable = 1,
    Blank = 2,
}

impl VideoMuteMode {
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(VideoMuteMode::Enable),
            1 => Some(VideoMuteMode::Disable),
            2 => Some(VideoMuteMode::Blank),
            _ => None,
        }
    }

    pub fn flag(self) -> u8 {
        self as u8
    }
}

/// One step of a preset
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RecallScene(u16),
    SetMute {
        from: ChannelRef,
        to: ChannelRef,
        enabled: bool,
    },
    SetFaderLevel {
        from: ChannelRef,
        to: ChannelRef,
        level_db: f32,
    },
    SetPan {
        from: ChannelRef,
        to: ChannelRef,
        pan: i32,
    },
    SetAssign {
        from: ChannelRef,
        to: ChannelRef,
        enabled: bool,
    },
    /// Pause the block; valid on any device
    Wait(Duration),
    Route {
        source: u16,
        dest: u16,
        layer: u16,
    },
    VideoMute {
        output: u16,
        mode: VideoMuteMode,
    },
}

impl Command {
    /// Device that understands this command, `None` for device-independent steps
    pub fn target(&self) -> Option<DeviceKind> {
        match self {
            Command::RecallScene(_)
            | Command::SetMute { .. }
            | Command::SetFaderLevel { .. }
            | Command::SetPan { .. }
            | Command::SetAssign { .. } => Some(DeviceKind::Mixer),
            Command::Route { .. } | Command::VideoMute { .. } => Some(DeviceKind::Switcher),
            Command::Wait(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::RecallScene(_) => "RecallScene",
            Command::SetMute { .. } => "SetMute",
            Command::SetFaderLevel { .. } => "SetFaderLevel",
            Command::SetPan { .. } => "SetPan",
            Command::SetAssign { .. } => "SetAssign",
            Command::Wait(_) => "Wait",
            Command::Route { .. } => "Route",
            Command::VideoMute { .. } => "VideoMute",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::RecallScene(scene) => write!(f, "RecallScene({})", scene),
            Command::SetMute { from, to, enabled } => {
                write!(f, "SetMute({}, {}, {})", from, to, enabled)
            }
            Command::SetFaderLevel { from, to, level_db } => {
                write!(f, "SetFaderLevel({}, {}, {}dB)", from, to, level_db)
            }
            Command::SetPan { from, to, pan } => write!(f, "SetPan({}, {}, {})", from, to, pan),
            Command::SetAssign { from, to, enabled } => {
                write!(f, "SetAssign({}, {}, {})", from, to, enabled)
            }
            Command::Wait(duration) => write!(f, "Wait({}s)", duration.as_secs_f64()),
            Command::Route { source, dest, layer } => {
                write!(f, "Route(source={}, dest={}, layer={})", source, dest, layer)
            }
            Command::VideoMute { output, mode } => {
                write!(f, "VideoMute(output={}, {:?})", output, mode)
            }
        }
    }
}

/// Commands for a single device, run in order
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBlock {
    pub device: DeviceKind,
    pub commands: Vec<Command>,
}

/// A named set of device blocks fired by one trigger note
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub note: u8,
    pub label: String,
    pub blocks: Vec<DeviceBlock>,
}

impl Preset {
    /// Devices referenced by this preset, in block order
    pub fn devices(&self) -> impl Iterator<Item = DeviceKind> + '_ {
        self.blocks.iter().map(|b| b.device)
    }
}

/// Immutable note -> preset table
#[derive(Debug, Clone, Default)]
pub struct PresetTable {
    presets: BTreeMap<u8, Preset>,
}

impl PresetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a preset, returning the one it replaced
    pub(crate) fn insert(&mut self, preset: Preset) -> Option<Preset> {
        self.presets.insert(preset.note, preset)
    }

    pub fn get(&self, note: u8) -> Option<&Preset> {
        self.presets.get(&note)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Presets ordered by note
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }
}

impl FromIterator<Preset> for PresetTable {
    fn from_iter<I: IntoIterator<Item = Preset>>(iter: I) -> Self {
        let mut table = PresetTable::new();
        for preset in iter {
            table.insert(preset);
        }
        table
    }
}
