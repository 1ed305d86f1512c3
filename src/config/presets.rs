//! Resolution of raw YAML presets into typed commands
//!
//! Every literal is range-checked and every channel pair is run through the
//! address table here, so a preset that loads can only fail on the wire.

use std::collections::HashMap;
use std::time::Duration;

use serde_yaml::{Mapping, Value};

use crate::drivers::mixer::address::{self, ChannelRef, ControlType};
use crate::drivers::mixer::MAX_SCENE;
use crate::drivers::switcher::protocol::LAYER_VIDEO;
use crate::error::ConfigError;
use crate::notes::NoteTable;
use crate::preset::{Command, DeviceBlock, DeviceKind, Preset, PresetTable, VideoMuteMode};

/// Build the trigger table from the `presets:` mapping
///
/// # Arguments
/// * `raw` - preset key (note label or number) -> device blocks
/// * `notes` - label resolver
/// * `configured` - devices that have connection settings
pub fn resolve_presets(
    raw: &Mapping,
    notes: &NoteTable,
    configured: &[DeviceKind],
) -> Result<PresetTable, ConfigError> {
    let mut table = PresetTable::new();
    let mut keys: HashMap<u8, String> = HashMap::new();

    for (key, body) in raw {
        let (note, label) = resolve_trigger(key, notes)?;
        if let Some(previous) = keys.insert(note, label.clone()) {
            return Err(ConfigError::preset(
                &label,
                format!("note {} is already used by preset '{}'", note, previous),
            ));
        }

        let blocks = resolve_blocks(&label, body, configured)?;
        table.insert(Preset { note, label, blocks });
    }

    Ok(table)
}

fn resolve_trigger(key: &Value, notes: &NoteTable) -> Result<(u8, String), ConfigError> {
    match key {
        Value::Number(n) => {
            let note = n
                .as_u64()
                .filter(|n| *n <= 127)
                .ok_or_else(|| ConfigError::preset(n.to_string(), "note number must be 0-127"))?;
            Ok((note as u8, NoteTable::label(note as u8)))
        }
        Value::String(label) => notes
            .resolve(label)
            .map(|note| (note, label.trim().to_string()))
            .ok_or_else(|| ConfigError::preset(label, "unknown note label")),
        other => Err(ConfigError::Invalid(format!(
            "preset key {:?} is not a note label or number",
            other
        ))),
    }
}

fn resolve_blocks(
    label: &str,
    body: &Value,
    configured: &[DeviceKind],
) -> Result<Vec<DeviceBlock>, ConfigError> {
    let devices = body
        .as_mapping()
        .ok_or_else(|| ConfigError::preset(label, "expected a mapping of device -> commands"))?;
    if devices.is_empty() {
        return Err(ConfigError::preset(label, "preset has no device blocks"));
    }

    let mut blocks = Vec::with_capacity(devices.len());
    for (device_key, commands) in devices {
        let key = device_key.as_str().unwrap_or_default();
        let device = DeviceKind::from_key(key)
            .ok_or_else(|| ConfigError::preset(label, format!("unknown device '{}'", key)))?;
        if !configured.contains(&device) {
            return Err(ConfigError::preset(
                label,
                format!("block '{}' but no {} connection is configured", key, device),
            ));
        }

        let items: &[Value] = match commands {
            Value::Sequence(items) => items.as_slice(),
            Value::Null => &[],
            _ => {
                return Err(ConfigError::preset(
                    label,
                    format!("block '{}' must be a list of commands", key),
                ))
            }
        };

        let mut resolved = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let command = resolve_command(item).map_err(|e| {
                ConfigError::preset(label, format!("{} command #{}: {}", device, i + 1, e))
            })?;
            if let Some(target) = command.target() {
                if target != device {
                    return Err(ConfigError::preset(
                        label,
                        format!(
                            "{} command #{}: {} is a {} command",
                            device,
                            i + 1,
                            command.name(),
                            target
                        ),
                    ));
                }
            }
            resolved.push(command);
        }

        blocks.push(DeviceBlock { device, commands: resolved });
    }

    Ok(blocks)
}

/// Resolve one `{Name: args}` entry
fn resolve_command(item: &Value) -> Result<Command, String> {
    let entry = item
        .as_mapping()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| "expected a single-key mapping like '{ RecallScene: 1 }'".to_string())?;
    let (name, args) = entry
        .iter()
        .next()
        .ok_or_else(|| "empty command".to_string())?;
    let name = name.as_str().ok_or_else(|| "command name must be a string".to_string())?;

    match name.to_lowercase().as_str() {
        "recallscene" => {
            let scene = int_arg(args, "scene")?;
            if scene < 1 || scene > MAX_SCENE as i64 {
                return Err(format!("scene {} outside 1-{}", scene, MAX_SCENE));
            }
            Ok(Command::RecallScene(scene as u16))
        }
        "setmute" => {
            let (from, to, value) = crosspoint(args, ControlType::Mute)?;
            Ok(Command::SetMute { from, to, enabled: bool_arg(value)? })
        }
        "setassign" => {
            let (from, to, value) = crosspoint(args, ControlType::Assign)?;
            Ok(Command::SetAssign { from, to, enabled: bool_arg(value)? })
        }
        "setfaderlevel" => {
            let (from, to, value) = crosspoint(args, ControlType::Fader)?;
            let level_db = float_arg(value, "level")?;
            Ok(Command::SetFaderLevel { from, to, level_db: level_db as f32 })
        }
        "setpan" => {
            let (from, to, value) = crosspoint(args, ControlType::Pan)?;
            let pan = float_arg(value, "pan")?;
            if !(-100.0..=100.0).contains(&pan) {
                return Err(format!("pan {} outside -100..100", pan));
            }
            Ok(Command::SetPan { from, to, pan: pan.round() as i32 })
        }
        "wait" => {
            let seconds = float_arg(args, "seconds")?;
            if seconds < 0.0 {
                return Err(format!("wait of {}s is negative", seconds));
            }
            Duration::try_from_secs_f64(seconds)
                .map(Command::Wait)
                .map_err(|e| format!("wait of {}s: {}", seconds, e))
        }
        "route" => resolve_route(args),
        "videomute" => resolve_video_mute(args),
        _ => Err(format!("unknown command '{}'", name)),
    }
}

/// `[from, to, value]` with the channel pair checked against the address table
fn crosspoint(args: &Value, control: ControlType) -> Result<(ChannelRef, ChannelRef, &Value), String> {
    let items = args
        .as_sequence()
        .filter(|s| s.len() == 3)
        .ok_or_else(|| "expected [from, to, value]".to_string())?;

    let from = channel_arg(&items[0])?;
    let to = channel_arg(&items[1])?;
    address::address(control, from, to).map_err(|e| e.to_string())?;
    Ok((from, to, &items[2]))
}

fn channel_arg(value: &Value) -> Result<ChannelRef, String> {
    let label = value
        .as_str()
        .ok_or_else(|| format!("channel {:?} must be a label like IP1 or LR", value))?;
    label
        .parse::<ChannelRef>()
        .map_err(|e| format!("channel '{}': {}", label, e))
}

fn resolve_route(args: &Value) -> Result<Command, String> {
    let (source, dest, layer) = match args {
        Value::Mapping(map) => (
            map.get("source")
                .ok_or_else(|| "route needs 'source'".to_string())
                .and_then(|v| port_arg(v, "source"))?,
            optional_port(map, "dest", 1)?,
            optional_port(map, "layer", LAYER_VIDEO)?,
        ),
        other => (port_arg(other, "source")?, 1, LAYER_VIDEO),
    };
    Ok(Command::Route { source, dest, layer })
}

fn resolve_video_mute(args: &Value) -> Result<Command, String> {
    let (output, mode) = match args {
        Value::Mapping(map) => (
            optional_port(map, "output", 1)?,
            map.get("mode")
                .ok_or_else(|| "video mute needs 'mode'".to_string())
                .and_then(mode_arg)?,
        ),
        other => (1, mode_arg(other)?),
    };
    Ok(Command::VideoMute { output, mode })
}

fn mode_arg(value: &Value) -> Result<VideoMuteMode, String> {
    if let Some(flag) = value.as_i64() {
        return VideoMuteMode::from_flag(flag)
            .ok_or_else(|| format!("video mute flag {} must be 0, 1 or 2", flag));
    }
    match value.as_str().map(|s| s.trim().to_lowercase()).as_deref() {
        Some("enable") => Ok(VideoMuteMode::Enable),
        Some("disable") => Ok(VideoMuteMode::Disable),
        Some("blank") => Ok(VideoMuteMode::Blank),
        _ => Err(format!("unknown video mute mode {:?}", value)),
    }
}

fn optional_port(map: &Mapping, key: &str, default: u16) -> Result<u16, String> {
    map.get(key).map_or(Ok(default), |v| port_arg(v, key))
}

fn port_arg(value: &Value, what: &str) -> Result<u16, String> {
    let n = int_arg(value, what)?;
    if !(1..=u16::MAX as i64).contains(&n) {
        return Err(format!("{} {} must be a positive number", what, n));
    }
    Ok(n as u16)
}

fn int_arg(value: &Value, what: &str) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("{} must be an integer, got {:?}", what, value))
}

fn float_arg(value: &Value, what: &str) -> Result<f64, String> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{} must be a number, got {:?}", what, value))
}

fn bool_arg(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        other => Err(format!("expected true/false, got {:?}", other)),
    }
}
