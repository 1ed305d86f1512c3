//! Configuration for the softkey bridge
//!
//! Loads the YAML preset file, validates connection settings and resolves
//! every preset into typed commands before anything connects.

mod presets;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tokio::fs;

use crate::drivers::mixer::MixerEndpoint;
use crate::error::ConfigError;
use crate::notes::NoteTable;
use crate::preset::{DeviceKind, ErrorPolicy, PresetTable};

pub use presets::resolve_presets;

/// Default config file when neither `--config` nor `MIDI_PRESET_FILE` is set
pub const DEFAULT_CONFIG_FILE: &str = "listener_config.yaml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default, alias = "sq", alias = "SQ", skip_serializing_if = "Option::is_none")]
    pub mixer: Option<MixerConfig>,
    #[serde(default, alias = "kramer", alias = "Kramer", skip_serializing_if = "Option::is_none")]
    pub switcher: Option<SwitcherConfig>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Raw preset definitions, kept as a mapping to preserve file order
    #[serde(default)]
    pub presets: Mapping,
}

/// Trigger listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// MIDI channel 1-16, shared by the trigger filter and mixer output
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Listen on a local MIDI input port instead of the mixer's TCP port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<String>,
    /// Trigger host, defaults to the mixer host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            midi_port: None,
            host: None,
            port: None,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Mixer link configuration: `host`/`port` or `midi_port`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MixerConfig {
    #[serde(default, alias = "ip", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_mixer_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<String>,
    /// Pause between MIDI messages
    #[serde(default = "default_message_gap_ms")]
    pub message_gap_ms: u64,
}

impl MixerConfig {
    pub fn endpoint(&self) -> Result<MixerEndpoint, ConfigError> {
        match (&self.host, &self.midi_port) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "mixer: set either 'host' or 'midi_port', not both".to_string(),
            )),
            (Some(host), None) if !host.trim().is_empty() => Ok(MixerEndpoint::Tcp {
                host: host.trim().to_string(),
                port: self.port,
            }),
            (None, Some(port)) if !port.trim().is_empty() => {
                Ok(MixerEndpoint::MidiPort(port.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid(
                "mixer: 'host' or 'midi_port' is required".to_string(),
            )),
        }
    }
}

/// Kramer switcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SwitcherConfig {
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default = "default_switcher_port")]
    pub port: u16,
    /// Reply timeout
    #[serde(default = "default_switcher_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where trigger events come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEndpoint {
    Tcp { host: String, port: u16 },
    MidiPort(String),
}

impl std::fmt::Display for TriggerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerEndpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            TriggerEndpoint::MidiPort(name) => write!(f, "MIDI port '{}'", name),
        }
    }
}

fn default_channel() -> u8 {
    1
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_mixer_port() -> u16 {
    51325
}

fn default_message_gap_ms() -> u64 {
    5
}

fn default_switcher_port() -> u16 {
    5000
}

fn default_switcher_timeout_ms() -> u64 {
    500
}

impl AppConfig {
    /// Load configuration from a YAML file and validate it
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;

        Self::from_yaml(&contents, path)
    }

    /// Parse and validate YAML text; `origin` names the source in errors
    pub fn from_yaml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate connection settings and every preset
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=16).contains(&self.listener.channel) {
            return Err(ConfigError::Invalid(format!(
                "listener.channel {} is outside 1-16",
                self.listener.channel
            )));
        }
        if self.listener.reconnect_base_ms == 0
            || self.listener.reconnect_max_ms < self.listener.reconnect_base_ms
        {
            return Err(ConfigError::Invalid(
                "listener: reconnect_max_ms must be >= reconnect_base_ms > 0".to_string(),
            ));
        }
        if let Some(mixer) = &self.mixer {
            mixer.endpoint()?;
        }
        if let Some(switcher) = &self.switcher {
            if switcher.host.trim().is_empty() {
                return Err(ConfigError::Invalid("switcher.host cannot be empty".to_string()));
            }
            if switcher.timeout_ms == 0 {
                return Err(ConfigError::Invalid("switcher.timeout_ms must be > 0".to_string()));
            }
        }
        self.trigger_endpoint()?;
        self.preset_table()?;
        Ok(())
    }

    /// Devices with connection settings
    pub fn configured_devices(&self) -> Vec<DeviceKind> {
        let mut devices = Vec::new();
        if self.mixer.is_some() {
            devices.push(DeviceKind::Mixer);
        }
        if self.switcher.is_some() {
            devices.push(DeviceKind::Switcher);
        }
        devices
    }

    /// Resolve the raw presets into the immutable trigger table
    pub fn preset_table(&self) -> Result<PresetTable, ConfigError> {
        resolve_presets(&self.presets, &NoteTable::new(), &self.configured_devices())
    }

    /// Trigger source: explicit listener settings, else the mixer's TCP port
    pub fn trigger_endpoint(&self) -> Result<TriggerEndpoint, ConfigError> {
        let listener = &self.listener;
        if let Some(name) = listener.midi_port.as_deref().map(str::trim) {
            if name.is_empty() {
                return Err(ConfigError::Invalid(
                    "listener.midi_port cannot be empty".to_string(),
                ));
            }
            return Ok(TriggerEndpoint::MidiPort(name.to_string()));
        }

        let mixer = self.mixer.as_ref();
        let host = listener
            .host
            .clone()
            .or_else(|| mixer.and_then(|m| m.host.clone()))
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "no trigger source: set listener.midi_port, listener.host or mixer.host"
                        .to_string(),
                )
            })?;
        let port = listener
            .port
            .or_else(|| mixer.map(|m| m.port))
            .unwrap_or_else(default_mixer_port);

        Ok(TriggerEndpoint::Tcp { host, port })
    }
}
