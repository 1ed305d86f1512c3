//! Allen & Heath SQ mixer driver
//!
//! Translates preset commands into MIDI: NRPN parameter changes for mutes,
//! levels, pans and assigns, Bank Select + Program Change for scene recall.
//! The mixer is reached either over its MIDI-over-TCP port or through a
//! local MIDI output port.

pub mod address;
pub mod taper;

use std::time::Duration;

use async_trait::async_trait;
use midir::{MidiOutput, MidiOutputConnection};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use self::address::{ChannelRef, ControlType};
use super::{ConnectionState, Driver};
use crate::error::{DeviceError, DeviceResult};
use crate::midi::{format_hex, nrpn_sequence, MidiMessage, CC_BANK_SELECT_LSB, CC_BANK_SELECT_MSB};
use crate::preset::{Command, DeviceKind};

const DEVICE: &str = "mixer";

/// Highest scene number the mixer stores
pub const MAX_SCENE: u16 = 300;

/// Where the mixer's MIDI input lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEndpoint {
    /// MIDI over TCP (SQ default port 51325)
    Tcp { host: String, port: u16 },
    /// Local MIDI output port, matched by case-insensitive substring
    MidiPort(String),
}

impl std::fmt::Display for MixerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MixerEndpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            MixerEndpoint::MidiPort(name) => write!(f, "MIDI port '{}'", name),
        }
    }
}

enum MixerLink {
    Tcp(TcpStream),
    Port(MidiOutputConnection),
}

/// Stateful client for the mixer's MIDI control protocol
pub struct MixerClient {
    endpoint: MixerEndpoint,
    /// MIDI channel (0-15)
    channel: u8,
    message_gap: Duration,
    io_timeout: Duration,
    state: ConnectionState,
    link: Option<MixerLink>,
}

impl MixerClient {
    /// Create a client; nothing is opened until the first command
    ///
    /// # Arguments
    /// * `endpoint` - TCP address or local port name
    /// * `channel` - MIDI channel 1-16
    pub fn new(endpoint: MixerEndpoint, channel: u8) -> Self {
        Self {
            endpoint,
            channel: channel.saturating_sub(1).min(15),
            message_gap: Duration::from_millis(5),
            io_timeout: Duration::from_secs(2),
            state: ConnectionState::Disconnected,
            link: None,
        }
    }

    /// Pause between consecutive MIDI messages
    pub fn with_message_gap(mut self, gap: Duration) -> Self {
        self.message_gap = gap;
        self
    }

    /// Bound on connect and on each write
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn endpoint(&self) -> &MixerEndpoint {
        &self.endpoint
    }

    /// Encode a command as the ordered MIDI messages the mixer expects
    pub fn encode(&self, command: &Command) -> DeviceResult<Vec<MidiMessage>> {
        match *command {
            Command::RecallScene(scene) => self.scene_recall(scene),
            Command::SetMute { from, to, enabled } => {
                self.parameter(ControlType::Mute, from, to, enabled as u16)
            }
            Command::SetAssign { from, to, enabled } => {
                self.parameter(ControlType::Assign, from, to, enabled as u16)
            }
            Command::SetFaderLevel { from, to, level_db } => {
                self.parameter(ControlType::Fader, from, to, taper::db_to_level(level_db))
            }
            Command::SetPan { from, to, pan } => {
                self.parameter(ControlType::Pan, from, to, taper::pan_to_value(pan)?)
            }
            ref other => Err(DeviceError::protocol(
                DEVICE,
                format!("{} is not a mixer command", other.name()),
            )),
        }
    }

    fn scene_recall(&self, scene: u16) -> DeviceResult<Vec<MidiMessage>> {
        if scene == 0 || scene > MAX_SCENE {
            return Err(DeviceError::Range(format!(
                "Scene {} outside 1-{}",
                scene, MAX_SCENE
            )));
        }
        let index = scene - 1;
        let channel = self.channel;
        Ok(vec![
            MidiMessage::ControlChange { channel, cc: CC_BANK_SELECT_MSB, value: 0 },
            MidiMessage::ControlChange {
                channel,
                cc: CC_BANK_SELECT_LSB,
                value: (index / 128) as u8,
            },
            MidiMessage::ProgramChange { channel, program: (index % 128) as u8 },
        ])
    }

    fn parameter(
        &self,
        control: ControlType,
        from: ChannelRef,
        to: ChannelRef,
        value: u16,
    ) -> DeviceResult<Vec<MidiMessage>> {
        let address = address::address(control, from, to)?;
        Ok(nrpn_sequence(self.channel, address, value).to_vec())
    }

    async fn ensure_connected(&mut self) -> DeviceResult<()> {
        if self.link.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        debug!("Connecting to mixer at {}", self.endpoint);

        let result = match &self.endpoint {
            MixerEndpoint::Tcp { host, port } => {
                match timeout(self.io_timeout, TcpStream::connect((host.as_str(), *port))).await {
                    Ok(Ok(stream)) => {
                        let _ = stream.set_nodelay(true);
                        Ok(MixerLink::Tcp(stream))
                    }
                    Ok(Err(e)) => Err(DeviceError::connection(DEVICE, e)),
                    Err(_) => Err(DeviceError::connection(
                        DEVICE,
                        format!("connect to {} timed out", self.endpoint),
                    )),
                }
            }
            MixerEndpoint::MidiPort(pattern) => open_output_port(pattern).map(MixerLink::Port),
        };

        match result {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::Connected;
                info!("✅ Mixer connected at {}", self.endpoint);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.link.take().is_some() {
            debug!("Mixer link to {} closed", self.endpoint);
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn write_message(&mut self, bytes: &[u8]) -> DeviceResult<()> {
        let io_timeout = self.io_timeout;
        let result = match self.link.as_mut() {
            Some(MixerLink::Tcp(stream)) => match timeout(io_timeout, stream.write_all(bytes)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("write timed out".to_string()),
            },
            Some(MixerLink::Port(conn)) => conn.send(bytes).map_err(|e| e.to_string()),
            None => Err("not connected".to_string()),
        };

        result.map_err(|e| {
            warn!("Mixer write failed, dropping connection: {}", e);
            self.disconnect();
            DeviceError::connection(DEVICE, e)
        })
    }

    /// Send one command, connecting first if needed
    pub async fn send(&mut self, command: &Command) -> DeviceResult<()> {
        // Encode before touching the link so bad values never reach the wire
        let messages = self.encode(command)?;
        self.ensure_connected().await?;

        for (i, message) in messages.iter().enumerate() {
            if i > 0 && !self.message_gap.is_zero() {
                sleep(self.message_gap).await;
            }
            let bytes = message.encode();
            debug!("Mixer TX: {}", format_hex(&bytes));
            self.write_message(&bytes).await?;
        }

        debug!(command = %command, messages = messages.len(), "Mixer command sent");
        Ok(())
    }
}

fn open_output_port(pattern: &str) -> DeviceResult<MidiOutputConnection> {
    let midi_out = MidiOutput::new("Softkey-Bridge-Mixer")
        .map_err(|e| DeviceError::connection(DEVICE, e))?;

    let needle = pattern.to_lowercase();
    let port = midi_out
        .ports()
        .into_iter()
        .find(|port| {
            midi_out
                .port_name(port)
                .map(|name| name.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| DeviceError::connection(DEVICE, format!("Output port '{}' not found", pattern)))?;

    midi_out
        .connect(&port, "softkey-bridge")
        .map_err(|e| DeviceError::connection(DEVICE, e))
}

#[async_trait]
impl Driver for MixerClient {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Mixer
    }

    async fn execute(&mut self, command: &Command) -> DeviceResult<()> {
        self.send(command).await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn shutdown(&mut self) {
        if let Some(MixerLink::Tcp(mut stream)) = self.link.take() {
            let _ = stream.shutdown().await;
        }
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn ch(label: &str) -> ChannelRef {
        label.parse().unwrap()
    }

    fn bytes_of(messages: &[MidiMessage]) -> Vec<u8> {
        messages.iter().flat_map(|m| m.encode()).collect()
    }

    fn client_for(port: u16) -> MixerClient {
        MixerClient::new(
            MixerEndpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            },
            1,
        )
        .with_message_gap(Duration::ZERO)
        .with_io_timeout(Duration::from_millis(500))
    }

    #[test]
    fn test_mute_encoding() {
        let client = client_for(1);
        let msgs = client
            .encode(&Command::SetMute { from: ch("IP1"), to: ch("LR"), enabled: true })
            .unwrap();
        assert_eq!(
            bytes_of(&msgs),
            vec![0xB0, 99, 0, 0xB0, 98, 0, 0xB0, 6, 0, 0xB0, 38, 1]
        );
    }

    #[test]
    fn test_fader_encoding_uses_taper() {
        let client = client_for(1);
        let msgs = client
            .encode(&Command::SetFaderLevel { from: ch("IP1"), to: ch("LR"), level_db: 0.0 })
            .unwrap();
        assert_eq!(
            bytes_of(&msgs),
            vec![0xB0, 99, 0x40, 0xB0, 98, 0, 0xB0, 6, 0x76, 0xB0, 38, 0x5C]
        );
    }

    #[test]
    fn test_channel_is_carried_in_status_byte() {
        let client = MixerClient::new(MixerEndpoint::MidiPort("SQ".into()), 3);
        let msgs = client
            .encode(&Command::SetAssign { from: ch("IP2"), to: ch("GRP1"), enabled: false })
            .unwrap();
        assert!(msgs.iter().all(|m| m.channel() == 2));
        assert_eq!(msgs.len(), 4);
    }

    #[test]
    fn test_scene_recall_encoding() {
        let client = client_for(1);
        let msgs = client.encode(&Command::RecallScene(1)).unwrap();
        assert_eq!(bytes_of(&msgs), vec![0xB0, 0, 0, 0xB0, 32, 0, 0xC0, 0]);

        let msgs = client.encode(&Command::RecallScene(130)).unwrap();
        assert_eq!(bytes_of(&msgs), vec![0xB0, 0, 0, 0xB0, 32, 1, 0xC0, 1]);
    }

    #[test]
    fn test_range_errors() {
        let client = client_for(1);
        assert!(matches!(client.encode(&Command::RecallScene(0)), Err(DeviceError::Range(_))));
        assert!(matches!(client.encode(&Command::RecallScene(301)), Err(DeviceError::Range(_))));
        assert!(matches!(
            client.encode(&Command::SetPan { from: ch("IP1"), to: ch("LR"), pan: 150 }),
            Err(DeviceError::Range(_))
        ));
        assert!(matches!(
            client.encode(&Command::SetMute { from: ch("LR"), to: ch("IP1"), enabled: true }),
            Err(DeviceError::Address(_))
        ));
    }

    #[test]
    fn test_switcher_command_is_rejected() {
        let client = client_for(1);
        let err = client
            .encode(&Command::Route { source: 1, dest: 1, layer: 1 })
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_send_connects_lazily_and_writes_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = client_for(port);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 12];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        client
            .send(&Command::SetMute { from: ch("IP1"), to: ch("LR"), enabled: false })
            .await
            .unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![0xB0, 99, 0, 0xB0, 98, 0, 0xB0, 6, 0, 0xB0, 38, 0]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_connection_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = client_for(port);
        let err = client.send(&Command::RecallScene(1)).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        // Once the mixer is reachable again the next send reconnects by itself
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        client.send(&Command::RecallScene(1)).await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(server.await.unwrap(), vec![0xB0, 0, 0, 0xB0, 32, 0, 0xC0, 0]);
    }

    #[tokio::test]
    async fn test_write_failure_drops_link_and_next_send_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            // First connection: read one scene recall, then hang up
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8];
            socket.read_exact(&mut buf).await.unwrap();
            drop(socket);

            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut client = client_for(port);
        client.send(&Command::RecallScene(1)).await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        // The peer's reset only shows up on a later write
        let mut failure = None;
        for _ in 0..50 {
            sleep(Duration::from_millis(20)).await;
            if let Err(e) = client.send(&Command::RecallScene(1)).await {
                failure = Some(e);
                break;
            }
        }
        let err = failure.expect("write to a closed socket never failed");
        assert!(matches!(err, DeviceError::Connection { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        client.send(&Command::RecallScene(2)).await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(server.await.unwrap(), vec![0xB0, 0, 0, 0xB0, 32, 0, 0xC0, 1]);
    }

    #[tokio::test]
    async fn test_invalid_command_does_not_connect() {
        let mut client = client_for(9);
        let err = client.send(&Command::RecallScene(999)).await.unwrap_err();
        assert!(matches!(err, DeviceError::Range(_)));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}
