//! Trigger event sources: the mixer's MIDI-over-TCP port or a local MIDI input

use std::time::Duration;

use async_trait::async_trait;
use midir::{MidiInput, MidiInputConnection};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::TriggerEndpoint;
use crate::error::{DeviceError, DeviceResult};
use crate::midi::{format_hex, MidiMessage, MidiStreamParser};

const DEVICE: &str = "trigger source";

/// A connection that yields incoming MIDI messages
#[async_trait]
pub trait TriggerSource: Send {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Open the connection, replacing any previous one
    async fn connect(&mut self) -> DeviceResult<()>;

    /// Wait for the next batch of messages
    ///
    /// An error means the connection is gone; the caller reconnects.
    async fn next_messages(&mut self) -> DeviceResult<Vec<MidiMessage>>;

    fn disconnect(&mut self);
}

/// Build the source named by the configuration
pub fn from_endpoint(endpoint: &TriggerEndpoint) -> Box<dyn TriggerSource> {
    match endpoint {
        TriggerEndpoint::Tcp { host, port } => Box::new(TcpTriggerSource::new(host.clone(), *port)),
        TriggerEndpoint::MidiPort(name) => Box::new(MidiPortTriggerSource::new(name.clone())),
    }
}

/// Raw MIDI byte stream from the mixer over TCP
pub struct TcpTriggerSource {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    parser: MidiStreamParser,
    buf: Vec<u8>,
}

impl TcpTriggerSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            stream: None,
            parser: MidiStreamParser::new(),
            buf: vec![0u8; 1024],
        }
    }
}

#[async_trait]
impl TriggerSource for TcpTriggerSource {
    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&mut self) -> DeviceResult<()> {
        self.disconnect();
        let address = self.describe();
        let stream = timeout(self.connect_timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| DeviceError::connection(DEVICE, format!("connect to {} timed out", address)))?
            .map_err(|e| DeviceError::connection(DEVICE, format!("{}: {}", address, e)))?;

        // A fresh stream never continues a message from the old one
        self.parser = MidiStreamParser::new();
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_messages(&mut self) -> DeviceResult<Vec<MidiMessage>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::connection(DEVICE, "not connected"))?;

        let n = match stream.read(&mut self.buf).await {
            Ok(0) => {
                self.stream = None;
                return Err(DeviceError::connection(DEVICE, "connection closed by peer"));
            }
            Ok(n) => n,
            Err(e) => {
                self.stream = None;
                return Err(DeviceError::connection(DEVICE, e));
            }
        };

        debug!("MIDI RX: {}", format_hex(&self.buf[..n]));
        Ok(self.parser.feed(&self.buf[..n]))
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }
}

/// Local MIDI input port, matched by case-insensitive substring
pub struct MidiPortTriggerSource {
    pattern: String,
    conn: Option<MidiInputConnection<()>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl MidiPortTriggerSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            conn: None,
            rx: None,
        }
    }
}

#[async_trait]
impl TriggerSource for MidiPortTriggerSource {
    fn describe(&self) -> String {
        format!("MIDI port '{}'", self.pattern)
    }

    async fn connect(&mut self) -> DeviceResult<()> {
        self.disconnect();

        let mut midi_in = MidiInput::new("Softkey-Bridge-Listener")
            .map_err(|e| DeviceError::connection(DEVICE, e))?;
        midi_in.ignore(midir::Ignore::All);

        let needle = self.pattern.to_lowercase();
        let (port, name) = midi_in
            .ports()
            .into_iter()
            .find_map(|port| {
                let name = midi_in.port_name(&port).ok()?;
                name.to_lowercase().contains(&needle).then_some((port, name))
            })
            .ok_or_else(|| {
                DeviceError::connection(DEVICE, format!("Input port '{}' not found", self.pattern))
            })?;

        let (tx, rx) = mpsc::channel(256);
        let conn = midi_in
            .connect(
                &port,
                "softkey-bridge",
                move |_timestamp, data, _| {
                    let _ = tx.try_send(data.to_vec());
                },
                (),
            )
            .map_err(|e| DeviceError::connection(DEVICE, e))?;

        info!("Listening on input port: {}", name);
        self.conn = Some(conn);
        self.rx = Some(rx);
        Ok(())
    }

    async fn next_messages(&mut self) -> DeviceResult<Vec<MidiMessage>> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| DeviceError::connection(DEVICE, "not connected"))?;

        match rx.recv().await {
            Some(data) => {
                debug!("MIDI RX: {}", format_hex(&data));
                Ok(MidiMessage::parse(&data).into_iter().collect())
            }
            None => {
                self.disconnect();
                Err(DeviceError::connection(DEVICE, "input port closed"))
            }
        }
    }

    fn disconnect(&mut self) {
        self.rx = None;
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
    }
}
