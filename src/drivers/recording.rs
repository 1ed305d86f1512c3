//! In-memory driver that records every command it receives (tests only)

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ConnectionState, Driver};
use crate::error::{DeviceError, DeviceResult};
use crate::preset::{Command, DeviceKind};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: Instant,
    pub device: DeviceKind,
    pub command: String,
}

/// Shared, ordered log across several recording drivers
pub type CommandLog = Arc<Mutex<Vec<Recorded>>>;

pub struct RecordingDriver {
    kind: DeviceKind,
    log: CommandLog,
    /// Commands (by Display form) that fail with the paired error kind
    failures: Vec<(String, fn(&str) -> DeviceError)>,
    state: ConnectionState,
}

impl RecordingDriver {
    pub fn new(kind: DeviceKind, log: CommandLog) -> Self {
        Self {
            kind,
            log,
            failures: Vec::new(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn failing_on(mut self, command: &str, error: fn(&str) -> DeviceError) -> Self {
        self.failures.push((command.to_string(), error));
        self
    }
}

pub fn connection_lost(device: &str) -> DeviceError {
    DeviceError::connection(device, "connection reset")
}

pub fn rejected(device: &str) -> DeviceError {
    DeviceError::protocol(device, "ERR 003")
}

#[async_trait]
impl Driver for RecordingDriver {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    async fn execute(&mut self, command: &Command) -> DeviceResult<()> {
        let text = command.to_string();
        if let Some((_, error)) = self.failures.iter().find(|(c, _)| *c == text) {
            self.state = ConnectionState::Disconnected;
            return Err(error(self.kind.as_str()));
        }
        self.state = ConnectionState::Connected;
        self.log.lock().push(Recorded {
            at: Instant::now(),
            device: self.kind,
            command: text,
        });
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
