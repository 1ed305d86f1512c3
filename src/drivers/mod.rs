//! Device drivers (SQ mixer, Kramer switcher)
//!
//! Each driver exclusively owns its one connection. Connections are opened
//! lazily by the first command and dropped on any I/O failure; the next
//! command reconnects once. Drivers never retry internally.

use async_trait::async_trait;

use crate::error::DeviceResult;
use crate::preset::{Command, DeviceKind};

pub mod mixer;
pub mod switcher;

#[cfg(test)]
pub(crate) mod recording;

pub use mixer::{MixerClient, MixerEndpoint};
pub use switcher::SwitcherClient;

/// Connection lifecycle of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Driver trait - every controllable device implements this
///
/// Methods take `&mut self`: commands on one connection are serialized by
/// ownership rather than by a lock.
#[async_trait]
pub trait Driver: Send {
    /// Device this driver controls
    fn kind(&self) -> DeviceKind;

    /// Execute a single preset command
    ///
    /// Connects first if the driver is disconnected. A command the device
    /// does not understand is a protocol error.
    async fn execute(&mut self, command: &Command) -> DeviceResult<()>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Close the connection, if any
    async fn shutdown(&mut self);
}
