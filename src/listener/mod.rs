//! Trigger listener
//!
//! Keeps the trigger connection alive, turns Note On events on the
//! configured channel into preset executions, and reconnects with
//! exponential backoff whenever the connection drops.

pub mod backoff;
pub mod source;

use std::future::Future;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::midi::MidiMessage;
use crate::notes::NoteTable;
use crate::preset::{ExecutionReport, PresetExecutor, PresetTable};

pub use backoff::Backoff;
pub use source::{from_endpoint, MidiPortTriggerSource, TcpTriggerSource, TriggerSource};

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Listening,
    Stopped,
}

/// Counters reported when the loop exits
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub connects: u32,
    pub triggers: u32,
    pub presets_failed: u32,
    pub unmapped: u32,
}

pub struct ListenerLoop {
    source: Box<dyn TriggerSource>,
    /// MIDI channel (0-15)
    channel: u8,
    presets: Arc<PresetTable>,
    executor: PresetExecutor,
    backoff: Backoff,
    state: ListenerState,
    stats: ListenerStats,
}

impl ListenerLoop {
    /// # Arguments
    /// * `channel` - MIDI channel 1-16 triggers must arrive on
    pub fn new(
        source: Box<dyn TriggerSource>,
        channel: u8,
        presets: Arc<PresetTable>,
        executor: PresetExecutor,
    ) -> Self {
        Self {
            source,
            channel: channel.saturating_sub(1).min(15),
            presets,
            executor,
            backoff: Backoff::default(),
            state: ListenerState::Connecting,
            stats: ListenerStats::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run until `shutdown` resolves
    ///
    /// Shutdown is only observed between events: a preset that has started
    /// always runs to completion.
    pub async fn run<F>(&mut self, shutdown: F) -> ListenerStats
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(
            "🎹 Listening for triggers on {} (channel {}, {} presets)",
            self.source.describe(),
            self.channel + 1,
            self.presets.len()
        );

        'outer: loop {
            self.state = ListenerState::Connecting;
            let connected = tokio::select! {
                _ = &mut shutdown => break 'outer,
                result = self.source.connect() => result,
            };

            if let Err(e) = connected {
                let delay = self.backoff.next_delay();
                warn!(
                    "Trigger source {} unavailable: {} (retry #{} in {:?})",
                    self.source.describe(),
                    e,
                    self.backoff.attempt(),
                    delay
                );
                tokio::select! {
                    _ = &mut shutdown => break 'outer,
                    _ = sleep(delay) => continue 'outer,
                }
            }

            self.stats.connects += 1;
            self.state = ListenerState::Listening;
            info!("✅ Trigger source connected: {}", self.source.describe());

            // A source that accepts and then drops straight away keeps backing off
            let mut delivered = false;
            loop {
                let batch = tokio::select! {
                    _ = &mut shutdown => break 'outer,
                    batch = self.source.next_messages() => batch,
                };

                match batch {
                    Ok(messages) => {
                        if !delivered {
                            delivered = true;
                            self.backoff.reset();
                        }
                        for message in messages {
                            self.handle_message(message).await;
                        }
                    }
                    Err(e) => {
                        warn!("Trigger source {} lost: {}", self.source.describe(), e);
                        self.source.disconnect();
                        break;
                    }
                }
            }

            self.state = ListenerState::Connecting;
            let delay = self.backoff.next_delay();
            debug!("Reconnecting to {} in {:?}", self.source.describe(), delay);
            tokio::select! {
                _ = &mut shutdown => break 'outer,
                _ = sleep(delay) => {}
            }
        }

        info!("🛑 Listener stopping");
        self.source.disconnect();
        self.executor.shutdown().await;
        self.state = ListenerState::Stopped;
        self.stats.clone()
    }

    /// Handle one incoming message, running its preset if it is a trigger
    pub async fn handle_message(&mut self, message: MidiMessage) -> Option<ExecutionReport> {
        let note = match message {
            MidiMessage::NoteOn { channel, note, velocity } if velocity > 0 && channel == self.channel => note,
            other => {
                debug!("Ignoring {:?}", other);
                return None;
            }
        };

        self.stats.triggers += 1;
        let Some(preset) = self.presets.get(note) else {
            self.stats.unmapped += 1;
            info!("Note {} ({}) has no preset assigned", note, NoteTable::label(note));
            return None;
        };

        let report = self.executor.execute(preset).await;
        if !report.is_success() {
            self.stats.presets_failed += 1;
        }
        Some(report)
    }
}
