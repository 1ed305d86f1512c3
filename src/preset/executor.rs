//! Sequential preset execution with per-block failure isolation

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{Command, DeviceBlock, DeviceKind, Preset};
use crate::drivers::Driver;
use crate::error::DeviceError;

/// What happens to the rest of a preset once a command fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Skip the rest of the failing block, carry on with the next one
    #[default]
    AbortBlock,
    /// Skip the rest of the failing block and every block after it
    AbortPreset,
}

/// Result of one device block
#[derive(Debug)]
pub enum BlockOutcome {
    Completed,
    Aborted {
        index: usize,
        command: String,
        error: DeviceError,
    },
    Skipped,
}

#[derive(Debug)]
pub struct BlockReport {
    pub device: DeviceKind,
    pub outcome: BlockOutcome,
}

/// Per-block results of one preset run
#[derive(Debug)]
pub struct ExecutionReport {
    pub note: u8,
    pub label: String,
    pub blocks: Vec<BlockReport>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| matches!(b.outcome, BlockOutcome::Completed))
    }

    pub fn failures(&self) -> impl Iterator<Item = &BlockReport> {
        self.blocks
            .iter()
            .filter(|b| !matches!(b.outcome, BlockOutcome::Completed))
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (note {}):", self.label, self.note)?;
        for block in &self.blocks {
            match &block.outcome {
                BlockOutcome::Completed => write!(f, " {}=ok", block.device)?,
                BlockOutcome::Aborted { index, command, error } => write!(
                    f,
                    " {}=aborted at #{} {} ({})",
                    block.device, index, command, error
                )?,
                BlockOutcome::Skipped => write!(f, " {}=skipped", block.device)?,
            }
        }
        Ok(())
    }
}

/// Runs presets against the configured device drivers
pub struct PresetExecutor {
    drivers: Vec<Box<dyn Driver>>,
    policy: ErrorPolicy,
}

impl PresetExecutor {
    pub fn new(drivers: Vec<Box<dyn Driver>>, policy: ErrorPolicy) -> Self {
        Self { drivers, policy }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Devices that have a driver
    pub fn devices(&self) -> impl Iterator<Item = DeviceKind> + '_ {
        self.drivers.iter().map(|d| d.kind())
    }

    /// Execute every block of `preset` in order
    ///
    /// Never returns early on a device failure; the report carries one entry
    /// per block.
    pub async fn execute(&mut self, preset: &Preset) -> ExecutionReport {
        info!("🎬 Preset {} (note {})", preset.label, preset.note);

        let mut blocks = Vec::with_capacity(preset.blocks.len());
        let mut halted = false;

        for block in &preset.blocks {
            if halted {
                debug!("Skipping {} block of {}", block.device, preset.label);
                blocks.push(BlockReport { device: block.device, outcome: BlockOutcome::Skipped });
                continue;
            }

            let outcome = self.run_block(&preset.label, block).await;
            if matches!(outcome, BlockOutcome::Aborted { .. }) && self.policy == ErrorPolicy::AbortPreset {
                halted = true;
            }
            blocks.push(BlockReport { device: block.device, outcome });
        }

        let report = ExecutionReport {
            note: preset.note,
            label: preset.label.clone(),
            blocks,
        };
        if report.is_success() {
            info!("✅ Preset {} done", preset.label);
        } else {
            warn!("Preset finished with failures: {}", report);
        }
        report
    }

    async fn run_block(&mut self, preset: &str, block: &DeviceBlock) -> BlockOutcome {
        let Some(driver) = self.drivers.iter_mut().find(|d| d.kind() == block.device) else {
            let error = DeviceError::connection(block.device.as_str(), "device is not configured");
            error!(preset = %preset, device = %block.device, "{}", error);
            return BlockOutcome::Aborted {
                index: 0,
                command: block
                    .commands
                    .first()
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
                error,
            };
        };

        for (index, command) in block.commands.iter().enumerate() {
            if let Command::Wait(duration) = command {
                debug!(preset = %preset, device = %block.device, "Waiting {:?}", duration);
                sleep(*duration).await;
                continue;
            }

            debug!(preset = %preset, device = %block.device, index, "▶ {}", command);
            if let Err(e) = driver.execute(command).await {
                match &e {
                    DeviceError::Protocol { .. } => warn!(
                        preset = %preset,
                        device = %block.device,
                        index,
                        command = %command,
                        "Device rejected command: {}",
                        e
                    ),
                    _ => error!(
                        preset = %preset,
                        device = %block.device,
                        index,
                        command = %command,
                        kind = e.kind(),
                        "Command failed: {}",
                        e
                    ),
                }
                return BlockOutcome::Aborted {
                    index,
                    command: command.to_string(),
                    error: e,
                };
            }
        }

        BlockOutcome::Completed
    }

    /// Close every driver connection
    pub async fn shutdown(&mut self) {
        for driver in self.drivers.iter_mut() {
            driver.shutdown().await;
        }
    }
}
