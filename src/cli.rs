//! Terminal listings for `--list-ports` and `--check`

use anyhow::{Context, Result};
use colored::*;
use midir::{MidiInput, MidiOutput};

use softkey_bridge::config::AppConfig;
use softkey_bridge::preset::{Command, PresetTable};

pub fn list_ports_formatted() -> Result<()> {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    let midi_in = MidiInput::new("Softkey-Bridge-Discovery").context("Failed to create MIDI input")?;
    println!("\n{}", "Input Ports:".bold());
    let inputs: Vec<String> = midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect();
    print_ports(&inputs);

    let midi_out = MidiOutput::new("Softkey-Bridge-Discovery").context("Failed to create MIDI output")?;
    println!("\n{}", "Output Ports:".bold());
    let outputs: Vec<String> = midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect();
    print_ports(&outputs);

    println!();
    Ok(())
}

fn print_ports(names: &[String]) {
    if names.is_empty() {
        println!("  {}", "No ports found".dimmed());
        return;
    }
    for (i, name) in names.iter().enumerate() {
        println!("  {} {}", format!("[{}]", i).yellow(), name);
    }
}

/// Print the resolved configuration for `--check`
pub fn print_preset_table(config: &AppConfig, table: &PresetTable) {
    println!("\n{}", "=== Configuration OK ===".bold().bright_green());

    match &config.mixer {
        Some(mixer) => match mixer.endpoint() {
            Ok(endpoint) => println!("  {:<10} {}", "Mixer:".bold(), endpoint),
            Err(e) => println!("  {:<10} {}", "Mixer:".bold(), e.to_string().red()),
        },
        None => println!("  {:<10} {}", "Mixer:".bold(), "not configured".dimmed()),
    }
    match &config.switcher {
        Some(sw) => println!(
            "  {:<10} {}:{} (timeout {} ms)",
            "Switcher:".bold(),
            sw.host,
            sw.port,
            sw.timeout_ms
        ),
        None => println!("  {:<10} {}", "Switcher:".bold(), "not configured".dimmed()),
    }
    if let Ok(trigger) = config.trigger_endpoint() {
        println!(
            "  {:<10} {} (channel {})",
            "Triggers:".bold(),
            trigger,
            config.listener.channel
        );
    }
    println!("  {:<10} {:?}", "On error:".bold(), config.on_error);

    println!("\n{} ({})", "Presets:".bold(), table.len());
    if table.is_empty() {
        println!("  {}", "No presets defined".dimmed());
    }
    for preset in table.iter() {
        println!(
            "\n  {} {}",
            preset.label.bright_white().bold(),
            format!("(note {})", preset.note).dimmed()
        );
        for block in &preset.blocks {
            println!("    {}", block.device.to_string().cyan());
            for command in &block.commands {
                let line = command.to_string();
                match command {
                    Command::Wait(_) => println!("      {}", line.yellow()),
                    _ => println!("      {}", line),
                }
            }
        }
    }
    println!();
}
