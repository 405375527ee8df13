//! MIDI monitor for debugging and development.
//!
//! Prints decoded traffic from MIDI inputs, which is the quickest way to
//! check what a Launchkey actually emits for a given control.

use anyhow::Result;
use colored::*;
use midir::{MidiInput, MidiInputConnection, MidiOutput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::midi::{format_hex, MidiMessage};
use crate::ports::{probe, PortDescriptor, PortDirection, ProbeSpec};

/// One observed inbound message.
#[derive(Debug, Clone)]
struct MonitorEvent {
    timestamp_ms: u64,
    port_name: String,
    data: Vec<u8>,
    message: Option<MidiMessage>,
}

/// Monitor MIDI traffic until Ctrl+C. With a pattern, only the first
/// matching input is attached; without one, every input is.
pub async fn run_monitor(pattern: Option<&str>) -> Result<()> {
    println!("{}", "=== MIDI Monitor ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let mut monitor = Monitor::new();
    match pattern {
        Some(pattern) => monitor.connect_matching(pattern)?,
        None => monitor.connect_all_inputs()?,
    }

    println!("\n{}", "Monitoring MIDI traffic...".green());
    println!("{}", "Format: [timestamp] PORT | HEX => PARSED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    monitor.run().await
}

struct Monitor {
    connections: Vec<MidiInputConnection<()>>,
    event_rx: mpsc::Receiver<MonitorEvent>,
    event_tx: mpsc::Sender<MonitorEvent>,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl Monitor {
    fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);

        Self {
            connections: Vec::new(),
            event_rx,
            event_tx,
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
        }
    }

    /// Attach to the first input matching `pattern`: a port index, or a
    /// case-insensitive name fragment.
    fn connect_matching(&mut self, pattern: &str) -> Result<()> {
        let midi_in = MidiInput::new("launchkey-surface monitor")?;

        if let Ok(index) = pattern.parse::<usize>() {
            if let Some(port) = midi_in.ports().into_iter().nth(index) {
                if let Ok(name) = midi_in.port_name(&port) {
                    self.connect_port(midi_in, port, &name)?;
                    return Ok(());
                }
            }
            anyhow::bail!("No port found at index: {}", index)
        } else {
            for port in midi_in.ports() {
                if let Ok(name) = midi_in.port_name(&port) {
                    if name.to_lowercase().contains(&pattern.to_lowercase()) {
                        self.connect_port(midi_in, port, &name)?;
                        return Ok(());
                    }
                }
            }
            anyhow::bail!("No port found matching pattern: {}", pattern)
        }
    }

    fn connect_all_inputs(&mut self) -> Result<()> {
        let lister = MidiInput::new("launchkey-surface monitor list")?;
        let names: Vec<String> = lister
            .ports()
            .iter()
            .filter_map(|p| lister.port_name(p).ok())
            .collect();

        for (index, name) in names.iter().enumerate() {
            let midi_in = MidiInput::new(&format!("launchkey-surface monitor {}", index))?;
            if let Some(port) = midi_in.ports().into_iter().nth(index) {
                self.connect_port(midi_in, port, name)?;
            }
        }

        if self.connections.is_empty() {
            anyhow::bail!("No MIDI input ports found");
        }

        Ok(())
    }

    fn connect_port(
        &mut self,
        midi_in: MidiInput,
        port: midir::MidiInputPort,
        port_name: &str,
    ) -> Result<()> {
        let event_tx = self.event_tx.clone();
        let port_name = port_name.to_string();
        let start_time = self.start_time;

        info!("Connecting to: {}", port_name);

        let conn = midi_in.connect(
            &port,
            "monitor",
            move |_timestamp, data, _| {
                let elapsed = Instant::now() - start_time;
                let event = MonitorEvent {
                    timestamp_ms: elapsed.as_millis() as u64,
                    port_name: port_name.clone(),
                    data: data.to_vec(),
                    message: MidiMessage::parse(data),
                };
                let _ = event_tx.try_send(event);
            },
            (),
        )?;

        self.connections.push(conn);
        Ok(())
    }

    async fn run(mut self) -> Result<()> {
        let running = self.running.clone();

        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            running.store(false, Ordering::Relaxed);
        });

        while self.running.load(Ordering::Relaxed) {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.print_event(&event);
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }

        println!("\n{}", "Monitor stopped".yellow());
        Ok(())
    }

    fn print_event(&self, event: &MonitorEvent) {
        let timestamp = format!("{:08}", event.timestamp_ms);
        let port = truncate_name(&event.port_name, 20);
        let hex = format_hex(&event.data);

        let parsed = if let Some(ref msg) = event.message {
            format!(" => {}", msg.to_string().bright_blue())
        } else {
            String::new()
        };

        // Color code by message type
        let hex_colored = if let Some(ref msg) = event.message {
            match msg {
                MidiMessage::NoteOn { .. } => hex.bright_green(),
                MidiMessage::NoteOff { .. } => hex.bright_red(),
                MidiMessage::ControlChange { .. } => hex.bright_yellow(),
                MidiMessage::PitchBend { .. } => hex.bright_cyan(),
                MidiMessage::SysEx { .. } => hex.bright_magenta(),
                _ => hex.normal(),
            }
        } else {
            hex.bright_black()
        };

        println!(
            "[{}ms] {:20} | {}{}",
            timestamp.dimmed(),
            port.white(),
            hex_colored,
            parsed
        );
    }
}

fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() > max {
        let head: String = name.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

/// List all ports and whether the Launchkey probe matches any of them.
pub fn list_ports_formatted(spec: &ProbeSpec) -> Result<()> {
    let midi_in = MidiInput::new("launchkey-surface list")?;
    let midi_out = MidiOutput::new("launchkey-surface list")?;

    let mut scan = Vec::new();

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    println!("\n{}", "Input Ports:".bold());
    let inputs = midi_in.ports();
    if inputs.is_empty() {
        println!("  {}", "No input ports found".dimmed());
    }
    for (index, port) in inputs.iter().enumerate() {
        if let Ok(name) = midi_in.port_name(port) {
            println!("  [{}] {}", index, name);
            scan.push(PortDescriptor::new(name, PortDirection::Source));
        }
    }

    println!("\n{}", "Output Ports:".bold());
    let outputs = midi_out.ports();
    if outputs.is_empty() {
        println!("  {}", "No output ports found".dimmed());
    }
    for (index, port) in outputs.iter().enumerate() {
        if let Ok(name) = midi_out.port_name(port) {
            println!("  [{}] {}", index, name);
            scan.push(PortDescriptor::new(name, PortDirection::Sink));
        }
    }

    match probe(&scan, spec) {
        Some(found) => {
            println!("\n{}", "Auto-detected Launchkey MK3 DAW ports:".bold().bright_green());
            println!("  Read from: {}", found.input.bright_white());
            println!("  Write to:  {}", found.output.bright_white());
        }
        None => println!("\n{}", "No Launchkey MK3 DAW ports detected".yellow()),
    }

    println!();
    Ok(())
}
