/*!
# Range Control Application

Command-line controller for moving range targets. Scenarios are kept in a
name-keyed registry (built-in captures plus a scenario file), sent to the
target controller over a serial port, and dispatched automatically when the
requested distance of a firing line changes.

## Usage

### Inspect scenarios
```bash
range_control list
range_control show range_3m_pulse1
range_control decode "7E 00 01 02 74 00 FD FD FD FD 00 00 ..."
```

### Send manually
```bash
range_control send range_3m_pulse1 --port /dev/ttyUSB0
range_control auto --remote 5 --distance 30 --dry-run
```

### Automatic dispatch
```bash
range_control watch
range_control lines
```

### Edit the scenario file
```bash
range_control import "captured 10m" 7E 00 03 ...
range_control clone test1 "test1 copy"
range_control copies range_3m_pulse1 --prefix lane --count 4
range_control edit "test1 copy" --add set-range --param 1500 --at 2
```
*/

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use range_core::catalog::{self, CATALOG};
use range_core::storage::{format_hex, load_scenarios, parse_hex_bytes, save_scenarios};
use range_core::{packet, Command, Scenario, ScenarioRegistry, ScenarioResolver};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod source;
mod transport;

use config::{AppConfig, DEFAULT_CONFIG_FILE};
use dispatch::{DispatchEngine, DispatchEvent};
use transport::{send_scenario_packet, DryRunTransport, PortSettings, SerialTransport, Transport};

#[derive(Parser)]
#[command(name = "range_control")]
#[command(about = "Moving range target scenario controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Clone, Default)]
struct PortArgs {
    /// Serial port name (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(long)]
    baud: Option<u32>,

    /// Log packets instead of writing to the port
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List scenarios
    List {
        /// Print the registry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one scenario with its commands and packet bytes
    Show { name: String },

    /// Decode a hex packet without storing it
    Decode {
        /// Packet bytes, e.g. "7E 00 01 ..."
        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,
    },

    /// List the command catalog
    Commands,

    /// Send a scenario by name
    Send {
        name: String,

        #[command(flatten)]
        port: PortArgs,
    },

    /// Resolve a scenario for a distance and remote type, then send it
    Auto {
        /// Remote type, 1-6
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=6))]
        remote: u8,

        /// Distance in meters
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        distance: u32,

        #[command(flatten)]
        port: PortArgs,
    },

    /// Poll the distance source and dispatch scenarios on every change
    Watch {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Print the requested distance of every line without sending anything
    Lines,

    /// Import a captured packet from hex
    Import {
        name: String,

        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,

        /// Replace an existing scenario
        #[arg(long)]
        force: bool,
    },

    /// Copy a scenario under a new name
    Clone {
        source: String,
        name: String,

        #[arg(long)]
        force: bool,
    },

    /// Create numbered copies of a scenario
    Copies {
        template: String,

        #[arg(long, default_value = "copy")]
        prefix: String,

        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Delete a scenario
    Delete { name: String },

    /// Edit a scenario's commands, remote type or name
    Edit {
        name: String,

        /// Append (or insert with --at) a catalog command
        #[arg(long)]
        add: Option<String>,

        /// Parameter for --add
        #[arg(long)]
        param: Option<u16>,

        /// 1-based insert position for --add
        #[arg(long)]
        at: Option<usize>,

        /// Remove the command at this 1-based position
        #[arg(long)]
        remove: Option<usize>,

        /// Move a command: FROM TO (1-based)
        #[arg(long = "move", num_args = 2, value_names = ["FROM", "TO"])]
        move_positions: Option<Vec<usize>>,

        #[arg(long)]
        remote_type: Option<u8>,

        #[arg(long)]
        rename: Option<String>,

        /// Allow --rename to replace an existing scenario
        #[arg(long)]
        force: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays usable for listings and JSON
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if let Commands::Config { output } = &cli.command {
        return generate_config_file(output);
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;
    let scenario_file = PathBuf::from(&config.dispatch.scenario_file);
    let mut registry = load_registry(&scenario_file)?;

    match cli.command {
        Commands::List { json } => list_scenarios(&registry, json),
        Commands::Show { name } => show_scenario(&registry, &name),
        Commands::Decode { hex } => decode_packet(&hex.join(" ")),
        Commands::Commands => {
            list_catalog();
            Ok(())
        }
        Commands::Send { name, port } => {
            let packet = registry.wire_bytes(&name)?;
            println!("📡 Sending scenario '{}'", name);
            send_packet(&mut config, &port, &packet)
        }
        Commands::Auto { remote, distance, port } => {
            registry.prepare_auto_scenarios();
            let resolver = ScenarioResolver::new(config.naming.clone());
            let (name, kind) = resolver.resolve_with_kind(&registry, distance, remote)?;
            println!("🎯 {} m / remote {} -> '{}' ({:?})", distance, remote, name, kind);
            let packet = registry.wire_bytes(&name)?;
            send_packet(&mut config, &port, &packet)
        }
        Commands::Watch { port } => run_watch(config, registry, &port),
        Commands::Lines => monitor_lines(&config),
        Commands::Import { name, hex, force } => {
            let data = parse_hex_bytes(&hex.join(" "))?;
            let scenario = registry.import_packet(&name, data, force)?;
            println!(
                "📥 Imported '{}' (remote {}, {} bytes, {} commands)",
                scenario.name,
                scenario.remote_type,
                scenario.raw_bytes.len(),
                scenario.commands.len()
            );
            store_registry(&scenario_file, &registry)
        }
        Commands::Clone { source, name, force } => {
            registry.clone_scenario(&source, &name, force)?;
            println!("📋 Cloned '{}' as '{}'", source, name);
            store_registry(&scenario_file, &registry)
        }
        Commands::Copies { template, prefix, count } => {
            let names = registry.generate_copies(&template, &prefix, count)?;
            println!("📋 Created {} copies of '{}': {}", names.len(), template, names.join(", "));
            store_registry(&scenario_file, &registry)
        }
        Commands::Delete { name } => {
            registry.remove(&name)?;
            println!("🗑️ Deleted '{}'", name);
            store_registry(&scenario_file, &registry)
        }
        Commands::Edit {
            name,
            add,
            param,
            at,
            remove,
            move_positions,
            remote_type,
            rename,
            force,
        } => {
            let edit = ScenarioEdit::new(add, param, at, remove, move_positions, remote_type)?;
            let mut current = name;
            if !edit.is_empty() {
                let scenario = registry.edit(&current, |s| edit.apply(s))?;
                println!("✏️ Updated '{}' ({} commands)", scenario.name, scenario.commands.len());
            }
            if let Some(new_name) = rename {
                registry.rename(&current, &new_name, force)?;
                println!("✏️ Renamed '{}' to '{}'", current, new_name);
                current = new_name;
            }
            show_scenario(&registry, &current)?;
            store_registry(&scenario_file, &registry)
        }
        Commands::Config { .. } => Ok(()),
    }
}

/// Built-in scenarios overlaid with the scenario file
fn load_registry(path: &Path) -> Result<ScenarioRegistry> {
    let mut registry = ScenarioRegistry::with_builtin();
    load_scenarios(path, &mut registry)
        .with_context(|| format!("Failed to load scenarios from {}", path.display()))?;
    Ok(registry)
}

fn store_registry(path: &Path, registry: &ScenarioRegistry) -> Result<()> {
    let written = save_scenarios(path, registry)
        .with_context(|| format!("Failed to save scenarios to {}", path.display()))?;
    println!("💾 Saved {} scenarios to {}", written, path.display());
    Ok(())
}

fn apply_port_args(config: &mut AppConfig, args: &PortArgs) {
    if let Some(port) = &args.port {
        config.port.name = port.clone();
    }
    if let Some(baud) = args.baud {
        config.port.baud_rate = baud;
    }
}

fn make_transport(dry_run: bool) -> Box<dyn Transport> {
    if dry_run {
        Box::new(DryRunTransport)
    } else {
        Box::new(SerialTransport)
    }
}

fn send_packet(config: &mut AppConfig, args: &PortArgs, packet: &[u8]) -> Result<()> {
    apply_port_args(config, args);
    let mut transport = make_transport(args.dry_run);
    let report = send_scenario_packet(
        transport.as_mut(),
        &PortSettings::from(&config.port),
        &config.session,
        packet,
    )?;

    match report.response {
        Some(response) => println!("✅ Sent {} bytes, response: {}", report.bytes_written, format_hex(&response)),
        None => println!("✅ Sent {} bytes, no response", report.bytes_written),
    }
    Ok(())
}

/// Run automatic dispatch until Ctrl+C
fn run_watch(mut config: AppConfig, registry: ScenarioRegistry, args: &PortArgs) -> Result<()> {
    apply_port_args(&mut config, args);
    println!("🚀 Starting automatic dispatch on {} ({} baud)", config.port.name, config.port.baud_rate);
    if args.dry_run {
        println!("🧪 Dry run: packets are logged, not written");
    }

    let distance_source = source::from_config(&config.source)?;
    let (events_tx, events_rx) = unbounded();
    let engine = DispatchEngine::new(registry.into_shared(), distance_source, make_transport(args.dry_run), &config)
        .with_events(events_tx);

    // Set up Ctrl+C handler
    let running = engine.get_running_flag();
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        running.store(false, Ordering::SeqCst);
    })?;

    let handle = engine.start()?;
    while handle.is_running() {
        match events_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => print_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let stats = handle.join()?;
    println!(
        "✅ Dispatch stopped: {} changes, {} sent, {} unresolved, {} failed",
        stats.changes, stats.transmitted, stats.unresolved, stats.transmit_failures
    );
    Ok(())
}

/// Poll the distance source on the backoff cadence until Ctrl+C
fn monitor_lines(config: &AppConfig) -> Result<()> {
    let mut distance_source = source::from_config(&config.source)?;
    let interval = config.dispatch.backoff();
    println!("👀 Monitoring line distances every {:?} (Ctrl+C to stop)", interval);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        match distance_source.fetch() {
            Ok(distances) if distances.is_empty() => println!("[{}] No lines reported", timestamp),
            Ok(distances) => {
                println!("[{}] {} lines:", timestamp, distances.len());
                for line in source::describe_lines(&distances) {
                    println!("  {}", line);
                }
            }
            Err(e) => warn!("⚠️ Failed to read distances: {}", e),
        }

        let deadline = Instant::now() + interval;
        while running.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    println!("✅ Monitoring stopped");
    Ok(())
}

fn print_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::Transmitted { line_id, distance, scenario, report, .. } => {
            println!("📤 {} -> {} m: sent '{}' ({} bytes)", line_id, distance, scenario, report.bytes_written)
        }
        DispatchEvent::Unresolved { line_id, line, distance } => {
            println!("⚠️ {} -> {} m: no scenario for remote {}", line_id, distance, line)
        }
        DispatchEvent::TransmitFailed { line_id, distance, reason, .. } => {
            println!("❌ {} -> {} m: {}", line_id, distance, reason)
        }
        DispatchEvent::SourceFailed { reason } => println!("❌ Distance source: {}", reason),
    }
}

fn list_scenarios(registry: &ScenarioRegistry, json: bool) -> Result<()> {
    if json {
        let scenarios: Vec<&Scenario> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(());
    }

    for scenario in registry.iter() {
        let origin = if scenario.has_raw_bytes() { "raw" } else { "encoded" };
        println!(
            "{:<32} remote {}  {:>2} commands  ({})",
            scenario.name,
            scenario.remote_type,
            scenario.commands.len(),
            origin
        );
    }
    println!("{} scenarios", registry.len());
    Ok(())
}

fn print_commands(commands: &[Command]) {
    for (i, command) in commands.iter().enumerate() {
        let description = catalog::entry_for_code(command.code).map_or("", |e| e.description);
        println!("  {:>2}. {:<24} {}", i + 1, command.to_string(), description);
    }
}

fn show_scenario(registry: &ScenarioRegistry, name: &str) -> Result<()> {
    let scenario = registry
        .get(name)
        .ok_or_else(|| anyhow!("Scenario '{}' not found", name))?;

    println!("Scenario:    {}", scenario.name);
    println!("Remote type: {}", scenario.remote_type);
    println!("Commands:");
    print_commands(&scenario.commands);

    match scenario.wire_bytes() {
        Ok(bytes) => println!("Packet ({} bytes): {}", bytes.len(), format_hex(&bytes)),
        Err(e) => warn!("No packet for '{}': {}", scenario.name, e),
    }
    Ok(())
}

fn decode_packet(input: &str) -> Result<()> {
    let data = parse_hex_bytes(input)?;
    let scenario = packet::decode(&data)?;

    println!("Name:        {}", scenario.name);
    println!("Remote type: {}", scenario.remote_type);
    println!("Checksum:    {:02X}", data.last().copied().unwrap_or_default());
    println!("Commands:");
    print_commands(&scenario.commands);
    Ok(())
}

fn list_catalog() {
    for entry in CATALOG {
        let param = entry.param_label.map(|p| format!(" <{}>", p)).unwrap_or_default();
        println!("{:<20} {:04X}  {}{}", entry.key, entry.code, entry.description, param);
    }
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;
    println!("✅ Generated configuration file: {}", output_path.display());
    info!("Edit [port] and [source] before running 'watch'");
    Ok(())
}

/// Command-list changes requested on the command line, with 0-based positions
#[derive(Debug, Default, PartialEq)]
struct ScenarioEdit {
    remote_type: Option<u8>,
    remove: Option<usize>,
    move_positions: Option<(usize, usize)>,
    add: Option<(Command, Option<usize>)>,
}

fn zero_based(position: usize) -> Result<usize> {
    position
        .checked_sub(1)
        .ok_or_else(|| anyhow!("Positions start at 1"))
}

impl ScenarioEdit {
    fn new(
        add: Option<String>,
        param: Option<u16>,
        at: Option<usize>,
        remove: Option<usize>,
        move_positions: Option<Vec<usize>>,
        remote_type: Option<u8>,
    ) -> Result<Self> {
        let add = match add {
            Some(key) => {
                let position = at.map(zero_based).transpose()?;
                Some((Command::from_name(&key, param)?, position))
            }
            None if param.is_some() || at.is_some() => bail!("--param and --at need --add"),
            None => None,
        };

        let move_positions = match move_positions.as_deref() {
            Some([from, to]) => Some((zero_based(*from)?, zero_based(*to)?)),
            Some(_) => bail!("--move takes FROM and TO"),
            None => None,
        };

        Ok(Self {
            remote_type,
            remove: remove.map(zero_based).transpose()?,
            move_positions,
            add,
        })
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Remote type first, then remove, move and add
    fn apply(&self, scenario: &mut Scenario) -> Result<(), range_core::ScenarioError> {
        if let Some(remote_type) = self.remote_type {
            scenario.set_remote_type(remote_type)?;
        }
        if let Some(position) = self.remove {
            scenario.remove_command(position)?;
        }
        if let Some((from, to)) = self.move_positions {
            scenario.move_command(from, to)?;
        }
        if let Some((command, position)) = &self.add {
            match position {
                Some(position) => scenario.insert_command(*position, command.clone())?,
                None => scenario.push_command(command.clone()),
            }
        }
        Ok(())
    }
}
