// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PLDM over MCTP daemon
//!
//! Runs the MCTP binding on the emulated interconnect and inventories the
//! configured PLDM termini.
//!
//! # Usage
//!
//! ```bash
//! # Endpoint, waiting for a bus owner to assign an EID
//! pldm-mctpd --bdf 03:00.0
//!
//! # Bus owner inventorying EIDs 9 and 10
//! pldm-mctpd --mode bus-owner --static-eid 8 --terminus 9 --terminus 10
//!
//! # Using configuration file
//! pldm-mctpd --config pldm-mctpd.toml
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use pldm_mctp::mctp::{Bdf, Eid, Transport, UdpEmulatorTransport};
use pldm_mctp::{
    Binding, BindingMode, Correlator, DaemonConfig, FirmwareInventory, InventoryRecord, Tid,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Inbound PLDM messages buffered between the binding and the correlator.
const INBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Endpoint,
    BusOwner,
}

impl From<Mode> for BindingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Endpoint => BindingMode::Endpoint,
            Mode::BusOwner => BindingMode::BusOwner,
        }
    }
}

/// PLDM over MCTP daemon
#[derive(Parser, Debug)]
#[command(name = "pldm-mctpd")]
#[command(about = "MCTP endpoint discovery and PLDM firmware inventory")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Binding role
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Routing address of this node (bb:dd.f or 16-bit value)
    #[arg(long)]
    bdf: Option<Bdf>,

    /// Static EID (required in bus-owner mode)
    #[arg(long)]
    static_eid: Option<Eid>,

    /// Local UDP address of the interconnect emulator
    #[arg(long)]
    local: Option<SocketAddr>,

    /// Peer UDP address of the interconnect emulator
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// EID to register as a PLDM terminus and inventory (can repeat)
    #[arg(short, long = "terminus")]
    termini: Vec<Eid>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "pldm-mctpd.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    let transport: Arc<dyn Transport> = Arc::new(
        UdpEmulatorTransport::bind(config.transport.local, config.transport.peer).await?,
    );
    let binding = Binding::new(&config.binding, transport);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    info!(
        "pldm-mctpd v{}: {:?} mode, BDF {}, emulator {} -> {}",
        env!("CARGO_PKG_VERSION"),
        config.binding.mode,
        config.binding.bdf,
        config.transport.local,
        config.transport.peer
    );

    let mut binding_task = {
        let binding = binding.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { binding.run(inbound_tx, shutdown).await })
    };

    tokio::spawn(publish_properties(binding.subscribe()));

    if config.binding.mode == BindingMode::Endpoint {
        if let Err(e) = binding.discovery_notify().await {
            warn!("Discovery notify failed: {}", e);
        }
    }

    let correlator = Correlator::new(Arc::new(binding.clone()));
    let correlator_task = {
        let correlator = correlator.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { correlator.run(inbound_rx, shutdown).await })
    };

    let inventory = FirmwareInventory::new(config.pldm.timeout(), config.pldm.retry_count);
    for &eid in &config.pldm.termini {
        match correlator.register_terminus(eid) {
            Ok(tid) => {
                tokio::spawn(run_inventory(correlator.clone(), inventory.clone(), tid, eid));
            }
            Err(e) => error!("Cannot register EID {}: {}", eid, e),
        }
    }

    println!("Press Ctrl+C to stop...");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            match binding_task.await {
                Ok(Err(e)) => error!("Binding stopped with error: {}", e),
                Err(e) => error!("Binding task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut binding_task => {
            let _ = shutdown_tx.send(true);
            match result {
                Ok(Ok(())) => info!("Binding stopped"),
                Ok(Err(e)) => {
                    error!("Binding stopped: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let _ = correlator_task.await;
    Ok(())
}

fn build_config(args: &Args) -> Result<DaemonConfig, Box<dyn std::error::Error>> {
    let mut config = match args.config {
        Some(ref path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.binding.mode = mode.into();
    }
    if let Some(bdf) = args.bdf {
        config.binding.bdf = bdf;
    }
    if args.static_eid.is_some() {
        config.binding.static_eid = args.static_eid;
    }
    if let Some(local) = args.local {
        config.transport.local = local;
    }
    if let Some(peer) = args.peer {
        config.transport.peer = peer;
    }
    if !args.termini.is_empty() {
        config.pldm.termini = args.termini.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Log every binding property change as JSON.
async fn publish_properties(mut properties: watch::Receiver<pldm_mctp::BindingProperties>) {
    while properties.changed().await.is_ok() {
        let props = *properties.borrow_and_update();
        match serde_json::to_string(&props) {
            Ok(json) => info!("Binding properties changed: {}", json),
            Err(e) => warn!("Cannot serialize binding properties: {}", e),
        }
    }
}

async fn run_inventory(correlator: Correlator, inventory: FirmwareInventory, tid: Tid, eid: Eid) {
    let mut requester = match correlator.requester(tid) {
        Ok(requester) => requester,
        Err(e) => {
            error!("TID {}: {}", tid, e);
            return;
        }
    };

    match inventory.run(&mut requester).await {
        Ok(record) => print_record(tid, eid, &record),
        Err(e) => error!("TID {} (EID {}): inventory failed: {}", tid, eid, e),
    }
}

fn print_record(tid: Tid, eid: Eid, record: &InventoryRecord) {
    match serde_json::to_string_pretty(record) {
        Ok(json) => println!("TID {} (EID {}) inventory:\n{}", tid, eid, json),
        Err(e) => error!("TID {}: cannot serialize inventory: {}", tid, e),
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = DaemonConfig::default();
    config.binding.mode = BindingMode::BusOwner;
    config.binding.static_eid = Some(8);
    config.transport.local = SocketAddr::from(([127, 0, 0, 1], 9600));
    config.transport.peer = SocketAddr::from(([127, 0, 0, 1], 9601));
    config.pldm.termini = vec![9, 10];

    let content = format!(
        r#"# pldm-mctpd Configuration
# Generated by pldm-mctpd gen-config

{}
"#,
        config.to_toml()?
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match DaemonConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Mode: {:?}", config.binding.mode);
            println!("BDF: {}", config.binding.bdf);
            if let Some(eid) = config.binding.static_eid {
                println!("Static EID: {}", eid);
            }
            println!(
                "Emulator: {} -> {}",
                config.transport.local, config.transport.peer
            );
            println!("Termini: {:?}", config.pldm.termini);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
