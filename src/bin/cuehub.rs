// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The `cuehub` binary: wires the concrete, on-disk/on-wire collaborator
//! implementations together behind the engine's trait boundary and runs
//! the main loop. Module registration (what OSC/MIDI endpoints exist, how
//! they map to each other) is left to an embedder calling [cuehub::prelude]
//! directly; this binary is the minimal host that makes the crate runnable
//! stand-alone.

use anyhow::{Context, Result};
use clap::Parser;
use cuehub::config::Config;
use cuehub::engine::Engine;
use cuehub::midi_transport::{MidirTransport, NullMidiTransport};
use cuehub::osc_transport::{NullOscTransport, UdpOscTransport};
use cuehub::restart::{was_restarted, EnvRestarter};
use cuehub::traits::{MidiTransport, NoRestartWatcher, OscTransport};
use tracing::info;

/// A live-performance OSC/MIDI control hub.
#[derive(Parser)]
#[command(name = "cuehub")]
#[command(about = "Routes, transforms, and orchestrates OSC and MIDI between live-performance programs")]
struct Args {
    /// Path to a TOML config file. Missing file falls back to defaults.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// UDP port to listen for OSC on; may be repeated for multiple ports.
    /// With none given, the engine runs OSC-less.
    #[arg(long = "osc-port")]
    osc_ports: Vec<u16>,

    /// Name of a virtual MIDI port to open; may be repeated. With none
    /// given, the engine runs MIDI-less.
    #[arg(long = "midi-port")]
    midi_ports: Vec<String>,

    /// Log filter, e.g. `info` or `cuehub=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.clone())
        .init();

    let restarted = was_restarted();
    info!(restarted, "starting cuehub");

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Config::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => Config::default(),
    };

    let osc_transport: Box<dyn OscTransport> = if args.osc_ports.is_empty() {
        Box::new(NullOscTransport)
    } else {
        Box::new(UdpOscTransport::bind(&args.osc_ports).context("binding OSC UDP ports")?)
    };

    let midi_transport: Box<dyn MidiTransport> = if args.midi_ports.is_empty() {
        Box::new(NullMidiTransport)
    } else {
        Box::new(
            MidirTransport::open(&config.engine_name, &args.midi_ports).context("opening MIDI ports")?,
        )
    };

    let snapshot_store = Box::new(
        cuehub::snapshot::FsSnapshotStore::new(config.state_directory.clone())
            .context("preparing snapshot directory")?,
    );

    let mut engine = Engine::new(
        config,
        osc_transport,
        midi_transport,
        snapshot_store,
        Box::new(EnvRestarter),
        Box::new(NoRestartWatcher),
        restarted,
    )
    .context("constructing engine")?;

    engine.run();
    Ok(())
}
