//! Mesh Patchbay - headless routing graph mirror and rule enforcer
//!
//! Mirrors the routing graph, keeps the patchbay rules applied and logs
//! every presentation change.
//!
//! ## Command line flags
//!
//! - `--config <path>`: engine config (default `~/.config/mesh/patchbay.yaml`)
//! - `--rules <path>`: rule file (overrides the config)
//! - `--snapshot`: capture the current connections as rules, save and exit
//! - `--once`: reconcile until idle, print the layout order and exit
//! - `--simulate`: mirror a built-in demo graph instead of the live server
//!   (required without the JACK backend; `--snapshot` then needs `--rules`)

use anyhow::{bail, Context, Result};
use mesh_graph::config::{default_config_path, load_config, try_load_config, EngineConfig};
use mesh_graph::presentation::ItemKey;
use mesh_graph::remote::{SimulatedRemote, SimulatedService};
use mesh_graph::{Directionality, GraphObserver, PatchbayEngine, PatchbayFileError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CONFIG_FILE: &str = "patchbay.yaml";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    rules: Option<PathBuf>,
    snapshot: bool,
    once: bool,
    simulate: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--rules" => args.rules = Some(iter.next().context("--rules needs a path")?.into()),
            "--snapshot" => args.snapshot = true,
            "--once" => args.once = true,
            "--simulate" => args.simulate = true,
            "-h" | "--help" => {
                println!(
                    "usage: mesh-patchbay [--config <path>] [--rules <path>] [--snapshot] [--once] [--simulate]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    check_snapshot_target(&args)?;
    Ok(args)
}

/// A snapshot of the demo graph must not overwrite the default rule file
fn check_snapshot_target(args: &Args) -> Result<()> {
    if args.snapshot && args.simulate && args.rules.is_none() {
        bail!("--snapshot with --simulate needs an explicit --rules <path>");
    }
    Ok(())
}

/// Logs presentation changes as they happen
struct LoggingObserver;

impl GraphObserver for LoggingObserver {
    fn item_added(&mut self, key: &ItemKey) {
        log::debug!("+ {:?}", key);
    }

    fn item_updated(&mut self, key: &ItemKey) {
        log::debug!("~ {:?}", key);
    }

    fn item_removed(&mut self, key: &ItemKey) {
        log::debug!("- {:?}", key);
    }
}

/// A small studio: capture, an effect, playback and a MIDI keyboard
fn populate_demo(remote: &SimulatedRemote) {
    const AUDIO: &str = "32 bit float mono audio";
    const MIDI: &str = "8 bit raw midi";

    let capture = remote.add_node("system-capture", "Audio/Source");
    let cap_l = remote.add_port(capture, "capture_1", Directionality::Output, AUDIO);
    remote.add_port(capture, "capture_2", Directionality::Output, AUDIO);

    let reverb = remote.add_node("reverb", "Audio/Duplex");
    let rev_in = remote.add_port(reverb, "in_1", Directionality::Input, AUDIO);
    let rev_out = remote.add_port(reverb, "out_1", Directionality::Output, AUDIO);

    let playback = remote.add_node("system-playback", "Audio/Sink");
    let play_l = remote.add_port(playback, "playback_1", Directionality::Input, AUDIO);
    remote.add_port(playback, "playback_2", Directionality::Input, AUDIO);

    let keys = remote.add_node("keyboard", "Midi/Source");
    remote.add_port(keys, "midi_out", Directionality::Output, MIDI);

    remote.add_link(cap_l, rev_in);
    remote.add_link(rev_out, play_l);
}

#[cfg(all(feature = "jack-backend", target_os = "linux"))]
fn open_live(config: &EngineConfig) -> Result<PatchbayEngine> {
    let service = mesh_graph::remote::JackService::new(&config.client_name);
    PatchbayEngine::open(service, config).context("Failed to open graph mirror")
}

#[cfg(not(all(feature = "jack-backend", target_os = "linux")))]
fn open_live(_config: &EngineConfig) -> Result<PatchbayEngine> {
    bail!("Built without the JACK backend; use --simulate to mirror the demo graph")
}

/// The demo graph is only ever mirrored on request
fn open_engine(args: &Args, config: &EngineConfig) -> Result<(PatchbayEngine, Option<SimulatedRemote>)> {
    if !args.simulate {
        return Ok((open_live(config)?, None));
    }

    let (service, remote) = SimulatedService::new();
    populate_demo(&remote);
    let engine = PatchbayEngine::open(service, config).context("Failed to open graph mirror")?;
    Ok((engine, Some(remote)))
}

/// Tick until a tick changes nothing, or `timeout` passes
fn settle(engine: &mut PatchbayEngine, observer: &mut LoggingObserver, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut seen_sync = false;
    while Instant::now() < deadline {
        engine.changed().wait(Duration::from_millis(50));
        let report = engine.tick(observer);
        seen_sync |= engine.mirror().last_sync() > 0;
        if seen_sync && report.is_idle() && !report.deferred {
            return;
        }
    }
    log::warn!("Graph did not settle within {:?}", timeout);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    // An explicitly named config must exist and parse
    let config: EngineConfig = match &args.config {
        Some(path) => try_load_config::<EngineConfig>(path)?.with_context(|| format!("No config at {:?}", path))?,
        None => load_config(&default_config_path(CONFIG_FILE)),
    };

    log::info!("mesh-patchbay starting up (client '{}')", config.client_name);

    // Held so the simulated graph outlives the session
    let (mut engine, _remote) = open_engine(&args, &config)?;
    if let Some(path) = args.rules.clone() {
        engine.set_rules_path(path);
    }

    match engine.load_rules() {
        Ok(count) => log::info!("{} patchbay rules active", count),
        Err(PatchbayFileError::Read { path, .. }) if !path.exists() => {
            log::info!("No rule file at {:?}, starting with no rules", path)
        }
        Err(e) => log::warn!("Could not load rules: {}", e),
    }

    let mut observer = LoggingObserver;
    let settle_timeout = config.connect_timeout() + config.reconnect_backoff();

    if args.snapshot {
        settle(&mut engine, &mut observer, settle_timeout);
        let count = engine.snapshot();
        engine.save_rules().context("Failed to save rules")?;
        println!("Saved {} rules to {:?}", count, engine.rules_path());
        engine.close();
        return Ok(());
    }

    if args.once {
        settle(&mut engine, &mut observer, settle_timeout);
        let graph = engine.presentation();
        for ranked in engine.rank() {
            if let Some(node) = graph.node(&ranked.key) {
                println!("{:>3}  {:<32} {:?}", ranked.rank, node.label, ranked.key.mode);
            }
        }
        engine.close();
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let changed = engine.changed();
    let poll = config.poll_interval().max(Duration::from_millis(100));
    let mut was_connected = false;
    while running.load(Ordering::SeqCst) {
        changed.wait(poll);
        let report = engine.tick(&mut observer);
        if !report.is_idle() {
            log::info!(
                "Graph: {} nodes, {} connections (+{} ~{} -{}; patchbay +{} -{})",
                engine.presentation().node_count(),
                engine.presentation().edge_count(),
                report.sync.added,
                report.sync.updated,
                report.sync.removed,
                report.connected,
                report.disconnected
            );
        }
        let connected = engine.mirror().is_connected();
        if connected != was_connected {
            log::info!("Remote session {}", if connected { "up" } else { "down" });
            was_connected = connected;
        }
    }

    log::info!("Shutting down");
    engine.close();
    Ok(())
}
