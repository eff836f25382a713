//! cabridge daemon.
//!
//! Bridges a gbox UDP peer and an oscam TCP peer on the local host:
//! gbox command datagrams are dispatched to the oscam side, oscam table
//! messages to the gbox side.
//!
//! # Usage
//!
//! ```sh
//! bridged --tcp-port 2000
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: graceful shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use cabridge::channel::gbox::{GBOX_CMD_IN_PORT, GBOX_TABLE_OUT_PORT};
use cabridge::channel::oscam::OSCAM_CTRL_PORT;
use cabridge::net::Endpoint;
use cabridge::{bind_peers, init_tracing, GboxChannel, GboxConfig, OscamChannel, OscamConfig};

fn main() {
    if let Err(e) = run() {
        eprintln!("bridged: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (gbox_config, oscam_config) = parse_args(&args)?;

    init_tracing();

    let gbox = GboxChannel::spawn(gbox_config).context("gbox channel init failed")?;
    let oscam = OscamChannel::spawn(oscam_config).context("oscam channel init failed")?;
    bind_peers(&gbox, &oscam).context("bridge wiring failed")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("installing SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("installing SIGTERM handler")?;

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutdown signal received");
    gbox.shutdown();
    oscam.shutdown();

    Ok(())
}

/// Parses command line arguments into the two channel configurations.
fn parse_args(args: &[String]) -> Result<(GboxConfig, OscamConfig)> {
    let mut cmd_port = GBOX_CMD_IN_PORT;
    let mut table_port = GBOX_TABLE_OUT_PORT;
    let mut tcp_port = OSCAM_CTRL_PORT;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--cmd-port" => cmd_port = port_value(args, &mut i, "--cmd-port")?,
            "--table-port" => table_port = port_value(args, &mut i, "--table-port")?,
            "--tcp-port" | "-p" => tcp_port = port_value(args, &mut i, "--tcp-port")?,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => bail!("unknown argument: {arg}"),
        }
        i += 1;
    }

    Ok((
        GboxConfig {
            cmd_in: Endpoint::localhost(cmd_port),
            table_out: Endpoint::localhost(table_port),
        },
        OscamConfig {
            listen: Endpoint::any(tcp_port),
        },
    ))
}

fn port_value(args: &[String], i: &mut usize, flag: &str) -> Result<u16> {
    *i += 1;
    let Some(value) = args.get(*i) else {
        bail!("missing value for {flag}");
    };
    value
        .parse()
        .with_context(|| format!("invalid port for {flag}: {value}"))
}

fn print_usage() {
    eprintln!(
        r#"bridged - gbox/oscam conditional-access bridge

USAGE:
    bridged [OPTIONS]

OPTIONS:
    --cmd-port <PORT>     UDP port for gbox commands (default: 8003)
    --table-port <PORT>   UDP port for relayed tables (default: 8004)
    -p, --tcp-port <PORT> TCP port for the oscam client (default: 2000)
    -h, --help            Print this help message

SIGNALS:
    SIGTERM, SIGINT       Graceful shutdown
"#
    );
}
