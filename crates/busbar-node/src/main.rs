//! busbar controller runtime.
//!
//! Wires the command plane to real transports: a TCP listener on the
//! service port and an interactive console on stdio. The BLE radio glue
//! binds on-device; its session logic lives in `busbar_core::ble`.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the service port with the console attached
//! busbar-node --bind '[::]:24' --console
//!
//! # Headless, custom ramdisk size
//! busbar-node --bind 0.0.0.0:2024 --ramdisk-size 2097152
//! ```

mod tcp;
mod terminal;

use busbar_core::{
    dispatch::{Dispatcher, Services},
    logring::unix_now,
    pipeline::{Pipeline, TransportSinks},
};
use clap::Parser;
use tokio::{net::TcpListener, sync::mpsc};
use tracing_subscriber::EnvFilter;

/// busbar controller node
#[derive(Parser, Debug)]
#[command(name = "busbar-node")]
#[command(about = "Command plane runtime for the busbar controller")]
#[command(version)]
struct Args {
    /// Address of the TCP service port
    #[arg(short, long, default_value = "[::]:24")]
    bind: String,

    /// Attach the interactive console to stdio
    #[arg(short, long)]
    console: bool,

    /// RAM filesystem capacity in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    ramdisk_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let pipeline = Pipeline::new();
    let intake = pipeline.intake();

    let (services, flash) = Services::host_defaults(intake.clone(), args.ramdisk_size);

    // Boot-validate the retained log ring before anything logs.
    let log = services.log.clone();
    log.with(|ring| ring.revalidate(unix_now()));
    log.append(unix_now(), "boot");

    let reset = services.reset.clone();
    let stats = services.stats.clone();
    let console_editor = services.console.clone();

    let (ble_tx, _ble_rx) = mpsc::channel(8);
    let (tcp_tx, tcp_rx) = mpsc::channel(8);
    let (console_tx, console_rx) = mpsc::channel(8);

    let handles = pipeline.start(
        Dispatcher::new(services),
        TransportSinks { ble: ble_tx, tcp: tcp_tx, console: console_tx },
        log.clone(),
    );

    let listener = TcpListener::bind(&args.bind).await?;
    tracing::info!("service port bound to {}", listener.local_addr()?);

    let tcp_task = tokio::spawn(tcp::serve(listener, intake.clone(), tcp_rx, stats.tcp.clone()));

    let console_task = if args.console {
        Some(tokio::spawn(terminal::serve(console_editor, intake.clone(), console_rx)))
    } else {
        None
    };

    // The `reset` command lands here: flip the boot slot bookkeeping the way
    // the loader would and leave; the supervisor restarts the process with
    // the retained state intact.
    reset.notified().await;
    log.append(unix_now(), "reset");
    flash.reboot();

    tcp_task.abort();
    if let Some(task) = console_task {
        task.abort();
    }
    handles.intake.abort();
    handles.send.abort();

    Ok(())
}
