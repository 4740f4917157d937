//! Intake/send worker pipeline.
//!
//! Two cooperative workers joined by bounded FIFOs:
//!
//! - the **intake worker** pops one [`InboundFrame`] at a time, runs the full
//!   dispatch (decapsulate, alias expansion, parse, handler, encapsulate) and
//!   pushes the reply onto the send queue;
//! - the **send worker** pops replies and routes each to its source
//!   transport, notifying the script waiter when the source was a script.
//!
//! Both queues hold [`QUEUE_DEPTH`] messages; producers block on a full
//! queue, which is the plane's only back-pressure mechanism. Because there
//! is exactly one intake worker and the queues are FIFO, replies leave in
//! exactly the order commands were dequeued, regardless of source transport.

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    dispatch::Dispatcher,
    logring::{SharedLog, unix_now},
};

/// Capacity of the intake and send queues.
pub const QUEUE_DEPTH: usize = 8;

/// Which transport a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// BLE GATT characteristic writes.
    Ble,
    /// TCP service connection.
    Tcp,
    /// Local line console.
    Console,
    /// Internal script engine.
    Script,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ble => "ble",
            Self::Tcp => "tcp",
            Self::Console => "console",
            Self::Script => "script",
        };
        f.write_str(name)
    }
}

/// Where (and how) the reply must be delivered.
#[derive(Debug)]
pub enum ReplyRoute {
    /// Indicate on a BLE connection/attribute pair.
    Ble {
        /// GATT connection handle.
        connection: u16,
        /// GATT attribute handle.
        attribute: u16,
    },
    /// Write to the active TCP connection.
    Tcp,
    /// Write to the console.
    Console,
    /// Wake the script task waiting for this reply.
    Script {
        /// Script name, used for the log line.
        name: String,
        /// The waiting task's channel.
        waiter: oneshot::Sender<Bytes>,
    },
}

/// One reassembled buffer heading into the dispatcher.
#[derive(Debug)]
pub struct InboundFrame {
    /// Source transport.
    pub source: Source,
    /// Transport MTU hint for reply sizing (0 = unfragmented).
    pub mtu: u32,
    /// Whole frame bytes, still encapsulated.
    pub payload: Bytes,
    /// Reply routing information.
    pub route: ReplyRoute,
}

/// One encapsulated reply heading back out.
#[derive(Debug)]
pub struct Outbound {
    /// Where to deliver.
    pub route: ReplyRoute,
    /// Encapsulated reply bytes.
    pub frame: Bytes,
}

/// A BLE reply with its GATT addressing.
#[derive(Debug)]
pub struct BleOutbound {
    /// GATT connection handle.
    pub connection: u16,
    /// GATT attribute handle.
    pub attribute: u16,
    /// Encapsulated reply bytes.
    pub frame: Bytes,
}

/// Outbound queues of the transport tasks.
#[derive(Debug, Clone)]
pub struct TransportSinks {
    /// BLE indication queue.
    pub ble: mpsc::Sender<BleOutbound>,
    /// TCP write queue.
    pub tcp: mpsc::Sender<Bytes>,
    /// Console write queue.
    pub console: mpsc::Sender<Bytes>,
}

/// Handles of the two running workers.
#[derive(Debug)]
pub struct PipelineHandles {
    /// Intake (dispatch) worker.
    pub intake: JoinHandle<()>,
    /// Send (reply routing) worker.
    pub send: JoinHandle<()>,
}

/// The bounded queues, created before the workers start so transports can
/// clone the intake sender first.
#[derive(Debug)]
pub struct Pipeline {
    intake_tx: mpsc::Sender<InboundFrame>,
    intake_rx: mpsc::Receiver<InboundFrame>,
    send_tx: mpsc::Sender<Outbound>,
    send_rx: mpsc::Receiver<Outbound>,
}

impl Pipeline {
    /// Create the queue pair.
    #[must_use]
    pub fn new() -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(QUEUE_DEPTH);
        let (send_tx, send_rx) = mpsc::channel(QUEUE_DEPTH);
        Self { intake_tx, intake_rx, send_tx, send_rx }
    }

    /// Sender side of the intake queue, for transports and scripts.
    #[must_use]
    pub fn intake(&self) -> mpsc::Sender<InboundFrame> {
        self.intake_tx.clone()
    }

    /// Spawn the two workers and hand them the queues.
    pub fn start(
        self,
        mut dispatcher: Dispatcher,
        sinks: TransportSinks,
        log: SharedLog,
    ) -> PipelineHandles {
        let Self { intake_tx, mut intake_rx, send_tx, mut send_rx } = self;
        drop(intake_tx);

        let intake = tokio::spawn(async move {
            while let Some(frame) = intake_rx.recv().await {
                let outbound = dispatcher.handle(frame).await;
                if send_tx.send(outbound).await.is_err() {
                    break;
                }
            }
        });

        let send = tokio::spawn(async move {
            while let Some(outbound) = send_rx.recv().await {
                route_reply(outbound, &sinks, &log).await;
            }
        });

        PipelineHandles { intake, send }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

async fn route_reply(outbound: Outbound, sinks: &TransportSinks, log: &SharedLog) {
    match outbound.route {
        ReplyRoute::Ble { connection, attribute } => {
            let _ = sinks.ble.send(BleOutbound { connection, attribute, frame: outbound.frame }).await;
        },

        ReplyRoute::Tcp => {
            let _ = sinks.tcp.send(outbound.frame).await;
        },

        ReplyRoute::Console => {
            let _ = sinks.console.send(outbound.frame).await;
        },

        ReplyRoute::Script { name, waiter } => {
            let text = outbound.frame.strip_suffix(b"\n").unwrap_or(&outbound.frame[..]);
            if !text.is_empty() {
                let line = String::from_utf8_lossy(text);
                log.append(unix_now(), &format!("{name}: {line}"));
            }
            let _ = waiter.send(outbound.frame);
        },
    }
}
