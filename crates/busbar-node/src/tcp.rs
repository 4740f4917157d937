//! TCP transport.
//!
//! One listener, one active connection at a time. Inbound bytes run through
//! the reassembler before entering the intake queue; outbound replies are
//! written as a single stream. A short write counts as an I/O error and
//! closes the connection.

use std::time::Instant;

use bytes::Bytes;
use busbar_core::{
    pipeline::{InboundFrame, ReplyRoute, Source},
    stats::LinkStats,
};
use busbar_proto::{Reassembler, ReassemblyConfig, ReassemblyOutcome};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// TCP maximum segment size assumed by the reassembler.
const TCP_MSS: u32 = 1440;

/// Accept loop. Replies arriving while no connection is active are dropped
/// and counted.
pub async fn serve(
    listener: TcpListener,
    intake: mpsc::Sender<InboundFrame>,
    mut replies: mpsc::Receiver<Bytes>,
    stats: LinkStats,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        tracing::info!("tcp: connection from {peer}");
                        stats.update(|c| c.accepts += 1);
                        serve_connection(socket, &intake, &mut replies, &stats).await;
                    },
                    Err(e) => {
                        tracing::warn!("tcp: accept failed: {e}");
                        stats.update(|c| c.errors += 1);
                    },
                }
            },
            reply = replies.recv() => {
                match reply {
                    Some(_) => stats.update(|c| c.errors += 1),
                    None => return,
                }
            },
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    intake: &mpsc::Sender<InboundFrame>,
    replies: &mut mpsc::Receiver<Bytes>,
    stats: &LinkStats,
) {
    let mut reassembler = Reassembler::new(ReassemblyConfig::tcp());
    let mut buffer = vec![0u8; TCP_MSS as usize];

    loop {
        tokio::select! {
            read = socket.read(&mut buffer) => {
                let length = match read {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!("tcp: read failed: {e}");
                        stats.update(|c| c.errors += 1);
                        return;
                    },
                };

                stats.update(|c| {
                    c.received_bytes += length as u32;
                    c.received_fragments += 1;
                });

                match reassembler.feed(&buffer[..length], Instant::now()) {
                    ReassemblyOutcome::Delivered(frame) => {
                        stats.update(|c| c.received_packets += 1);

                        let inbound = InboundFrame {
                            source: Source::Tcp,
                            mtu: TCP_MSS,
                            payload: frame,
                            route: ReplyRoute::Tcp,
                        };

                        if intake.send(inbound).await.is_err() {
                            return;
                        }
                    },
                    ReassemblyOutcome::Pending => {},
                    ReassemblyOutcome::Dropped(reason) => {
                        tracing::debug!("tcp: reassembly dropped: {reason:?}");
                        stats.update(|c| c.timeouts += 1);
                    },
                }
            },

            reply = replies.recv() => {
                let Some(frame) = reply else { return };

                if let Err(e) = socket.write_all(&frame).await {
                    tracing::debug!("tcp: write failed: {e}");
                    stats.update(|c| c.errors += 1);
                    return;
                }

                stats.update(|c| {
                    c.sent_bytes += frame.len() as u32;
                    c.sent_fragments += 1;
                    c.sent_packets += 1;
                });
            },
        }
    }
}
