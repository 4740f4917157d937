//! Pipeline ordering: replies leave in exactly the order their commands
//! were dequeued, regardless of source transport.

use busbar_core::{
    dispatch::{Dispatcher, Services},
    logring::{LogRing, SharedLog},
    pipeline::{InboundFrame, Pipeline, ReplyRoute, Source, TransportSinks},
};
use busbar_proto::decapsulate;
use bytes::Bytes;
use tokio::sync::mpsc;

fn raw_frame(line: &str, source: Source, route: ReplyRoute) -> InboundFrame {
    InboundFrame {
        source,
        mtu: 0,
        payload: Bytes::from(format!("{line}\n").into_bytes()),
        route,
    }
}

fn reply_text(frame: &[u8]) -> String {
    let decap = decapsulate(frame).expect("reply decodes");
    String::from_utf8_lossy(&decap.command).into_owned()
}

#[tokio::test]
async fn replies_preserve_intake_order() {
    let pipeline = Pipeline::new();
    let intake = pipeline.intake();

    let (services, _flash) = Services::host_defaults(intake.clone(), 1 << 20);
    let log = SharedLog::new(LogRing::new());

    let (ble_tx, _ble_rx) = mpsc::channel(8);
    let (tcp_tx, mut tcp_rx) = mpsc::channel(8);
    let (console_tx, _console_rx) = mpsc::channel(8);

    let handles = pipeline.start(
        Dispatcher::new(services),
        TransportSinks { ble: ble_tx, tcp: tcp_tx, console: console_tx },
        log,
    );

    // Three commands with distinguishable replies, all on the TCP route.
    intake.send(raw_frame("write first", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");
    intake.send(raw_frame("write second", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");
    intake.send(raw_frame("write third", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");

    let mut replies = Vec::new();
    for _ in 0..3 {
        let frame = tcp_rx.recv().await.expect("reply");
        replies.push(reply_text(&frame));
    }

    assert_eq!(replies, ["first", "second", "third"]);

    drop(intake);
    handles.intake.abort();
    handles.send.abort();
}

#[tokio::test]
async fn cross_transport_order_is_preserved_per_transport() {
    let pipeline = Pipeline::new();
    let intake = pipeline.intake();

    let (services, _flash) = Services::host_defaults(intake.clone(), 1 << 20);
    let log = SharedLog::new(LogRing::new());

    let (ble_tx, _ble_rx) = mpsc::channel(8);
    let (tcp_tx, mut tcp_rx) = mpsc::channel(8);
    let (console_tx, mut console_rx) = mpsc::channel(8);

    let handles = pipeline.start(
        Dispatcher::new(services),
        TransportSinks { ble: ble_tx, tcp: tcp_tx, console: console_tx },
        log,
    );

    intake.send(raw_frame("write t1", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");
    intake.send(raw_frame("write c1", Source::Console, ReplyRoute::Console)).await.expect("send");
    intake.send(raw_frame("write t2", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");

    assert_eq!(reply_text(&tcp_rx.recv().await.expect("t1")), "t1");
    assert_eq!(reply_text(&console_rx.recv().await.expect("c1")), "c1");
    assert_eq!(reply_text(&tcp_rx.recv().await.expect("t2")), "t2");

    drop(intake);
    handles.intake.abort();
    handles.send.abort();
}

#[tokio::test]
async fn run_command_executes_script() {
    let pipeline = Pipeline::new();
    let intake = pipeline.intake();

    let (services, _flash) = Services::host_defaults(intake.clone(), 1 << 20);
    let ramfs = services.ramfs.clone();
    let log = services.log.clone();

    ramfs.write_file("blink", b"write from $0\nstop\n").expect("script file");

    let (ble_tx, _ble_rx) = mpsc::channel(8);
    let (tcp_tx, mut tcp_rx) = mpsc::channel(8);
    let (console_tx, _console_rx) = mpsc::channel(8);

    let handles = pipeline.start(
        Dispatcher::new(services),
        TransportSinks { ble: ble_tx, tcp: tcp_tx, console: console_tx },
        log.clone(),
    );

    intake.send(raw_frame("run blink demo", Source::Tcp, ReplyRoute::Tcp)).await.expect("send");
    let _ack = tcp_rx.recv().await.expect("run reply");

    // The script line's reply lands in the device log under the script name.
    let mut seen = false;
    for _ in 0..200 {
        seen = log
            .with(|ring| {
                let (entries, _) = ring.drain_view(Some(0), 24);
                entries.iter().any(|(_, e)| e.text == "blink: from demo")
            })
            .unwrap_or(false);
        if seen {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(seen, "script reply was not logged");

    drop(intake);
    handles.intake.abort();
    handles.send.abort();
}

#[tokio::test]
async fn script_route_wakes_the_waiter() {
    let pipeline = Pipeline::new();
    let intake = pipeline.intake();

    let (services, _flash) = Services::host_defaults(intake.clone(), 1 << 20);
    let log = SharedLog::new(LogRing::new());

    let (ble_tx, _ble_rx) = mpsc::channel(8);
    let (tcp_tx, _tcp_rx) = mpsc::channel(8);
    let (console_tx, _console_rx) = mpsc::channel(8);

    let handles = pipeline.start(
        Dispatcher::new(services),
        TransportSinks { ble: ble_tx, tcp: tcp_tx, console: console_tx },
        log.clone(),
    );

    let (waiter, reply) = tokio::sync::oneshot::channel();
    intake
        .send(InboundFrame {
            source: Source::Script,
            mtu: 0,
            payload: Bytes::from_static(b"write scripted reply\n"),
            route: ReplyRoute::Script { name: "blink".to_string(), waiter },
        })
        .await
        .expect("send");

    let frame = reply.await.expect("script reply");
    assert_eq!(reply_text(&frame), "scripted reply");

    // The reply was also recorded in the device log under the script name.
    let logged = log
        .with(|ring| {
            let (entries, _) = ring.drain_view(None, 24);
            entries.iter().any(|(_, e)| e.text == "blink: scripted reply")
        })
        .unwrap_or(false);
    assert!(logged);

    drop(intake);
    handles.intake.abort();
    handles.send.abort();
}
