//! End-to-end dispatcher scenarios over literal wire bytes.
//!
//! Each test pushes a frame through the full dispatch path (decapsulate,
//! alias expansion, parameter validation, handler, encapsulate) and checks
//! the reply bytes the host would see.

use busbar_core::{
    dispatch::{Dispatcher, Services},
    ota::SharedFlash,
    pipeline::{InboundFrame, ReplyRoute, Source},
};
use busbar_proto::decapsulate;
use bytes::Bytes;
use tokio::sync::mpsc;

struct Harness {
    dispatcher: Dispatcher,
    flash: SharedFlash,
    ramfs: busbar_core::ramfs::Ramfs,
    // Keeps the script intake channel alive for the dispatcher's runner.
    _intake_rx: mpsc::Receiver<InboundFrame>,
}

fn harness() -> Harness {
    let (intake_tx, intake_rx) = mpsc::channel(8);
    let (services, flash) = Services::host_defaults(intake_tx, 1 << 20);
    let ramfs = services.ramfs.clone();
    Harness { dispatcher: Dispatcher::new(services), flash, ramfs, _intake_rx: intake_rx }
}

impl Harness {
    /// Send a raw console-style line; return the reply text.
    async fn send(&mut self, line: &str) -> String {
        let (text, _) = self.send_oob(line, &[]).await;
        text
    }

    /// Send a packetised frame with an OOB payload; return text and OOB.
    async fn send_oob(&mut self, line: &str, oob: &[u8]) -> (String, Vec<u8>) {
        let payload = if oob.is_empty() {
            Bytes::from(format!("{line}\n").into_bytes())
        } else {
            busbar_proto::encapsulate(line.as_bytes(), oob, true, Some(7), false)
        };

        let inbound = InboundFrame {
            source: Source::Tcp,
            mtu: 0,
            payload,
            route: ReplyRoute::Tcp,
        };

        let outbound = self.dispatcher.handle(inbound).await;
        let reply = decapsulate(&outbound.frame).expect("reply decodes");

        (String::from_utf8_lossy(&reply.command).into_owned(), reply.oob.to_vec())
    }
}

#[tokio::test]
async fn s1_help_lists_itself() {
    let mut h = harness();
    let reply = h.send("help").await;

    assert!(reply.starts_with("HELP"));
    assert!(reply.contains("  help"));
}

#[tokio::test]
async fn s2_hostname_with_description() {
    let mut h = harness();
    let reply = h.send("hostname foo bar_baz").await;
    assert_eq!(reply, "hostname: foo (bar baz)");
}

#[tokio::test]
async fn s3_config_set_then_show() {
    let mut h = harness();

    let reply = h.send("config-set-uint mykey 42").await;
    assert_eq!(reply, "mykey[uint32]=42");

    let reply = h.send("config-show").await;
    assert!(reply.contains("mykey"));
    assert!(reply.contains("42"));
}

#[tokio::test]
async fn s4_alias_set_use_and_remove() {
    let mut h = harness();

    let reply = h.send("alias h help").await;
    assert!(reply.starts_with("ALIASES\n  h: help"));

    let direct = h.send("help").await;
    let aliased = h.send("h").await;
    assert_eq!(direct, aliased);

    // Removal restores the unaliased resolution.
    h.send("alias h").await;
    let reply = h.send("h").await;
    assert_eq!(reply, "ERROR: unknown command \"h\"");
}

#[tokio::test]
async fn s5_ota_happy_path() {
    let mut h = harness();
    let image = vec![0x42u8; 1024];

    let reply = h.send("ota-start 1024").await;
    assert_eq!(reply, "OK start write ota partition ota_1 1");

    let (reply, _) = h.send_oob("ota-write 1024 0", &image).await;
    assert_eq!(reply, "OK write ota");

    let reply = h.send("ota-finish").await;
    let checksum = reply.strip_prefix("OK finish ota, checksum: ").expect("finish reply");
    assert_eq!(checksum.len(), 64);
    assert!(checksum.bytes().all(|b| b.is_ascii_hexdigit()));

    let reply = h.send(&format!("ota-commit {checksum}")).await;
    assert_eq!(reply, "OK commit ota");

    // Reset into the new image.
    h.flash.reboot();
    assert_eq!(h.flash.slot_data(1), image);

    let reply = h.send("ota-confirm 1").await;
    assert_eq!(reply, "OK confirm ota");
}

#[tokio::test]
async fn s6_ota_commit_checksum_mismatch() {
    let mut h = harness();
    let image = vec![0x42u8; 512];

    h.send("ota-start 512").await;
    h.send_oob("ota-write 512 0", &image).await;

    let reply = h.send("ota-finish").await;
    let checksum = reply.strip_prefix("OK finish ota, checksum: ").expect("finish reply");

    // Alter one nibble of the digest.
    let mut wrong = checksum.to_string();
    let original = wrong.remove(0);
    let flipped = if original == '0' { '1' } else { '0' };
    wrong.insert(0, flipped);

    let reply = h.send(&format!("ota-commit {wrong}")).await;
    assert!(reply.starts_with("ERROR: checksum mismatch:"), "{reply}");

    // The old slot still boots.
    let partitions = h.send("info-partitions").await;
    assert!(partitions.contains("slot 0: ota_0"));
    assert!(partitions.lines().any(|l| l.starts_with("slot 0") && l.contains("boot")));
}

#[tokio::test]
async fn ota_commit_rejects_recased_checksum() {
    let mut h = harness();
    let image = vec![0x42u8; 256];

    h.send("ota-start 256").await;
    h.send_oob("ota-write 256 0", &image).await;

    let reply = h.send("ota-finish").await;
    let checksum = reply.strip_prefix("OK finish ota, checksum: ").expect("finish reply");

    // Same digest, different hex-digit casing: byte-for-byte comparison
    // must reject it.
    let upper = checksum.to_uppercase();
    assert_ne!(upper, checksum);

    let reply = h.send(&format!("ota-commit {upper}")).await;
    assert!(reply.starts_with("ERROR: checksum mismatch:"), "{reply}");
    assert!(h.send("info-partitions").await.lines().any(|l| l.starts_with("slot 0") && l.contains("boot")));

    // The exact digest still commits.
    let reply = h.send(&format!("ota-commit {checksum}")).await;
    assert_eq!(reply, "OK commit ota");
}

#[tokio::test]
async fn ota_write_without_start_fails() {
    let mut h = harness();
    let (reply, _) = h.send_oob("ota-write 4 0", b"abcd").await;
    assert_eq!(reply, "ERROR: ota write context not active");
}

#[tokio::test]
async fn raw_string_capture_preserves_whitespace() {
    let mut h = harness();
    let reply = h.send("write hello world  multiple   spaces").await;
    assert_eq!(reply, "hello world  multiple   spaces");
}

#[tokio::test]
async fn empty_line_and_unknown_command() {
    let mut h = harness();

    assert_eq!(h.send("").await, "ERROR: empty line");
    assert_eq!(h.send("frobnicate").await, "ERROR: unknown command \"frobnicate\"");
}

#[tokio::test]
async fn parameter_errors_on_the_wire() {
    let mut h = harness();

    assert_eq!(h.send("config-set-uint").await, "ERROR: missing required parameter 1");
    assert_eq!(
        h.send("config-set-uint key nope").await,
        "ERROR: invalid unsigned integer value: nope"
    );
    assert_eq!(
        h.send("ota-write 32 2").await,
        "ERROR: invalid unsigned integer value: 2, larger than upper bound: 1"
    );
    assert_eq!(h.send("reset now please").await, "ERROR: too many parameters");
}

#[tokio::test]
async fn malformed_packet_answers_error_token() {
    let (intake_tx, _intake_rx) = mpsc::channel(8);
    let (services, _flash) = Services::host_defaults(intake_tx, 1 << 20);
    let mut dispatcher = Dispatcher::new(services);

    // A checksummed packet with one payload bit flipped.
    let wire = busbar_proto::encapsulate(b"help", b"x", true, Some(1), true);
    let mut corrupted = wire.to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x01;

    let outbound = dispatcher
        .handle(InboundFrame {
            source: Source::Tcp,
            mtu: 0,
            payload: Bytes::from(corrupted),
            route: ReplyRoute::Tcp,
        })
        .await;

    assert_eq!(outbound.frame.as_ref(), b"<error>\n");
}

#[tokio::test]
async fn packetised_reply_echoes_transaction_id() {
    let mut h = harness();

    let payload = busbar_proto::encapsulate(b"info", &[], true, Some(0xdead), true);
    let outbound = h
        .dispatcher
        .handle(InboundFrame {
            source: Source::Tcp,
            mtu: 0,
            payload,
            route: ReplyRoute::Tcp,
        })
        .await;

    let reply = decapsulate(&outbound.frame).expect("reply decodes");
    assert!(reply.packetised);
    assert_eq!(reply.tx_id, Some(0xdead));
    assert!(String::from_utf8_lossy(&reply.command).starts_with("busbar"));
}

#[tokio::test]
async fn fs_commands_round_trip() {
    let mut h = harness();

    let (reply, _) = h.send_oob("fs-write 0 11 greeting", b"hello world").await;
    assert_eq!(reply, "OK file length: 11");

    let (reply, oob) = h.send_oob("fs-read 5 6 greeting", &[]).await;
    assert_eq!(reply, "OK chunk read: 5");
    assert_eq!(oob, b"world");

    let reply = h.send("fs-list /").await;
    assert!(reply.starts_with("DIRECTORY /"));
    assert!(reply.contains("greeting"));

    let reply = h.send("fs-rename greeting salute").await;
    assert_eq!(reply, "OK file renamed");

    let reply = h.send("fs-erase salute").await;
    assert_eq!(reply, "OK file erased");

    let reply = h.send("fs-erase salute").await;
    assert_eq!(reply, "file erase failed");
}

#[tokio::test]
async fn fs_append_mode_extends() {
    let mut h = harness();

    h.send_oob("fs-write 0 3 log", b"one").await;
    let (reply, _) = h.send_oob("fs-write 1 3 log", b"two").await;
    assert_eq!(reply, "OK file length: 6");

    let (_, oob) = h.send_oob("fs-read 6 0 log", &[]).await;
    assert_eq!(oob, b"onetwo");
}

#[tokio::test]
async fn log_commands() {
    let mut h = harness();

    // The hostname command logs nothing; drive entries via reset request.
    h.send("reset").await;
    let reply = h.send("log").await;
    assert!(reply.contains("entries:"));
    assert!(reply.contains("reset requested"));

    let reply = h.send("log-clear").await;
    assert!(reply.ends_with("log cleared"));

    let reply = h.send("log").await;
    assert!(reply.starts_with("0 entries:"));
}

#[tokio::test]
async fn display_page_lifecycle() {
    let mut h = harness();

    let reply = h.send("display-page-add-text boot 30 hello  display").await;
    assert_eq!(reply, "OK page boot added");

    let reply = h.send("display-info").await;
    assert!(reply.contains("text page boot (30 s)"));

    let reply = h.send("display-page-remove boot").await;
    assert_eq!(reply, "OK page boot removed");

    let reply = h.send("display-page-remove boot").await;
    assert_eq!(reply, "ERROR: page boot not found");
}

#[tokio::test]
async fn display_configure_loads_font_from_filesystem() {
    use busbar_core::font::{BASIC_GLYPHS, Font, GLYPH_ROWS, Glyph};

    let mut h = harness();

    let basic = vec![Glyph { codepoint: 0, rows: [0; GLYPH_ROWS] }; BASIC_GLYPHS];
    let file = Font::build_file((16, 32, 12, 26), &basic, &[]);
    h.ramfs.write_file("font.bin", &file).expect("font file");

    let reply = h.send("display-configure 0 0 128 64 0 0 0").await;
    assert_eq!(reply, "OK display configured");

    let reply = h.send("display-info").await;
    assert!(reply.contains("- font: 12x26, 0 extra glyphs"), "{reply}");
}

#[tokio::test]
async fn io_commands() {
    let mut h = harness();

    assert_eq!(h.send("io-write 0 3 1").await, "OK [0/3] = 1");
    assert_eq!(h.send("io-read 0 3").await, "OK [0/3] = 1");
    assert!(h.send("io-read 5 0").await.starts_with("ERROR: no I/O device 5"));

    let reply = h.send("io-stats").await;
    assert!(reply.contains("- reads: 1"));
    assert!(reply.contains("- writes: 1"));
    assert!(reply.contains("- errors: 1"));
}

#[tokio::test]
async fn info_cli_counts_commands() {
    let mut h = harness();

    h.send("info").await;
    h.send_oob("info", b"x").await; // packetised
    let reply = h.send("info-cli").await;

    assert!(reply.starts_with("commands received:"));
    assert!(reply.contains("- total: 3"));
    assert!(reply.contains("- packetised: 1"));
    assert!(reply.contains("- raw: 2"));
}
