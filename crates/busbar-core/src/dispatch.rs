//! The command dispatcher.
//!
//! Owns every singleton service of the command plane and turns one
//! [`InboundFrame`] into one [`Outbound`] reply: decapsulate, expand the
//! alias, look the command up, parse and bound-check the parameters, run the
//! handler, encapsulate. The intake worker drives exactly one dispatcher, so
//! none of the single-holder services (alias store, OTA engine, registries)
//! need their own locks.
//!
//! All failures are local: a malformed frame is answered with the fixed
//! `<error>` token, every other problem with an `ERROR: <text>` line.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Instant;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use busbar_proto::{FrameError, decapsulate, encapsulate};

use crate::{
    alias::AliasStore,
    command::{CommandError, CommandId, lookup, render_help},
    config::{Config, KEY_HOSTNAME, KEY_HOSTNAME_DESC, KEY_WLAN_PASSWD, KEY_WLAN_SSID},
    console::LineEditor,
    logring::{LOG_ENTRIES, LOG_VIEW_CHUNK, SharedLog, unix_now},
    ota::OtaEngine,
    params::{Params, Tokenizer, parse_parameters},
    periph::{ChannelBank, Display, DisplayConfig, DisplayPage, I2cBuses, IoRegistry, SensorRegistry},
    pipeline::{InboundFrame, Outbound, Source},
    ramfs::{OpenFlags, Ramfs, Whence},
    script::ScriptRunner,
    stats::TransportStats,
};

/// Font file the display paint path loads at configure time.
pub const FONT_FILE: &str = "font.bin";

/// Everything the dispatcher owns or shares with the runtime.
pub struct Services {
    /// Alias store (single-holder).
    pub alias: AliasStore,
    /// Persistent configuration.
    pub config: Config,
    /// RAM filesystem.
    pub ramfs: Ramfs,
    /// OTA engine (single-holder).
    pub ota: OtaEngine,
    /// Retained log ring.
    pub log: SharedLog,
    /// Per-transport counters.
    pub stats: TransportStats,
    /// Script spawner and process table.
    pub scripts: ScriptRunner,
    /// Console editor, shared with the console task for stats and prompt.
    pub console: Arc<Mutex<LineEditor>>,
    /// I/O device registry.
    pub io: IoRegistry,
    /// Display state.
    pub display: Display,
    /// I2C module bookkeeping.
    pub i2c: I2cBuses,
    /// LED PWM channels.
    pub ledpwm: ChannelBank,
    /// LED pixel strings.
    pub ledpixel: ChannelBank,
    /// Motor-control PWM channels.
    pub mcpwm: ChannelBank,
    /// PDM channels.
    pub pdm: ChannelBank,
    /// Sensor registry.
    pub sensors: SensorRegistry,
    /// Raised by the `reset` command; the runtime restarts on it.
    pub reset: Arc<Notify>,
    /// `log-monitor` toggle, read by the console task.
    pub monitor: Arc<AtomicBool>,
}

impl Services {
    /// Wire up a full service set with host-build defaults: shared in-memory
    /// flash, a fresh log ring, one GPIO bank and empty registries. Returns
    /// the flash handle so the runtime can simulate resets.
    #[must_use]
    pub fn host_defaults(
        intake: tokio::sync::mpsc::Sender<InboundFrame>,
        ramdisk_size: usize,
    ) -> (Self, crate::ota::SharedFlash) {
        let flash = crate::ota::SharedFlash::new(1 << 20);
        let ramfs = Ramfs::new(ramdisk_size);
        let log = SharedLog::new(crate::logring::LogRing::new());
        let scripts = ScriptRunner::new(
            ramfs.clone(),
            intake,
            log.clone(),
            crate::script::ProcessTable::new(),
        );

        let mut io = IoRegistry::new();
        let _ = io.register(Box::new(crate::periph::GpioBank::new("gpio0", 16)));

        let services = Self {
            alias: AliasStore::new(),
            config: Config::new(crate::config::MemoryConfig::new()),
            ramfs,
            ota: OtaEngine::new(Box::new(flash.clone())),
            log,
            stats: TransportStats::new(),
            scripts,
            console: Arc::new(Mutex::new(LineEditor::new("busbar"))),
            io,
            display: Display::new(),
            i2c: I2cBuses::new(),
            ledpwm: ChannelBank::new("ledpwm", 8),
            ledpixel: ChannelBank::new("ledpixel", 4),
            mcpwm: ChannelBank::new("mcpwm", 6),
            pdm: ChannelBank::new("pdm", 4),
            sensors: SensorRegistry::new(),
            reset: Arc::new(Notify::new()),
            monitor: Arc::new(AtomicBool::new(false)),
        };

        (services, flash)
    }
}

/// Intake/reply counters reported by `info-cli` and `string-info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliStats {
    commands_received: u32,
    commands_received_packet: u32,
    commands_received_raw: u32,
    replies_sent: u32,
    replies_sent_packet: u32,
    replies_sent_raw: u32,
    reply_bytes: u64,
    reply_oob_bytes: u64,
}

/// One command invocation as the handlers see it.
#[derive(Debug)]
pub struct CommandCall {
    /// Source transport.
    pub source: Source,
    /// Transport MTU hint.
    pub mtu: u32,
    /// Validated parameters.
    pub params: Params,
    /// OOB payload that arrived with the command.
    pub oob: Bytes,
    /// Reply text (the handler builds this).
    pub result: String,
    /// Reply OOB payload.
    pub result_oob: Vec<u8>,
}

/// The dispatcher; exactly one instance runs on the intake worker.
pub struct Dispatcher {
    services: Services,
    cli_stats: CliStats,
    started: Instant,
}

impl Dispatcher {
    /// Wrap the services.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self { services, cli_stats: CliStats::default(), started: Instant::now() }
    }

    /// Process one inbound frame into its reply.
    pub async fn handle(&mut self, inbound: InboundFrame) -> Outbound {
        let InboundFrame { source, mtu, payload, route } = inbound;

        self.cli_stats.commands_received += 1;

        let decap = match decapsulate(&payload) {
            Ok(d) => d,
            Err(e) => {
                self.note_frame_error(source, &e);
                return Outbound { route, frame: encapsulate(b"<error>", &[], false, None, false) };
            },
        };

        if decap.packetised {
            self.cli_stats.commands_received_packet += 1;
        } else {
            self.cli_stats.commands_received_raw += 1;
        }

        let line = String::from_utf8_lossy(&decap.command).into_owned();
        let line = self.services.alias.expand(&line);

        let mut call = CommandCall {
            source,
            mtu,
            params: Params::default(),
            oob: decap.oob.clone(),
            result: String::new(),
            result_oob: Vec::new(),
        };

        match self.dispatch_line(&line, &mut call) {
            Ok(()) => {},
            Err(e) => {
                call.result = format!("ERROR: {e}");
                call.result_oob.clear();
            },
        }

        let frame = encapsulate(
            call.result.as_bytes(),
            &call.result_oob,
            decap.packetised,
            decap.tx_id,
            decap.checksum_requested,
        );

        self.cli_stats.replies_sent += 1;
        if decap.packetised {
            self.cli_stats.replies_sent_packet += 1;
        } else {
            self.cli_stats.replies_sent_raw += 1;
        }
        self.cli_stats.reply_bytes += call.result.len() as u64;
        self.cli_stats.reply_oob_bytes += call.result_oob.len() as u64;

        Outbound { route, frame }
    }

    fn note_frame_error(&mut self, source: Source, error: &FrameError) {
        self.services.log.append(unix_now(), &format!("packet: {error}"));

        let stats = match source {
            Source::Ble => &self.services.stats.ble,
            Source::Tcp => &self.services.stats.tcp,
            Source::Console | Source::Script => &self.services.stats.console,
        };
        stats.update(|c| c.errors += 1);
    }

    fn dispatch_line(&mut self, line: &str, call: &mut CommandCall) -> Result<(), CommandError> {
        let mut tokenizer = Tokenizer::new(line);

        let Some(token) = tokenizer.next_token() else {
            return Err(CommandError::msg("empty line"));
        };

        let Some(spec) = lookup(token) else {
            return Err(CommandError::msg(format!("unknown command \"{token}\"")));
        };

        call.params = parse_parameters(&mut tokenizer, spec.params)?;

        self.invoke(spec.id, call)
    }

    #[allow(clippy::too_many_lines)]
    fn invoke(&mut self, id: CommandId, call: &mut CommandCall) -> Result<(), CommandError> {
        match id {
            CommandId::Alias => self.cmd_alias(call),
            CommandId::BtInfo => self.cmd_bt_info(call),
            CommandId::ConfigDump => self.cmd_config_dump(call, None),
            CommandId::ConfigErase => self.cmd_config_erase(call),
            CommandId::ConfigInfo => self.cmd_config_info(call),
            CommandId::ConfigSetInt => self.cmd_config_set_int(call),
            CommandId::ConfigSetUint => self.cmd_config_set_uint(call),
            CommandId::ConfigSetString => self.cmd_config_set_string(call),
            CommandId::ConfigShow => self.cmd_config_dump(call, Some("config")),
            CommandId::ConsoleInfo => self.cmd_console_info(call),
            CommandId::DisplayBrightness => self.cmd_display_brightness(call),
            CommandId::DisplayConfigure => self.cmd_display_configure(call),
            CommandId::DisplayErase => self.cmd_display_erase(call),
            CommandId::DisplayInfo => self.cmd_display_info(call),
            CommandId::DisplayPageAddText => self.cmd_display_page_add_text(call),
            CommandId::DisplayPageAddImage => self.cmd_display_page_add_image(call),
            CommandId::DisplayPageRemove => self.cmd_display_page_remove(call),
            CommandId::FsChecksum => self.cmd_fs_checksum(call),
            CommandId::FsErase => self.cmd_fs_erase(call),
            CommandId::FsFormat => self.cmd_fs_format(call),
            CommandId::FsInfo => self.cmd_fs_info(call),
            CommandId::FsList => self.cmd_fs_list(call),
            CommandId::FsRead => self.cmd_fs_read(call),
            CommandId::FsRename => self.cmd_fs_rename(call),
            CommandId::FsTruncate => self.cmd_fs_truncate(call),
            CommandId::FsWrite => self.cmd_fs_write(call),
            CommandId::Help => {
                call.result = render_help(call.params.opt_string(0));
                Ok(())
            },
            CommandId::Hostname => self.cmd_hostname(call),
            CommandId::I2cInfo => self.cmd_i2c_info(call),
            CommandId::I2cSpeed => self.cmd_i2c_speed(call),
            CommandId::Info => self.cmd_info(call),
            CommandId::InfoCli => self.cmd_info_cli(call),
            CommandId::InfoMemory => self.cmd_info_memory(call),
            CommandId::InfoPartitions => self.cmd_info_partitions(call),
            CommandId::IoDump => self.cmd_io_dump(call),
            CommandId::IoRead => self.cmd_io_read(call),
            CommandId::IoStats => self.cmd_io_stats(call),
            CommandId::IoWrite => self.cmd_io_write(call),
            CommandId::LedPixelInfo => {
                call.result = self.services.ledpixel.info();
                Ok(())
            },
            CommandId::LedPwmInfo => {
                call.result = self.services.ledpwm.info();
                Ok(())
            },
            CommandId::Log => self.cmd_log(call),
            CommandId::LogClear => self.cmd_log_clear(call),
            CommandId::LogInfo => self.cmd_log_info(call),
            CommandId::LogMonitor => self.cmd_log_monitor(call),
            CommandId::McpwmInfo => {
                call.result = self.services.mcpwm.info();
                Ok(())
            },
            CommandId::OtaCommit => {
                let checksum = call.params.string(0)?.to_string();
                call.result = self.services.ota.commit(&checksum)?;
                Ok(())
            },
            CommandId::OtaConfirm => {
                let slot = call.params.uint(0)? as u8;
                call.result = self.services.ota.confirm(slot)?;
                Ok(())
            },
            CommandId::OtaFinish => {
                call.result = self.services.ota.finish()?;
                Ok(())
            },
            CommandId::OtaStart => {
                let length = call.params.uint(0)? as usize;
                call.result = self.services.ota.start(length)?;
                Ok(())
            },
            CommandId::OtaWrite => {
                let length = call.params.uint(0)? as usize;
                let checksum_chunk = call.params.uint(1)? != 0;
                call.result = self.services.ota.write(length, checksum_chunk, &call.oob)?;
                Ok(())
            },
            CommandId::PdmInfo => {
                call.result = self.services.pdm.info();
                Ok(())
            },
            CommandId::ProcessList => self.cmd_process_list(call),
            CommandId::ProcessStop => self.cmd_process_stop(call),
            CommandId::Reset => {
                self.services.log.append(unix_now(), "reset requested");
                self.services.reset.notify_waiters();
                call.result = "OK reset".to_string();
                Ok(())
            },
            CommandId::Run => self.cmd_run(call),
            CommandId::SensorDump => self.cmd_sensor_dump(call),
            CommandId::SensorInfo => self.cmd_sensor_info(call),
            CommandId::SensorJson => {
                call.result = self.services.sensors.json();
                Ok(())
            },
            CommandId::SensorStats => {
                call.result = format!(
                    "sensors: {}\nsamples: {}",
                    self.services.sensors.list(true).len(),
                    self.services.sensors.total_samples()
                );
                Ok(())
            },
            CommandId::StringInfo => {
                call.result = format!(
                    "STRINGS\n- replies rendered: {}\n- reply bytes: {}\n- reply oob bytes: {}",
                    self.cli_stats.replies_sent,
                    self.cli_stats.reply_bytes,
                    self.cli_stats.reply_oob_bytes
                );
                Ok(())
            },
            CommandId::TcpInfo => self.cmd_tcp_info(call),
            CommandId::UdpInfo => self.cmd_udp_info(call),
            CommandId::WlanClientConfig => self.cmd_wlan_client_config(call),
            CommandId::WlanInfo => self.cmd_wlan_info(call),
            CommandId::Write => {
                call.result = call.params.string(0)?.to_string();
                Ok(())
            },
        }
    }

    fn cmd_alias(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        match call.params.len() {
            0 => {},
            1 => {
                let name = call.params.string(0)?.to_string();
                self.services.alias.remove(&name);
            },
            _ => {
                let name = call.params.string(0)?.to_string();
                let text = call.params.string(1)?.to_string();
                if !self.services.alias.set(&name, &text) {
                    return Err(CommandError::msg("alias table full"));
                }
            },
        }

        call.result = "ALIASES".to_string();
        for (name, text) in self.services.alias.iter() {
            call.result.push_str(&format!("\n  {name}: {text}"));
        }

        Ok(())
    }

    fn cmd_hostname(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        if let Some(description) = call.params.opt_string(1) {
            let description = description.replace('_', " ");
            self.services.config.set_string(KEY_HOSTNAME_DESC, &description);
        }

        if let Some(hostname) = call.params.opt_string(0) {
            let hostname = hostname.to_string();
            self.services.config.set_string(KEY_HOSTNAME, &hostname);
            if let Ok(mut editor) = self.services.console.lock() {
                editor.set_hostname(&hostname);
            }
        }

        let hostname =
            self.services.config.get_string(KEY_HOSTNAME).unwrap_or_else(|| "<unset>".to_string());
        let description = self
            .services
            .config
            .get_string(KEY_HOSTNAME_DESC)
            .unwrap_or_else(|| "<unset>".to_string());

        call.result = format!("hostname: {hostname} ({description})");
        Ok(())
    }

    fn cmd_run(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let script = call.params.string(0)?.to_string();

        let mut args: [String; 4] = Default::default();
        for (slot, index) in args.iter_mut().zip(1..) {
            if let Some(value) = call.params.opt_string(index) {
                *slot = value.to_string();
            }
        }

        self.services.scripts.spawn(&script, args);
        Ok(())
    }

    // Configuration

    fn cmd_config_dump(
        &mut self,
        call: &mut CommandCall,
        namespace: Option<&str>,
    ) -> Result<(), CommandError> {
        let lines = self.services.config.dump(namespace);
        call.result =
            if lines.is_empty() { "no config entries".to_string() } else { lines.join("\n") };
        Ok(())
    }

    fn cmd_config_erase(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let key = call.params.string(0)?;
        call.result = if self.services.config.erase(key) {
            format!("erase {key} OK")
        } else {
            format!("erase {key} not found")
        };
        Ok(())
    }

    fn cmd_config_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let (used, free, total) = self.services.config.stats();
        call.result = format!(
            "CONFIG INFO\nentries:\n- used: {used}\n- free: {free}\n- total: {total}\n- namespaces: 1"
        );
        Ok(())
    }

    fn read_back(&self, call: &mut CommandCall, key: &str) -> Result<(), CommandError> {
        match self.services.config.get(key) {
            Some(value) => {
                call.result = format!("{key}[{}]={}", value.type_name(), value.render());
                Ok(())
            },
            None => Err(CommandError::msg(format!("{key} not found"))),
        }
    }

    fn cmd_config_set_uint(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let key = call.params.string(0)?.to_string();
        let value = call.params.uint(1)?;
        self.services.config.set_uint(&key, value);
        self.read_back(call, &key)
    }

    fn cmd_config_set_int(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let key = call.params.string(0)?.to_string();
        let value = call.params.int(1)?;
        self.services.config.set_int(&key, value);
        self.read_back(call, &key)
    }

    fn cmd_config_set_string(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let key = call.params.string(0)?.to_string();
        let value = call.params.string(1)?.to_string();
        self.services.config.set_string(&key, &value);
        self.read_back(call, &key)
    }

    // Filesystem

    fn cmd_fs_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let (used, capacity) = self.services.ramfs.usage();
        let available = capacity.saturating_sub(used);
        let used_pct = if capacity == 0 { 0 } else { 100 * used / capacity };

        call.result = format!(
            "RAMDISK mounted at /ramdisk:\n- total size: {} kB\n- used: {} kB\n- available {} kB, {}% used",
            capacity / 1024,
            used / 1024,
            available / 1024,
            used_pct
        );
        Ok(())
    }

    fn cmd_fs_list(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let directory = call.params.string(0)?.to_string();

        let long = match call.params.opt_string(1) {
            Some("-l") => true,
            Some(option) => {
                return Err(CommandError::msg(format!("fs-list: unknown option: {option}")));
            },
            None => false,
        };

        let Ok(mut iter) = self.services.ramfs.opendir(&directory) else {
            call.result = format!("opendir of {directory} failed");
            return Ok(());
        };

        call.result = format!("DIRECTORY {directory}");

        while let Some(entry) = self.services.ramfs.readdir(&mut iter) {
            let Ok(stat) = self.services.ramfs.stat(&entry.name) else {
                continue;
            };

            if long {
                call.result.push_str(&format!(
                    "\n{:<20} {:>7} {:>4}k {} {} {:>11}",
                    entry.name,
                    stat.size,
                    (stat.blocks * stat.blksize) / 1024,
                    format_time(stat.ctime),
                    format_time(stat.mtime),
                    stat.ino
                ));
            } else {
                call.result.push_str(&format!("\n{:>3}k {:<20}", stat.size / 1024, entry.name));
            }
        }

        Ok(())
    }

    fn cmd_fs_format(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let partition = call.params.string(0)?.to_string();

        if partition != "ramdisk" {
            return Err(CommandError::msg(format!("unknown filesystem: {partition}")));
        }

        if self.services.ramfs.format().is_err() {
            return Err(CommandError::msg(format!("format of {partition} failed")));
        }

        call.result = "format complete".to_string();
        Ok(())
    }

    fn cmd_fs_read(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let length = call.params.uint(0)? as usize;
        let offset = call.params.uint(1)?;
        let file = call.params.string(2)?.to_string();

        let fd = self
            .services
            .ramfs
            .open(&file, OpenFlags::read_only())
            .map_err(|e| CommandError::msg(format!("cannot open file {file}: {e}")))?;

        let data = if self.services.ramfs.lseek(fd, i64::from(offset), Whence::Set).is_err() {
            Vec::new()
        } else {
            match self.services.ramfs.read(fd, length) {
                Ok(data) => data,
                Err(e) => {
                    let _ = self.services.ramfs.close(fd);
                    return Err(CommandError::msg(format!("read failed: {e}")));
                },
            }
        };

        let _ = self.services.ramfs.close(fd);

        call.result = format!("OK chunk read: {}", data.len());
        call.result_oob = data;
        Ok(())
    }

    fn cmd_fs_write(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let append = call.params.uint(0)? != 0;
        let length = call.params.uint(1)? as usize;
        let file = call.params.string(2)?.to_string();

        if call.oob.len() != length {
            return Err(CommandError::msg(format!(
                "length [{length}] != oob data length [{}]",
                call.oob.len()
            )));
        }

        let flags = if append {
            OpenFlags::write_only().create().appending()
        } else {
            OpenFlags::write_only().create().truncating()
        };

        let fd = self
            .services
            .ramfs
            .open(&file, flags)
            .map_err(|e| CommandError::msg(format!("cannot open file {file}: {e}")))?;

        let written = self.services.ramfs.write(fd, &call.oob);
        let _ = self.services.ramfs.close(fd);

        if written.is_err() {
            return Err(CommandError::msg("write failed"));
        }

        let size = self.services.ramfs.stat(&file).map_or(0, |stat| stat.size);
        call.result = format!("OK file length: {size}");
        Ok(())
    }

    fn cmd_fs_erase(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let file = call.params.string(0)?;
        call.result = if self.services.ramfs.unlink(file).is_ok() {
            "OK file erased".to_string()
        } else {
            "file erase failed".to_string()
        };
        Ok(())
    }

    fn cmd_fs_rename(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let from = call.params.string(0)?.to_string();
        let to = call.params.string(1)?.to_string();
        call.result = if self.services.ramfs.rename(&from, &to).is_ok() {
            "OK file renamed".to_string()
        } else {
            "file rename failed".to_string()
        };
        Ok(())
    }

    fn cmd_fs_truncate(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let file = call.params.string(0)?.to_string();
        let length = call.params.uint(1)? as usize;

        self.services
            .ramfs
            .truncate(&file, length)
            .map_err(|e| CommandError::msg(format!("cannot truncate file: {e}")))?;

        call.result = "OK truncated".to_string();
        Ok(())
    }

    fn cmd_fs_checksum(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let file = call.params.string(0)?.to_string();

        let data = self
            .services
            .ramfs
            .read_file(&file)
            .map_err(|e| CommandError::msg(format!("cannot open file: {e}")))?;

        call.result = format!("OK checksum: {}", hex::encode(Sha256::digest(&data)));
        Ok(())
    }

    // Introspection

    fn cmd_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let hostname =
            self.services.config.get_string(KEY_HOSTNAME).unwrap_or_else(|| "<unset>".to_string());

        call.result = format!(
            "busbar {}\nhostname: {hostname}\nuptime: {} s\nota: {}",
            env!("CARGO_PKG_VERSION"),
            self.started.elapsed().as_secs(),
            self.services.ota.state_name()
        );

        if let Some((written, expected)) = self.services.ota.progress() {
            call.result.push_str(&format!("\nota progress: {written}/{expected}"));
        }

        Ok(())
    }

    fn cmd_info_cli(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let s = self.cli_stats;
        call.result = format!(
            "commands received:\n- total: {}\n- packetised: {}\n- raw: {}\nreplies sent:\n- total: {}\n- packetised: {}\n- raw: {}",
            s.commands_received,
            s.commands_received_packet,
            s.commands_received_raw,
            s.replies_sent,
            s.replies_sent_packet,
            s.replies_sent_raw
        );
        Ok(())
    }

    fn cmd_info_memory(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let (used, capacity) = self.services.ramfs.usage();
        call.result = format!(
            "memory:\n- ramdisk used: {} kB\n- ramdisk capacity: {} kB\n- reply bytes rendered: {}\n- reply oob bytes rendered: {}",
            used / 1024,
            capacity / 1024,
            self.cli_stats.reply_bytes,
            self.cli_stats.reply_oob_bytes
        );
        Ok(())
    }

    fn cmd_info_partitions(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        call.result = "PARTITIONS".to_string();

        for slot in self.services.ota.flash().partitions() {
            let mut flags = String::new();
            if slot.boot {
                flags.push_str(" boot");
            }
            if slot.running {
                flags.push_str(" running");
            }
            if slot.pending_verify {
                flags.push_str(" pending-verify");
            }

            call.result.push_str(&format!(
                "\nslot {}: {} size {} used {}{}",
                slot.slot, slot.label, slot.size, slot.used, flags
            ));
        }

        Ok(())
    }

    fn cmd_process_list(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        call.result = "PROCESSES".to_string();
        for (name, running) in self.services.scripts.processes().list() {
            let state = if running { "running" } else { "finished" };
            call.result.push_str(&format!("\n  {name}: {state}"));
        }
        Ok(())
    }

    fn cmd_process_stop(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let name = call.params.string(0)?.to_string();

        if !self.services.scripts.processes().stop(&name) {
            return Err(CommandError::msg(format!("no such process: {name}")));
        }

        call.result = format!("OK process {name} stopped");
        Ok(())
    }

    // Log

    fn cmd_log(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let start = call.params.opt_uint(0).map(|v| v as usize);

        let rendered = self.services.log.with(|ring| {
            let (entries, remaining) = ring.drain_view(start, LOG_VIEW_CHUNK);
            let total = entries.len() + remaining;

            let mut out = format!("{total} entries:");
            for (index, entry) in &entries {
                out.push_str(&format!(
                    "\n{index:>3} {} {}",
                    format_time(entry.timestamp),
                    entry.text
                ));
            }
            if remaining > 0 {
                out.push_str(&format!("\n[{remaining} more]"));
            }
            out
        });

        call.result = rendered.unwrap_or_else(|| "0 entries:".to_string());
        Ok(())
    }

    fn cmd_log_clear(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        self.cmd_log(call)?;
        self.services.log.with(crate::logring::LogRing::clear);
        call.result.push_str("\nlog cleared");
        Ok(())
    }

    fn cmd_log_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let rendered = self.services.log.with(|ring| {
            format!(
                "logging\n  entries: {LOG_ENTRIES}\n  random salt: {:08x}\n  last entry added: {}\n  last entry viewed: {}\n  unread: {}",
                ring.salt(),
                ring.head_in(),
                ring.head_out(),
                ring.unread()
            )
        });

        call.result = rendered.unwrap_or_default();
        Ok(())
    }

    fn cmd_log_monitor(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        if let Some(activate) = call.params.opt_uint(0) {
            self.services.monitor.store(activate != 0, Ordering::Relaxed);
        }

        let state = if self.services.monitor.load(Ordering::Relaxed) { "on" } else { "off" };
        call.result = format!("log monitor: {state}");
        Ok(())
    }

    // I/O

    fn cmd_io_read(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let id = call.params.uint(0)?;
        let pin = call.params.uint(1)?;

        let value = self.services.io.read(id, pin).map_err(CommandError::Msg)?;
        call.result = format!("OK [{id}/{pin}] = {value}");
        Ok(())
    }

    fn cmd_io_write(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let id = call.params.uint(0)?;
        let pin = call.params.uint(1)?;
        let value = call.params.uint(2)?;

        self.services.io.write(id, pin, value).map_err(CommandError::Msg)?;
        call.result = format!("OK [{id}/{pin}] = {value}");
        Ok(())
    }

    fn cmd_io_dump(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        call.result = "IO".to_string();
        let lines = self.services.io.dump();
        if lines.is_empty() {
            call.result.push_str("\n  none");
        }
        for line in lines {
            call.result.push_str(&format!("\n  {line}"));
        }
        Ok(())
    }

    fn cmd_io_stats(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let stats = self.services.io.stats();
        call.result = format!(
            "io stats:\n- reads: {}\n- writes: {}\n- errors: {}",
            stats.reads, stats.writes, stats.errors
        );
        Ok(())
    }

    // Display

    fn cmd_display_brightness(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let percent = call.params.uint(0)?;
        self.services.display.set_brightness(percent);
        call.result = format!("OK display brightness {percent}");
        Ok(())
    }

    fn cmd_display_configure(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        match call.params.len() {
            0 => {
                call.result = match self.services.display.config() {
                    Some(c) => format!(
                        "display: type {} interface {} {}x{} flip {} invert {} rotate {}",
                        c.kind,
                        c.interface,
                        c.x_size,
                        c.y_size,
                        u32::from(c.flip),
                        u32::from(c.invert),
                        u32::from(c.rotate)
                    ),
                    None => "display not configured".to_string(),
                };
                Ok(())
            },
            7 => {
                self.services.display.configure(DisplayConfig {
                    kind: call.params.uint(0)?,
                    interface: call.params.uint(1)?,
                    x_size: call.params.uint(2)?,
                    y_size: call.params.uint(3)?,
                    flip: call.params.uint(4)? != 0,
                    invert: call.params.uint(5)? != 0,
                    rotate: call.params.uint(6)? != 0,
                });

                // The paint font lives on the filesystem; a missing or
                // corrupt file just leaves text pages unrendered.
                match self.services.ramfs.read_file(FONT_FILE) {
                    Ok(bytes) => match crate::font::Font::parse(&bytes) {
                        Ok(font) => self.services.display.set_font(font),
                        Err(e) => {
                            self.services.log.append(unix_now(), &format!("display: {e}"));
                        },
                    },
                    Err(_) => {},
                }

                call.result = "OK display configured".to_string();
                Ok(())
            },
            _ => Err(CommandError::msg("display-configure needs all 7 parameters")),
        }
    }

    fn cmd_display_erase(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        self.services.display.erase();
        call.result = "OK display configuration erased".to_string();
        Ok(())
    }

    fn cmd_display_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let display = &self.services.display;

        call.result = "DISPLAY".to_string();
        match display.config() {
            Some(c) => call.result.push_str(&format!(
                "\n- configured: {}x{}, type {}, interface {}",
                c.x_size, c.y_size, c.kind, c.interface
            )),
            None => call.result.push_str("\n- not configured"),
        }
        call.result.push_str(&format!("\n- brightness: {}%", display.brightness()));
        call.result.push_str(&format!(
            "\n- font: {}",
            display.font().map_or("none".to_string(), |f| format!(
                "{}x{}, {} extra glyphs",
                f.net_width,
                f.net_height,
                f.extra_count()
            ))
        ));
        call.result.push_str(&format!("\n- pages: {}", display.pages().len()));
        for page in display.pages() {
            match page {
                DisplayPage::Text { name, timeout, .. } => {
                    call.result.push_str(&format!("\n  text page {name} ({timeout} s)"));
                },
                DisplayPage::Image { name, timeout, filename, .. } => {
                    call.result
                        .push_str(&format!("\n  image page {name} ({timeout} s, {filename})"));
                },
            }
        }

        Ok(())
    }

    fn cmd_display_page_add_text(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let name = call.params.string(0)?.to_string();
        let timeout = call.params.uint(1)?;
        let text = call.params.string(2)?.to_string();

        self.services
            .display
            .add_page(DisplayPage::Text { name: name.clone(), timeout, text })
            .map_err(CommandError::Msg)?;

        call.result = format!("OK page {name} added");
        Ok(())
    }

    fn cmd_display_page_add_image(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let name = call.params.string(0)?.to_string();
        let timeout = call.params.uint(1)?;
        let filename = call.params.string(2)?.to_string();
        let length = call.params.uint(3)?;

        let stat = self
            .services
            .ramfs
            .stat(&filename)
            .map_err(|e| CommandError::msg(format!("cannot open file {filename}: {e}")))?;

        if stat.size != u64::from(length) {
            return Err(CommandError::msg(format!(
                "file length mismatch: {length} vs. {}",
                stat.size
            )));
        }

        self.services
            .display
            .add_page(DisplayPage::Image { name: name.clone(), timeout, filename, length })
            .map_err(CommandError::Msg)?;

        call.result = format!("OK page {name} added");
        Ok(())
    }

    fn cmd_display_page_remove(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let name = call.params.string(0)?.to_string();

        if !self.services.display.remove_page(&name) {
            return Err(CommandError::msg(format!("page {name} not found")));
        }

        call.result = format!("OK page {name} removed");
        Ok(())
    }

    // I2C and channel banks

    fn cmd_i2c_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        call.result = "I2C".to_string();
        for (index, module) in self.services.i2c.modules().iter().enumerate() {
            call.result.push_str(&format!("\n- module {index}: {} kHz", module.speed_khz));
        }
        Ok(())
    }

    fn cmd_i2c_speed(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        if let (Some(module), Some(speed)) = (call.params.opt_uint(0), call.params.opt_uint(1)) {
            self.services.i2c.set_speed(module, speed).map_err(CommandError::Msg)?;
            call.result = format!("OK i2c module {module} speed {speed} kHz");
            return Ok(());
        }

        self.cmd_i2c_info(call)
    }

    // Sensors

    fn cmd_sensor_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let include_disabled = call.params.opt_uint(0) == Some(1);

        call.result = "SENSORS".to_string();
        for sensor in self.services.sensors.list(include_disabled) {
            let suffix = if sensor.enabled { "" } else { " (disabled)" };
            call.result.push_str(&format!(
                "\n  {}: {} {}{suffix}",
                sensor.name, sensor.value, sensor.unit
            ));
        }
        Ok(())
    }

    fn cmd_sensor_dump(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        call.result = "SENSOR DUMP".to_string();

        if let Some(index) = call.params.opt_uint(0) {
            let sensor = self
                .services
                .sensors
                .get(index as usize)
                .ok_or_else(|| CommandError::msg(format!("no sensor {index}")))?;
            call.result.push_str(&format!(
                "\n  {}: {} {} ({} samples)",
                sensor.name, sensor.value, sensor.unit, sensor.samples
            ));
            return Ok(());
        }

        for sensor in self.services.sensors.list(true) {
            call.result.push_str(&format!(
                "\n  {}: {} {} ({} samples)",
                sensor.name, sensor.value, sensor.unit, sensor.samples
            ));
        }
        Ok(())
    }

    // Transport statistics

    fn cmd_bt_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let c = self.services.stats.ble.snapshot();
        call.result = format!(
            "BLUETOOTH\nreceived:\n- bytes: {}\n- fragments: {}\n- packets: {}\n- unauthorised writes: {}\nsent:\n- bytes: {}\n- fragments: {}\n- packets: {}\n- errors: {}",
            c.received_bytes,
            c.received_fragments,
            c.received_packets,
            c.unauthorised,
            c.sent_bytes,
            c.sent_fragments,
            c.sent_packets,
            c.errors
        );
        Ok(())
    }

    fn cmd_tcp_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let c = self.services.stats.tcp.snapshot();
        call.result = format!(
            "tcp send\n- sent bytes {}\n- sent segments {}\n- sent packets: {}\n- send errors: {}\ntcp receive\n- received bytes {}\n- received segments {}\n- received packets: {}\n- accepted connections: {}\n- segmentation timeouts: {}",
            c.sent_bytes,
            c.sent_fragments,
            c.sent_packets,
            c.errors,
            c.received_bytes,
            c.received_fragments,
            c.received_packets,
            c.accepts,
            c.timeouts
        );
        Ok(())
    }

    fn cmd_udp_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let c = self.services.stats.udp.snapshot();
        call.result = format!(
            "udp send\n- sent bytes {}\n- sent packets: {}\nudp receive\n- received bytes {}\n- received packets: {}",
            c.sent_bytes, c.sent_packets, c.received_bytes, c.received_packets
        );
        Ok(())
    }

    fn cmd_console_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let stats = self
            .services
            .console
            .lock()
            .map(|editor| editor.stats())
            .unwrap_or_default();

        call.result = format!(
            "entered:\n- lines: {}\n- bytes: {}\nreplies:\n- lines: {}\n- bytes: {}",
            stats.lines_received, stats.bytes_received, stats.lines_sent, stats.bytes_sent
        );
        Ok(())
    }

    // WLAN

    fn cmd_wlan_client_config(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        if let Some(ssid) = call.params.opt_string(0) {
            let ssid = ssid.to_string();
            self.services.config.set_string(KEY_WLAN_SSID, &ssid);
        }
        if let Some(password) = call.params.opt_string(1) {
            let password = password.to_string();
            self.services.config.set_string(KEY_WLAN_PASSWD, &password);
        }

        let ssid = self
            .services
            .config
            .get_string(KEY_WLAN_SSID)
            .unwrap_or_else(|| "<unset>".to_string());

        call.result = format!("wlan client config:\n- ssid: {ssid}");
        Ok(())
    }

    fn cmd_wlan_info(&mut self, call: &mut CommandCall) -> Result<(), CommandError> {
        let ssid = self
            .services
            .config
            .get_string(KEY_WLAN_SSID)
            .unwrap_or_else(|| "<unset>".to_string());
        let hostname =
            self.services.config.get_string(KEY_HOSTNAME).unwrap_or_else(|| "<unset>".to_string());

        call.result = format!("WLAN\n- hostname: {hostname}\n- ssid: {ssid}\n- mode: client");
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("cli_stats", &self.cli_stats).finish_non_exhaustive()
    }
}

/// Render unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC; the device has no
/// timezone database).
fn format_time(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map_or_else(|| "????-??-?? ??:??:??".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}
