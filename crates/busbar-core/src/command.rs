//! The static command table.
//!
//! Every wire-visible command is one [`CommandSpec`] entry: name, optional
//! short alias, help line and parameter specs. Lookup is by name or alias;
//! the dispatcher matches the entry's [`CommandId`] to the handler.

use thiserror::Error;

use crate::{
    ota::OtaError,
    params::{ParamError, ParamSpec},
    ramfs::FsError,
};

/// Handler selector; one variant per table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CommandId {
    Alias,
    BtInfo,
    ConfigDump,
    ConfigErase,
    ConfigInfo,
    ConfigSetInt,
    ConfigSetUint,
    ConfigSetString,
    ConfigShow,
    ConsoleInfo,
    DisplayBrightness,
    DisplayConfigure,
    DisplayErase,
    DisplayInfo,
    DisplayPageAddText,
    DisplayPageAddImage,
    DisplayPageRemove,
    FsChecksum,
    FsErase,
    FsFormat,
    FsInfo,
    FsList,
    FsRead,
    FsRename,
    FsTruncate,
    FsWrite,
    Help,
    Hostname,
    I2cInfo,
    I2cSpeed,
    Info,
    InfoCli,
    InfoMemory,
    InfoPartitions,
    IoDump,
    IoRead,
    IoStats,
    IoWrite,
    LedPixelInfo,
    LedPwmInfo,
    Log,
    LogClear,
    LogInfo,
    LogMonitor,
    McpwmInfo,
    OtaCommit,
    OtaConfirm,
    OtaFinish,
    OtaStart,
    OtaWrite,
    PdmInfo,
    ProcessList,
    ProcessStop,
    Reset,
    Run,
    SensorDump,
    SensorInfo,
    SensorJson,
    SensorStats,
    StringInfo,
    TcpInfo,
    UdpInfo,
    WlanClientConfig,
    WlanInfo,
    Write,
}

/// One table entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Primary name, e.g. `config-set-uint`.
    pub name: &'static str,
    /// Short alias, e.g. `csu`.
    pub alias: Option<&'static str>,
    /// One-line help text.
    pub help: &'static str,
    /// Handler selector.
    pub id: CommandId,
    /// Parameter specs, in consumption order.
    pub params: &'static [ParamSpec],
}

/// Errors a handler can produce; the dispatcher renders them as
/// `ERROR: <text>` replies. All errors are local to one command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Parameter parsing/validation failure.
    #[error("{0}")]
    Param(#[from] ParamError),

    /// OTA engine failure (session already aborted where applicable).
    #[error("{0}")]
    Ota(#[from] OtaError),

    /// Filesystem failure; descriptors have been released.
    #[error("{0}")]
    Fs(#[from] FsError),

    /// Free-form handler failure.
    #[error("{0}")]
    Msg(String),
}

impl CommandError {
    /// Free-form error text.
    pub fn msg(text: impl Into<String>) -> Self {
        Self::Msg(text.into())
    }
}

/// The command table, sorted by name. Kept static so `help` and the
/// dispatcher agree on the same surface.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "alias",
        alias: None,
        help: "set alias",
        id: CommandId::Alias,
        params: &[
            ParamSpec::string("alias").optional(),
            ParamSpec::raw("substitution text").optional(),
        ],
    },
    CommandSpec {
        name: "bt-info",
        alias: Some("bi"),
        help: "show information about bluetooth",
        id: CommandId::BtInfo,
        params: &[],
    },
    CommandSpec {
        name: "config-dump",
        alias: Some("cd"),
        help: "dump all config keys",
        id: CommandId::ConfigDump,
        params: &[],
    },
    CommandSpec {
        name: "config-erase",
        alias: Some("ce"),
        help: "erase a config entry",
        id: CommandId::ConfigErase,
        params: &[ParamSpec::string("key")],
    },
    CommandSpec {
        name: "config-info",
        alias: Some("ci"),
        help: "show information about the configuration",
        id: CommandId::ConfigInfo,
        params: &[],
    },
    CommandSpec {
        name: "config-set-int",
        alias: Some("csi"),
        help: "set a signed int config value",
        id: CommandId::ConfigSetInt,
        params: &[ParamSpec::string("key"), ParamSpec::int("value")],
    },
    CommandSpec {
        name: "config-set-string",
        alias: Some("css"),
        help: "set a string config value",
        id: CommandId::ConfigSetString,
        params: &[ParamSpec::string("key"), ParamSpec::string("value")],
    },
    CommandSpec {
        name: "config-set-uint",
        alias: Some("csu"),
        help: "set an unsigned int config value",
        id: CommandId::ConfigSetUint,
        params: &[ParamSpec::string("key"), ParamSpec::uint("value")],
    },
    CommandSpec {
        name: "config-show",
        alias: Some("cs"),
        help: "show config",
        id: CommandId::ConfigShow,
        params: &[],
    },
    CommandSpec {
        name: "console-info",
        alias: Some("coni"),
        help: "show information about the console",
        id: CommandId::ConsoleInfo,
        params: &[],
    },
    CommandSpec {
        name: "display-brightness",
        alias: Some("db"),
        help: "display brightness",
        id: CommandId::DisplayBrightness,
        params: &[ParamSpec::uint_range("brightness percentage", 0, 100)],
    },
    CommandSpec {
        name: "display-configure",
        alias: Some("dc"),
        help: "configure display",
        id: CommandId::DisplayConfigure,
        params: &[
            ParamSpec::uint_range("display type", 0, 2).optional(),
            ParamSpec::uint_range("interface", 0, 1).optional(),
            ParamSpec::uint_range("x-size", 16, 1024).optional(),
            ParamSpec::uint_range("y-size", 16, 1024).optional(),
            ParamSpec::uint_range("flip", 0, 1).optional(),
            ParamSpec::uint_range("invert", 0, 1).optional(),
            ParamSpec::uint_range("rotate", 0, 1).optional(),
        ],
    },
    CommandSpec {
        name: "display-erase",
        alias: Some("de"),
        help: "erase display configuration",
        id: CommandId::DisplayErase,
        params: &[],
    },
    CommandSpec {
        name: "display-info",
        alias: Some("di"),
        help: "display information",
        id: CommandId::DisplayInfo,
        params: &[],
    },
    CommandSpec {
        name: "display-page-add-image",
        alias: Some("dpai"),
        help: "add image page to display",
        id: CommandId::DisplayPageAddImage,
        params: &[
            ParamSpec::string("page name"),
            ParamSpec::uint("timeout"),
            ParamSpec::string("filename"),
            ParamSpec::uint("file length"),
        ],
    },
    CommandSpec {
        name: "display-page-add-text",
        alias: Some("dpat"),
        help: "add text page to display",
        id: CommandId::DisplayPageAddText,
        params: &[
            ParamSpec::string("page name"),
            ParamSpec::uint("timeout"),
            ParamSpec::raw("text"),
        ],
    },
    CommandSpec {
        name: "display-page-remove",
        alias: Some("dpr"),
        help: "remove page from display",
        id: CommandId::DisplayPageRemove,
        params: &[ParamSpec::string("page name")],
    },
    CommandSpec {
        name: "fs-checksum",
        alias: None,
        help: "checksum a file on the filesystem",
        id: CommandId::FsChecksum,
        params: &[ParamSpec::string_len("file", 1, 64)],
    },
    CommandSpec {
        name: "fs-erase",
        alias: None,
        help: "erase file on the filesystem",
        id: CommandId::FsErase,
        params: &[ParamSpec::string_len("file", 1, 64)],
    },
    CommandSpec {
        name: "fs-format",
        alias: Some("fsf"),
        help: "format the filesystem",
        id: CommandId::FsFormat,
        params: &[ParamSpec::string("partition name of fs to format")],
    },
    CommandSpec {
        name: "fs-info",
        alias: Some("fsi"),
        help: "show info about the filesystem",
        id: CommandId::FsInfo,
        params: &[],
    },
    CommandSpec {
        name: "fs-list",
        alias: Some("ls"),
        help: "show all files on the filesystem",
        id: CommandId::FsList,
        params: &[
            ParamSpec::string("directory to list"),
            ParamSpec::string("option [-l]").optional(),
        ],
    },
    CommandSpec {
        name: "fs-read",
        alias: None,
        help: "read chunk from a file",
        id: CommandId::FsRead,
        params: &[
            ParamSpec::uint_range("length", 0, 4096),
            ParamSpec::uint("offset"),
            ParamSpec::string_len("file", 1, 64),
        ],
    },
    CommandSpec {
        name: "fs-rename",
        alias: Some("mv"),
        help: "rename file on the filesystem",
        id: CommandId::FsRename,
        params: &[
            ParamSpec::string_len("from file", 1, 64),
            ParamSpec::string_len("to file", 1, 64),
        ],
    },
    CommandSpec {
        name: "fs-truncate",
        alias: None,
        help: "truncate a file",
        id: CommandId::FsTruncate,
        params: &[ParamSpec::string_len("file", 1, 64), ParamSpec::uint("length")],
    },
    CommandSpec {
        name: "fs-write",
        alias: None,
        help: "write to a file on the filesystem",
        id: CommandId::FsWrite,
        params: &[
            ParamSpec::uint_range("mode, 0 = truncate, 1 = append", 0, 1),
            ParamSpec::uint_range("length", 0, 4096),
            ParamSpec::string_len("file", 1, 64),
        ],
    },
    CommandSpec {
        name: "help",
        alias: Some("?"),
        help: "this help",
        id: CommandId::Help,
        params: &[ParamSpec::string("command to show help about").optional()],
    },
    CommandSpec {
        name: "hostname",
        alias: None,
        help: "set hostname and description",
        id: CommandId::Hostname,
        params: &[
            ParamSpec::string_len("hostname", 0, 12).optional(),
            ParamSpec::string_len("description", 0, 32).optional(),
        ],
    },
    CommandSpec {
        name: "i2c-info",
        alias: Some("i2i"),
        help: "info about the I2C interfaces",
        id: CommandId::I2cInfo,
        params: &[],
    },
    CommandSpec {
        name: "i2c-speed",
        alias: Some("i2s"),
        help: "set speed of I2C interface",
        id: CommandId::I2cSpeed,
        params: &[
            ParamSpec::uint_range("module", 0, 1).optional(),
            ParamSpec::uint_range("speed in kHz", 0, 500).optional(),
        ],
    },
    CommandSpec {
        name: "info",
        alias: None,
        help: "show some generic information",
        id: CommandId::Info,
        params: &[],
    },
    CommandSpec {
        name: "info-cli",
        alias: Some("ic"),
        help: "show information about the cli",
        id: CommandId::InfoCli,
        params: &[],
    },
    CommandSpec {
        name: "info-memory",
        alias: Some("im"),
        help: "show information about memory",
        id: CommandId::InfoMemory,
        params: &[],
    },
    CommandSpec {
        name: "info-partitions",
        alias: Some("ip"),
        help: "show information about partitions",
        id: CommandId::InfoPartitions,
        params: &[],
    },
    CommandSpec {
        name: "io-dump",
        alias: Some("iod"),
        help: "dump everything known about found IOs",
        id: CommandId::IoDump,
        params: &[],
    },
    CommandSpec {
        name: "io-read",
        alias: Some("ior"),
        help: "read from I/O pin",
        id: CommandId::IoRead,
        params: &[ParamSpec::uint("I/O id"), ParamSpec::uint("pin")],
    },
    CommandSpec {
        name: "io-stats",
        alias: Some("ios"),
        help: "statistics about IOs",
        id: CommandId::IoStats,
        params: &[],
    },
    CommandSpec {
        name: "io-write",
        alias: Some("iow"),
        help: "write to I/O pin",
        id: CommandId::IoWrite,
        params: &[ParamSpec::uint("I/O id"), ParamSpec::uint("pin"), ParamSpec::uint("value")],
    },
    CommandSpec {
        name: "ledpixel-info",
        alias: Some("lpxi"),
        help: "info about LEDpixel channels",
        id: CommandId::LedPixelInfo,
        params: &[],
    },
    CommandSpec {
        name: "ledpwm-info",
        alias: Some("lpi"),
        help: "info about LED PWM channels and timers",
        id: CommandId::LedPwmInfo,
        params: &[],
    },
    CommandSpec {
        name: "log",
        alias: Some("l"),
        help: "show log",
        id: CommandId::Log,
        params: &[ParamSpec::uint_range("start entry", 0, 128).optional()],
    },
    CommandSpec {
        name: "log-clear",
        alias: Some("lc"),
        help: "show log and clear it",
        id: CommandId::LogClear,
        params: &[],
    },
    CommandSpec {
        name: "log-info",
        alias: Some("li"),
        help: "show information about the log",
        id: CommandId::LogInfo,
        params: &[],
    },
    CommandSpec {
        name: "log-monitor",
        alias: Some("lm"),
        help: "enable/disable output log to console",
        id: CommandId::LogMonitor,
        params: &[ParamSpec::uint_range("activate", 0, 1).optional()],
    },
    CommandSpec {
        name: "mcpwm-info",
        alias: Some("mpi"),
        help: "info about MCPWM channels and timers",
        id: CommandId::McpwmInfo,
        params: &[],
    },
    CommandSpec {
        name: "ota-commit",
        alias: None,
        help: "verify and select finished ota session",
        id: CommandId::OtaCommit,
        params: &[ParamSpec::string_len("checksum", 64, 64)],
    },
    CommandSpec {
        name: "ota-confirm",
        alias: None,
        help: "confirm ota image runs correctly",
        id: CommandId::OtaConfirm,
        params: &[ParamSpec::uint_range("slot", 0, 1)],
    },
    CommandSpec {
        name: "ota-finish",
        alias: None,
        help: "finish ota session",
        id: CommandId::OtaFinish,
        params: &[],
    },
    CommandSpec {
        name: "ota-start",
        alias: None,
        help: "start ota session",
        id: CommandId::OtaStart,
        params: &[ParamSpec::uint("length")],
    },
    CommandSpec {
        name: "ota-write",
        alias: None,
        help: "write one sector of ota data",
        id: CommandId::OtaWrite,
        params: &[ParamSpec::uint("length"), ParamSpec::uint_range("checksum flag", 0, 1)],
    },
    CommandSpec {
        name: "pdm-info",
        alias: Some("pin"),
        help: "info about pdm channels",
        id: CommandId::PdmInfo,
        params: &[],
    },
    CommandSpec {
        name: "process-list",
        alias: Some("ps"),
        help: "show information about running processes",
        id: CommandId::ProcessList,
        params: &[ParamSpec::uint_range("core id", 0, 1).optional()],
    },
    CommandSpec {
        name: "process-stop",
        alias: Some("kill"),
        help: "stop running process",
        id: CommandId::ProcessStop,
        params: &[ParamSpec::string("process")],
    },
    CommandSpec {
        name: "reset",
        alias: Some("r"),
        help: "reset",
        id: CommandId::Reset,
        params: &[],
    },
    CommandSpec {
        name: "run",
        alias: None,
        help: "run a script",
        id: CommandId::Run,
        params: &[
            ParamSpec::string("script name"),
            ParamSpec::string("parameter 1").optional(),
            ParamSpec::string("parameter 2").optional(),
            ParamSpec::string("parameter 3").optional(),
            ParamSpec::string("parameter 4").optional(),
        ],
    },
    CommandSpec {
        name: "sensor-dump",
        alias: Some("sd"),
        help: "dump registered sensors",
        id: CommandId::SensorDump,
        params: &[ParamSpec::uint("sensor index to dump").optional()],
    },
    CommandSpec {
        name: "sensor-info",
        alias: Some("si"),
        help: "info about registered sensors",
        id: CommandId::SensorInfo,
        params: &[ParamSpec::uint_range("include disabled devices", 0, 1).optional()],
    },
    CommandSpec {
        name: "sensor-json",
        alias: Some("sj"),
        help: "sensors values in json layout",
        id: CommandId::SensorJson,
        params: &[],
    },
    CommandSpec {
        name: "sensor-stats",
        alias: Some("ss"),
        help: "sensors statistics",
        id: CommandId::SensorStats,
        params: &[],
    },
    CommandSpec {
        name: "string-info",
        alias: Some("sti"),
        help: "show information about reply buffers",
        id: CommandId::StringInfo,
        params: &[],
    },
    CommandSpec {
        name: "tcp-info",
        alias: Some("ti"),
        help: "show information about tcp",
        id: CommandId::TcpInfo,
        params: &[],
    },
    CommandSpec {
        name: "udp-info",
        alias: Some("ui"),
        help: "show information about udp",
        id: CommandId::UdpInfo,
        params: &[],
    },
    CommandSpec {
        name: "wlan-client-config",
        alias: Some("wcc"),
        help: "set wireless ssid and password in client mode",
        id: CommandId::WlanClientConfig,
        params: &[
            ParamSpec::string_len("ssid", 0, 63).optional(),
            ParamSpec::string_len("password", 0, 63).optional(),
        ],
    },
    CommandSpec {
        name: "wlan-info",
        alias: Some("wi"),
        help: "show information about wlan",
        id: CommandId::WlanInfo,
        params: &[],
    },
    CommandSpec {
        name: "write",
        alias: Some("w"),
        help: "write to output",
        id: CommandId::Write,
        params: &[ParamSpec::raw("text")],
    },
];

/// Look up a command by name or alias.
#[must_use]
pub fn lookup(token: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == token || spec.alias == Some(token))
}

/// Render the `help` reply: the whole table, or one command with its
/// parameter descriptions.
#[must_use]
pub fn render_help(filter: Option<&str>) -> String {
    let mut out = String::from("HELP");

    for spec in COMMAND_TABLE {
        if let Some(name) = filter {
            if spec.name != name && spec.alias != Some(name) {
                continue;
            }
        }

        out.push_str(&format!(
            "\n  {:<18} {:<4} {}",
            spec.name,
            spec.alias.unwrap_or(""),
            spec.help
        ));

        if filter.is_some() {
            for param in spec.params {
                let (open, close) = if param.required { ("[", "]") } else { ("(", ")") };
                out.push_str(&format!(
                    " {open}{} {}{close}",
                    param.kind.type_name(),
                    param.description
                ));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_unique() {
        for window in COMMAND_TABLE.windows(2) {
            assert!(
                window[0].name < window[1].name,
                "{} >= {}",
                window[0].name,
                window[1].name
            );
        }
    }

    #[test]
    fn aliases_do_not_collide_with_names() {
        for spec in COMMAND_TABLE {
            if let Some(alias) = spec.alias {
                assert!(
                    COMMAND_TABLE.iter().filter(|s| s.name == alias || s.alias == Some(alias)).count()
                        == 1,
                    "alias {alias} is ambiguous"
                );
            }
        }
    }

    #[test]
    fn lookup_by_name_and_alias() {
        assert_eq!(lookup("help").map(|s| s.id), Some(CommandId::Help));
        assert_eq!(lookup("?").map(|s| s.id), Some(CommandId::Help));
        assert_eq!(lookup("csu").map(|s| s.id), Some(CommandId::ConfigSetUint));
        assert!(lookup("nonsense").is_none());
    }

    #[test]
    fn help_lists_every_command() {
        let help = render_help(None);
        assert!(help.starts_with("HELP"));
        assert!(help.contains("\n  help"));
        for spec in COMMAND_TABLE {
            assert!(help.contains(spec.name), "missing {}", spec.name);
        }
    }

    #[test]
    fn filtered_help_shows_parameters() {
        let help = render_help(Some("ota-write"));
        assert!(help.contains("ota-write"));
        assert!(help.contains("[u_int length]"));
        assert!(help.contains("[u_int checksum flag]"));
        assert!(!help.contains("config-dump"));
    }
}
