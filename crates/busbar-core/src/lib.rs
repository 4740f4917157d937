//! Command plane for the busbar controller.
//!
//! An external host drives every device function over one request/response
//! bus: storage, OTA updates, display painting, I/O expanders, scripting.
//! This crate is that bus and the collaborators it strictly owns, kept free
//! of real I/O so the whole plane runs identically on the device, on a host
//! build and under test:
//!
//! - [`dispatch::Dispatcher`]: the typed command dispatcher over the static
//!   [`command::COMMAND_TABLE`];
//! - [`pipeline`]: the intake/send worker pair with bounded queues;
//! - [`ota::OtaEngine`]: staged firmware updates with commit/confirm
//!   rollback semantics;
//! - [`ramfs::Ramfs`]: the RAM-backed filesystem behind OTA staging, script
//!   loading and logging;
//! - [`logring::LogRing`]: the retained post-mortem log;
//! - [`console::LineEditor`], [`ble::BleSession`], [`script::ScriptRunner`]:
//!   the sans-IO sides of the transports.
//!
//! The actual sockets, terminals and radio glue live in the runtime crate.

pub mod alias;
pub mod ble;
pub mod command;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod font;
pub mod logring;
pub mod ota;
pub mod params;
pub mod periph;
pub mod pipeline;
pub mod ramfs;
pub mod script;
pub mod stats;
