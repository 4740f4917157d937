//! Peripheral registries behind the I/O command surface.
//!
//! The device drivers themselves (I2C expanders, LED/PWM/PDM silicon,
//! display controllers, sensors) are opaque collaborators; what the command
//! plane owns is the bookkeeping: fixed-capacity registries of tagged
//! handles, per-device statistics, and the display page store. Handles are
//! small integers indexing into the registry, never raw pointers.

use crate::font::Font;

/// Registry capacity for I/O devices.
pub const IO_DEVICES_MAX: usize = 8;

/// Registry capacity for display pages.
pub const DISPLAY_PAGES_MAX: usize = 16;

/// An I/O device as seen by `io-read`/`io-write`. Real builds wrap the
/// expander drivers; the host build uses [`GpioBank`].
pub trait IoDevice: Send {
    /// Device name for `io-dump`.
    fn name(&self) -> &str;
    /// Number of addressable pins.
    fn pin_count(&self) -> u32;
    /// Read one pin.
    fn read(&mut self, pin: u32) -> Result<u32, String>;
    /// Write one pin.
    fn write(&mut self, pin: u32, value: u32) -> Result<(), String>;
}

/// Memory-backed [`IoDevice`]: every pin is a latch.
#[derive(Debug)]
pub struct GpioBank {
    name: String,
    pins: Vec<u32>,
}

impl GpioBank {
    /// A bank of `pins` latches, all zero.
    #[must_use]
    pub fn new(name: &str, pins: u32) -> Self {
        Self { name: name.to_string(), pins: vec![0; pins as usize] }
    }
}

impl IoDevice for GpioBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn pin_count(&self) -> u32 {
        self.pins.len() as u32
    }

    fn read(&mut self, pin: u32) -> Result<u32, String> {
        self.pins
            .get(pin as usize)
            .copied()
            .ok_or_else(|| format!("pin {pin} out of range"))
    }

    fn write(&mut self, pin: u32, value: u32) -> Result<(), String> {
        match self.pins.get_mut(pin as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            },
            None => Err(format!("pin {pin} out of range")),
        }
    }
}

/// Per-registry counters for `io-stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Successful pin reads.
    pub reads: u32,
    /// Successful pin writes.
    pub writes: u32,
    /// Failed operations.
    pub errors: u32,
}

/// Fixed-capacity registry of I/O devices, indexed by small-integer id.
pub struct IoRegistry {
    devices: Vec<Box<dyn IoDevice>>,
    stats: IoStats,
}

impl IoRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { devices: Vec::new(), stats: IoStats::default() }
    }

    /// Register a device; returns its id, or `None` when full.
    pub fn register(&mut self, device: Box<dyn IoDevice>) -> Option<u8> {
        if self.devices.len() >= IO_DEVICES_MAX {
            return None;
        }
        self.devices.push(device);
        Some((self.devices.len() - 1) as u8)
    }

    /// Read a pin on a device.
    pub fn read(&mut self, id: u32, pin: u32) -> Result<u32, String> {
        let device = self
            .devices
            .get_mut(id as usize)
            .ok_or_else(|| format!("no I/O device {id}"))?;

        match device.read(pin) {
            Ok(value) => {
                self.stats.reads += 1;
                Ok(value)
            },
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            },
        }
    }

    /// Write a pin on a device.
    pub fn write(&mut self, id: u32, pin: u32, value: u32) -> Result<(), String> {
        let device = self
            .devices
            .get_mut(id as usize)
            .ok_or_else(|| format!("no I/O device {id}"))?;

        match device.write(pin, value) {
            Ok(()) => {
                self.stats.writes += 1;
                Ok(())
            },
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            },
        }
    }

    /// `io-dump` lines: one per registered device.
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        self.devices
            .iter()
            .enumerate()
            .map(|(id, d)| format!("{id}: {} ({} pins)", d.name(), d.pin_count()))
            .collect()
    }

    /// Counters for `io-stats`.
    #[must_use]
    pub fn stats(&self) -> IoStats {
        self.stats
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRegistry").field("devices", &self.devices.len()).finish_non_exhaustive()
    }
}

/// Static display configuration set by `display-configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Controller type index.
    pub kind: u32,
    /// Bus interface index.
    pub interface: u32,
    /// Horizontal pixels.
    pub x_size: u32,
    /// Vertical pixels.
    pub y_size: u32,
    /// Mirror the output.
    pub flip: bool,
    /// Invert the output.
    pub invert: bool,
    /// Rotate by 90 degrees.
    pub rotate: bool,
}

/// One page in the display rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayPage {
    /// Text rendered with the loaded bitmap font.
    Text {
        /// Page name (replace key).
        name: String,
        /// Seconds before the page expires.
        timeout: u32,
        /// Text content, newlines preserved.
        text: String,
    },
    /// Image loaded from a filesystem file.
    Image {
        /// Page name (replace key).
        name: String,
        /// Seconds before the page expires.
        timeout: u32,
        /// Source file.
        filename: String,
        /// Expected file length.
        length: u32,
    },
}

impl DisplayPage {
    /// Page name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Image { name, .. } => name,
        }
    }
}

/// Display state owned by the command plane; the panel driver is opaque.
#[derive(Debug, Default)]
pub struct Display {
    config: Option<DisplayConfig>,
    brightness: u32,
    pages: Vec<DisplayPage>,
    font: Option<Font>,
}

impl Display {
    /// Fresh, unconfigured display.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the static configuration.
    pub fn configure(&mut self, config: DisplayConfig) {
        self.config = Some(config);
    }

    /// Drop the configuration and all pages.
    pub fn erase(&mut self) {
        self.config = None;
        self.pages.clear();
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> Option<DisplayConfig> {
        self.config
    }

    /// Set brightness percent.
    pub fn set_brightness(&mut self, percent: u32) {
        self.brightness = percent;
    }

    /// Brightness percent.
    #[must_use]
    pub fn brightness(&self) -> u32 {
        self.brightness
    }

    /// Load the paint font.
    pub fn set_font(&mut self, font: Font) {
        self.font = Some(font);
    }

    /// Loaded font, if any.
    #[must_use]
    pub fn font(&self) -> Option<&Font> {
        self.font.as_ref()
    }

    /// Add or replace a page by name. Fails when the rotation is full.
    pub fn add_page(&mut self, page: DisplayPage) -> Result<(), String> {
        if let Some(existing) = self.pages.iter_mut().find(|p| p.name() == page.name()) {
            *existing = page;
            return Ok(());
        }

        if self.pages.len() >= DISPLAY_PAGES_MAX {
            return Err(format!("page table full ({DISPLAY_PAGES_MAX})"));
        }

        self.pages.push(page);
        Ok(())
    }

    /// Remove a page by name; reports whether it existed.
    pub fn remove_page(&mut self, name: &str) -> bool {
        let before = self.pages.len();
        self.pages.retain(|p| p.name() != name);
        self.pages.len() != before
    }

    /// Pages in rotation order.
    #[must_use]
    pub fn pages(&self) -> &[DisplayPage] {
        &self.pages
    }
}

/// One I2C module's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cModule {
    /// Bus speed in kHz.
    pub speed_khz: u32,
}

/// The two I2C host modules.
#[derive(Debug)]
pub struct I2cBuses {
    modules: [I2cModule; 2],
}

impl I2cBuses {
    /// Both modules at the default 100 kHz.
    #[must_use]
    pub fn new() -> Self {
        Self { modules: [I2cModule { speed_khz: 100 }; 2] }
    }

    /// Set one module's speed.
    pub fn set_speed(&mut self, module: u32, speed_khz: u32) -> Result<(), String> {
        match self.modules.get_mut(module as usize) {
            Some(m) => {
                m.speed_khz = speed_khz;
                Ok(())
            },
            None => Err(format!("no I2C module {module}")),
        }
    }

    /// Module descriptors.
    #[must_use]
    pub fn modules(&self) -> &[I2cModule] {
        &self.modules
    }
}

impl Default for I2cBuses {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-size bank of identically-shaped channels (LED PWM, LED pixel
/// strings, MCPWM, PDM). Only the bookkeeping lives here.
#[derive(Debug)]
pub struct ChannelBank {
    label: &'static str,
    in_use: Vec<bool>,
}

impl ChannelBank {
    /// A bank of `size` free channels.
    #[must_use]
    pub fn new(label: &'static str, size: usize) -> Self {
        Self { label, in_use: vec![false; size] }
    }

    /// Claim the first free channel.
    pub fn claim(&mut self) -> Option<u8> {
        let slot = self.in_use.iter().position(|used| !used)?;
        self.in_use[slot] = true;
        Some(slot as u8)
    }

    /// Release a channel.
    pub fn release(&mut self, channel: u8) {
        if let Some(slot) = self.in_use.get_mut(channel as usize) {
            *slot = false;
        }
    }

    /// Info line: `label: N channels, M in use`.
    #[must_use]
    pub fn info(&self) -> String {
        let used = self.in_use.iter().filter(|u| **u).count();
        format!("{}: {} channels, {} in use", self.label, self.in_use.len(), used)
    }
}

/// One registered sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    /// Sensor name.
    pub name: String,
    /// Unit string, e.g. `°C`.
    pub unit: String,
    /// Last sampled value.
    pub value: f64,
    /// Disabled sensors are skipped by default listings.
    pub enabled: bool,
    /// Samples taken.
    pub samples: u32,
}

/// Sensor registry; the probe drivers are external.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
}

impl SensorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one sensor.
    pub fn register(&mut self, name: &str, unit: &str, enabled: bool) {
        self.sensors.push(Sensor {
            name: name.to_string(),
            unit: unit.to_string(),
            value: 0.0,
            enabled,
            samples: 0,
        });
    }

    /// Record a sample by sensor index.
    pub fn sample(&mut self, index: usize, value: f64) {
        if let Some(sensor) = self.sensors.get_mut(index) {
            sensor.value = value;
            sensor.samples += 1;
        }
    }

    /// Sensors, optionally including disabled ones.
    #[must_use]
    pub fn list(&self, include_disabled: bool) -> Vec<&Sensor> {
        self.sensors.iter().filter(|s| include_disabled || s.enabled).collect()
    }

    /// One sensor by index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sensor> {
        self.sensors.get(index)
    }

    /// JSON rendering for `sensor-json`.
    #[must_use]
    pub fn json(&self) -> String {
        let fields: Vec<String> = self
            .sensors
            .iter()
            .filter(|s| s.enabled)
            .map(|s| format!("{{\"name\":\"{}\",\"value\":{},\"unit\":\"{}\"}}", s.name, s.value, s.unit))
            .collect();
        format!("[{}]", fields.join(","))
    }

    /// Total sample count for `sensor-stats`.
    #[must_use]
    pub fn total_samples(&self) -> u32 {
        self.sensors.iter().map(|s| s.samples).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_registry_read_write_and_stats() {
        let mut io = IoRegistry::new();
        let id = io.register(Box::new(GpioBank::new("gpio0", 4))).expect("register");

        io.write(u32::from(id), 2, 1).expect("write");
        assert_eq!(io.read(u32::from(id), 2).expect("read"), 1);
        assert!(io.read(u32::from(id), 99).is_err());
        assert!(io.read(7, 0).is_err());

        assert_eq!(io.stats(), IoStats { reads: 1, writes: 1, errors: 1 });
    }

    #[test]
    fn io_registry_capacity() {
        let mut io = IoRegistry::new();
        for i in 0..IO_DEVICES_MAX {
            assert!(io.register(Box::new(GpioBank::new(&format!("g{i}"), 1))).is_some());
        }
        assert!(io.register(Box::new(GpioBank::new("overflow", 1))).is_none());
    }

    #[test]
    fn display_pages_replace_by_name() {
        let mut display = Display::new();

        display
            .add_page(DisplayPage::Text {
                name: "boot".to_string(),
                timeout: 10,
                text: "hello".to_string(),
            })
            .expect("add");
        display
            .add_page(DisplayPage::Text {
                name: "boot".to_string(),
                timeout: 20,
                text: "replaced".to_string(),
            })
            .expect("replace");

        assert_eq!(display.pages().len(), 1);
        assert!(matches!(&display.pages()[0], DisplayPage::Text { text, .. } if text == "replaced"));

        assert!(display.remove_page("boot"));
        assert!(!display.remove_page("boot"));
    }

    #[test]
    fn channel_bank_claims_densely() {
        let mut bank = ChannelBank::new("ledpwm", 3);
        assert_eq!(bank.claim(), Some(0));
        assert_eq!(bank.claim(), Some(1));
        bank.release(0);
        assert_eq!(bank.claim(), Some(0));
        assert_eq!(bank.info(), "ledpwm: 3 channels, 2 in use");
    }

    #[test]
    fn sensors_filter_disabled() {
        let mut sensors = SensorRegistry::new();
        sensors.register("temp", "C", true);
        sensors.register("aux", "V", false);
        sensors.sample(0, 21.5);

        assert_eq!(sensors.list(false).len(), 1);
        assert_eq!(sensors.list(true).len(), 2);
        assert_eq!(sensors.total_samples(), 1);
        assert!(sensors.json().contains("\"name\":\"temp\""));
        assert!(!sensors.json().contains("aux"));
    }
}
