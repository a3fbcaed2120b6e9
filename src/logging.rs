//! Logging setup (§1.1 ambient stack).
//!
//! The teacher wires up `common::setup_logging`, which installs a
//! `RedoxLogger` with per-subsystem log files — meaningful only on
//! Redox. Outside that OS the equivalent is the standard `log` facade
//! plus `env_logger`, which every usbip/usb_vhci crate in the retrieval
//! pack's `other_examples/` uses for exactly this purpose.

use log::LevelFilter;

pub fn setup_logging(level: &str) {
    let filter = level.parse().unwrap_or(LevelFilter::Info);
    let _ = env_logger::Builder::from_default_env()
        .filter_level(filter)
        .try_init();
}
