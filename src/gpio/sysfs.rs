//! Linux sysfs GPIO backend.
//!
//! Drives pins through the `/sys/class/gpio` interface: `export` /
//! `unexport` plus the per-pin `direction`, `value` and `edge` files.
//! Pull-up/pull-down bias is not settable through sysfs; the board's
//! device-tree defaults apply and the requested mode is only logged.

use super::{GpioBackend, PinDirection, PinSpec, PinTrigger};
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// GPIO backend backed by the Linux sysfs interface
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    /// Create a backend rooted at the given sysfs directory
    /// (normally `/sys/class/gpio`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pin_dir(&self, terminal: u32) -> PathBuf {
        self.root.join(format!("gpio{terminal}"))
    }

    fn write_attr(&self, terminal: u32, attr: &str, value: &str) -> Result<()> {
        let path = self.pin_dir(terminal).join(attr);
        fs::write(&path, value).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::DeviceUnavailable(terminal),
            _ => Error::Io(e),
        })
    }
}

impl GpioBackend for SysfsGpio {
    fn claim(&self, spec: &PinSpec) -> Result<()> {
        let terminal = spec.terminal;
        // Export is not idempotent in the kernel: EBUSY means the line
        // is already exported, which is fine after an unclean restart.
        if let Err(e) = fs::write(self.root.join("export"), terminal.to_string()) {
            match e.kind() {
                ErrorKind::ResourceBusy => {
                    log::warn!("GPIO pin {terminal} was already exported");
                }
                ErrorKind::NotFound | ErrorKind::InvalidInput => {
                    return Err(Error::DeviceUnavailable(terminal));
                }
                _ => return Err(Error::Io(e)),
            }
        }

        match spec.direction {
            PinDirection::Input => self.write_attr(terminal, "direction", "in")?,
            // "low" sets direction to output with an initial low level.
            PinDirection::Output => self.write_attr(terminal, "direction", "low")?,
        }

        let edge = match spec.trigger {
            PinTrigger::None => "none",
            PinTrigger::Rising => "rising",
            PinTrigger::Falling => "falling",
            PinTrigger::Both => "both",
        };
        // Some output-capable lines reject edge configuration; the
        // ranging loop polls levels, so this is not fatal.
        if let Err(e) = self.write_attr(terminal, "edge", edge) {
            log::debug!("Edge config '{edge}' rejected on pin {terminal}: {e}");
        }

        log::debug!(
            "Claimed sysfs pin {terminal} ({:?}, bias {:?} is board-level)",
            spec.direction,
            spec.mode
        );
        Ok(())
    }

    fn read(&self, terminal: u32) -> Result<bool> {
        let path = self.pin_dir(terminal).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::DeviceUnavailable(terminal),
            _ => Error::Io(e),
        })?;
        Ok(raw.trim() == "1")
    }

    fn write(&self, terminal: u32, value: bool) -> Result<()> {
        self.write_attr(terminal, "value", if value { "1" } else { "0" })
    }

    fn release(&self, terminal: u32) -> Result<()> {
        fs::write(self.root.join("unexport"), terminal.to_string()).map_err(|e| {
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::InvalidInput => {
                    Error::DeviceUnavailable(terminal)
                }
                _ => Error::Io(e),
            }
        })
    }
}
