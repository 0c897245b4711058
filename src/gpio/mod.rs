//! GPIO backend abstraction and the pin bank.
//!
//! The [`GpioBackend`] trait is the hardware seam: the daemon talks to
//! pins only through it, so the rig controller can be constructed with
//! the sysfs backend on the target and [`MockGpio`] in tests and
//! simulation. The [`PinBank`] owns the pin table; motors and sensors
//! hold terminal numbers, never pin handles.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

mod mock;
mod sysfs;

pub use mock::MockGpio;
pub use sysfs::SysfsGpio;

/// Electrical direction of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

/// Electrical mode of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    PullUp,
    PullDown,
    PushPull,
    OpenDrain,
}

/// Edge-trigger behavior of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinTrigger {
    None,
    Rising,
    Falling,
    Both,
}

/// Full configuration of one GPIO line
#[derive(Debug, Clone)]
pub struct PinSpec {
    /// Terminal number on the header
    pub terminal: u32,
    /// Stable symbolic name, used in logs and name-based resolution
    pub name: &'static str,
    pub direction: PinDirection,
    pub mode: PinMode,
    pub trigger: PinTrigger,
}

impl fmt::Display for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.terminal)
    }
}

/// Hardware access trait implemented by the sysfs and mock backends.
///
/// Implementations use interior mutability; the bank shares one backend
/// across the scheduler, worker, and command threads.
pub trait GpioBackend: Send + Sync {
    /// Claim the line and apply its electrical configuration
    fn claim(&self, spec: &PinSpec) -> Result<()>;

    /// Read the current logic level
    fn read(&self, terminal: u32) -> Result<bool>;

    /// Drive the line to the given logic level
    fn write(&self, terminal: u32, value: bool) -> Result<()>;

    /// Release the line back to the system
    fn release(&self, terminal: u32) -> Result<()>;
}

struct PinEntry {
    spec: PinSpec,
    open: bool,
}

/// Owner of every GPIO line the daemon uses.
///
/// Pins are registered with [`configure`](PinBank::configure), claimed
/// with [`open`](PinBank::open), and torn down with
/// [`release_all`](PinBank::release_all). Access after release fails
/// with [`Error::DeviceClosed`]; no retries are performed at this
/// layer, pin I/O failures are reported upward and logged at the point
/// of use.
pub struct PinBank {
    backend: Box<dyn GpioBackend>,
    pins: Mutex<HashMap<u32, PinEntry>>,
}

impl PinBank {
    pub fn new(backend: Box<dyn GpioBackend>) -> Self {
        Self {
            backend,
            pins: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pin in the table. Does not touch hardware.
    pub fn configure(&self, spec: PinSpec) {
        log::debug!(
            "Configuring pin {}: {:?}/{:?}/{:?}",
            spec,
            spec.direction,
            spec.mode,
            spec.trigger
        );
        self.pins.lock().insert(
            spec.terminal,
            PinEntry { spec, open: false },
        );
    }

    /// Resolve a pin reference: numeric terminal id preferred, symbolic
    /// name otherwise.
    pub fn resolve(&self, reference: &str) -> Result<u32> {
        if let Ok(terminal) = reference.parse::<u32>() {
            if self.pins.lock().contains_key(&terminal) {
                return Ok(terminal);
            }
            return Err(Error::DeviceUnavailable(terminal));
        }
        self.pins
            .lock()
            .values()
            .find(|e| e.spec.name == reference)
            .map(|e| e.spec.terminal)
            .ok_or_else(|| Error::InvalidCommand(format!("unknown pin '{reference}'")))
    }

    /// Claim the line on the backend. Idempotent: a no-op when already
    /// open.
    pub fn open(&self, terminal: u32) -> Result<()> {
        let mut pins = self.pins.lock();
        let entry = pins
            .get_mut(&terminal)
            .ok_or(Error::DeviceUnavailable(terminal))?;
        if entry.open {
            return Ok(());
        }
        self.backend.claim(&entry.spec)?;
        entry.open = true;
        log::info!("GPIO pin {} acquired", entry.spec);
        Ok(())
    }

    /// Claim every registered pin. Fails on the first claim error;
    /// pins opened so far stay open and are covered by `release_all`.
    pub fn open_all(&self) -> Result<()> {
        let terminals: Vec<u32> = self.pins.lock().keys().copied().collect();
        for terminal in terminals {
            self.open(terminal)?;
        }
        Ok(())
    }

    /// Drive an open pin to the given level
    pub fn set(&self, terminal: u32, value: bool) -> Result<()> {
        self.check_open(terminal)?;
        self.backend.write(terminal, value)
    }

    /// Read the current level of an open pin
    pub fn get(&self, terminal: u32) -> Result<bool> {
        self.check_open(terminal)?;
        self.backend.read(terminal)
    }

    /// Force the line low, then release it. The forced-low write is
    /// best-effort: a failure is logged and the release still happens.
    pub fn close(&self, terminal: u32) -> Result<()> {
        let mut pins = self.pins.lock();
        let entry = pins
            .get_mut(&terminal)
            .ok_or(Error::DeviceUnavailable(terminal))?;
        if !entry.open {
            return Ok(());
        }
        if entry.spec.direction == PinDirection::Output
            && let Err(e) = self.backend.write(terminal, false)
        {
            log::warn!("Cannot drive pin {} low before release: {}", entry.spec, e);
        }
        entry.open = false;
        self.backend.release(terminal)?;
        log::info!("GPIO pin {} released", entry.spec);
        Ok(())
    }

    /// Release every open pin. Individual failures are logged and do
    /// not stop the teardown of the remaining pins.
    pub fn release_all(&self) {
        let terminals: Vec<u32> = self.pins.lock().keys().copied().collect();
        for terminal in terminals {
            if let Err(e) = self.close(terminal) {
                log::warn!("Cannot close pin {}: {}", terminal, e);
            }
        }
    }

    /// Whether the pin is currently claimed
    pub fn is_open(&self, terminal: u32) -> bool {
        self.pins
            .lock()
            .get(&terminal)
            .is_some_and(|e| e.open)
    }

    fn check_open(&self, terminal: u32) -> Result<()> {
        let pins = self.pins.lock();
        match pins.get(&terminal) {
            Some(entry) if entry.open => Ok(()),
            Some(_) => Err(Error::DeviceClosed(terminal)),
            None => Err(Error::DeviceUnavailable(terminal)),
        }
    }
}
