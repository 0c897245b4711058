//! Mock GPIO backend for testing and hardware-free simulation.
//!
//! Pin levels live in an in-memory table. Ultrasonic echo behavior is
//! scripted with [`EchoProfile`]s: when the paired trigger line is
//! pulsed, the echo line goes high after `rise_delay` and stays high
//! for `pulse_width`, reproducing the HC-SR04 timing against the real
//! busy-poll ranging loop.

use super::{GpioBackend, PinSpec};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct MockPin {
    level: bool,
    claimed: bool,
}

struct EchoProfile {
    trigger: u32,
    echo: u32,
    rise_delay: Duration,
    /// `None` keeps the echo line low forever (dead sensor).
    pulse_width: Option<Duration>,
    fired_at: Option<Instant>,
}

#[derive(Default)]
struct MockInner {
    pins: HashMap<u32, MockPin>,
    echoes: Vec<EchoProfile>,
    fail_release: HashSet<u32>,
}

/// In-memory GPIO backend
#[derive(Clone)]
pub struct MockGpio {
    inner: Arc<Mutex<MockInner>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
        }
    }

    /// Script an ultrasonic sensor: after a pulse on `trigger`, the
    /// `echo` line rises after `rise_delay` and falls `pulse_width`
    /// later. `pulse_width = None` simulates a sensor that never
    /// answers.
    pub fn set_echo_profile(
        &self,
        trigger: u32,
        echo: u32,
        rise_delay: Duration,
        pulse_width: Option<Duration>,
    ) {
        let mut inner = self.inner.lock();
        inner.echoes.retain(|p| p.echo != echo);
        inner.echoes.push(EchoProfile {
            trigger,
            echo,
            rise_delay,
            pulse_width,
            fired_at: None,
        });
    }

    /// Directly drive an input line (e.g. an echo pin without a
    /// profile).
    pub fn set_level(&self, terminal: u32, level: bool) {
        self.inner
            .lock()
            .pins
            .entry(terminal)
            .or_insert(MockPin {
                level: false,
                claimed: false,
            })
            .level = level;
    }

    /// Observe the level last written to a line
    pub fn level(&self, terminal: u32) -> bool {
        self.inner
            .lock()
            .pins
            .get(&terminal)
            .is_some_and(|p| p.level)
    }

    /// Whether the line is currently claimed
    pub fn is_claimed(&self, terminal: u32) -> bool {
        self.inner
            .lock()
            .pins
            .get(&terminal)
            .is_some_and(|p| p.claimed)
    }

    /// Make `release` fail with an I/O error for this terminal
    pub fn fail_release(&self, terminal: u32) {
        self.inner.lock().fail_release.insert(terminal);
    }
}

impl Default for MockGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioBackend for MockGpio {
    fn claim(&self, spec: &PinSpec) -> Result<()> {
        let mut inner = self.inner.lock();
        let pin = inner.pins.entry(spec.terminal).or_insert(MockPin {
            level: false,
            claimed: false,
        });
        pin.claimed = true;
        Ok(())
    }

    fn read(&self, terminal: u32) -> Result<bool> {
        let inner = self.inner.lock();
        if let Some(profile) = inner.echoes.iter().find(|p| p.echo == terminal) {
            if let (Some(fired), Some(width)) = (profile.fired_at, profile.pulse_width) {
                let elapsed = fired.elapsed();
                return Ok(elapsed >= profile.rise_delay
                    && elapsed < profile.rise_delay + width);
            }
            return Ok(false);
        }
        inner
            .pins
            .get(&terminal)
            .map(|p| p.level)
            .ok_or(Error::DeviceUnavailable(terminal))
    }

    fn write(&self, terminal: u32, value: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let previous = {
            let pin = inner
                .pins
                .get_mut(&terminal)
                .ok_or(Error::DeviceUnavailable(terminal))?;
            let previous = pin.level;
            pin.level = value;
            previous
        };
        // Falling edge on a trigger line arms the paired echo script.
        if previous && !value {
            for profile in inner.echoes.iter_mut().filter(|p| p.trigger == terminal) {
                profile.fired_at = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn release(&self, terminal: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_release.contains(&terminal) {
            return Err(Error::Io(std::io::Error::other(format!(
                "simulated release failure on pin {terminal}"
            ))));
        }
        if let Some(pin) = inner.pins.get_mut(&terminal) {
            pin.claimed = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{PinDirection, PinMode, PinTrigger};

    fn spec(terminal: u32) -> PinSpec {
        PinSpec {
            terminal,
            name: "mock-pin",
            direction: PinDirection::Output,
            mode: PinMode::PushPull,
            trigger: PinTrigger::None,
        }
    }

    #[test]
    fn echo_profile_fires_on_trigger_falling_edge() {
        let mock = MockGpio::new();
        mock.claim(&spec(13)).unwrap();
        mock.set_echo_profile(
            13,
            19,
            Duration::ZERO,
            Some(Duration::from_millis(50)),
        );

        // Quiet before any trigger pulse.
        assert!(!mock.read(19).unwrap());

        mock.write(13, true).unwrap();
        mock.write(13, false).unwrap();
        assert!(mock.read(19).unwrap());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!mock.read(19).unwrap());
    }

    #[test]
    fn dead_sensor_stays_low() {
        let mock = MockGpio::new();
        mock.claim(&spec(13)).unwrap();
        mock.set_echo_profile(13, 19, Duration::ZERO, None);
        mock.write(13, true).unwrap();
        mock.write(13, false).unwrap();
        assert!(!mock.read(19).unwrap());
    }
}
