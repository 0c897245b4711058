//! Ultrasonic distance sensing.
//!
//! Each rig side carries an HC-SR04-style rangefinder: a short trigger
//! pulse commands a sound burst, and the sensor answers with an echo
//! pulse whose width is the round-trip time of the sound. The ranging
//! loop busy-polls the echo line because the pulse edges are
//! microsecond-scale; it is bounded by a wall-clock timeout so a dead
//! sensor cannot hang a worker thread.

use crate::error::{Error, Result};
use crate::gpio::PinBank;
use crate::pins;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default trigger pulse width. Hardware contract with the transducer;
/// do not change for deployment builds.
pub const TRIGGER_PULSE: Duration = Duration::from_nanos(100);

/// Default cap on waiting for either echo edge, measured from the end
/// of the trigger pulse.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(2);

/// Default minimum gap between consecutive measurements on one sensor,
/// letting ultrasonic reflections die out before the next burst.
pub const SETTLE_GAP: Duration = Duration::from_secs(2);

/// Calibration constant: twice the speed of sound in cm/s, rounded for
/// integer nanosecond arithmetic.
pub const SPEED_OF_SOUND: u64 = 34029;

/// Rig side a sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Front,
    Back,
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Front, Side::Back, Side::Left, Side::Right];

    /// Parse a side token from the wire ("front", "BACK", ...)
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_lowercase().as_str() {
            "front" => Ok(Side::Front),
            "back" => Ok(Side::Back),
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(Error::InvalidCommand(format!("unknown side '{other}'"))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Front => "FRONT",
            Side::Back => "BACK",
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }

    /// Telemetry metric name for this side
    pub fn metric_name(self) -> &'static str {
        match self {
            Side::Front => "FrontDistance",
            Side::Back => "BackDistance",
            Side::Left => "LeftDistance",
            Side::Right => "RightDistance",
        }
    }

    /// (echo, trigger) terminals from the wiring map
    pub fn terminals(self) -> (u32, u32) {
        match self {
            Side::Front => (pins::FRONT_ECHO, pins::FRONT_TRIGGER),
            Side::Back => (pins::BACK_ECHO, pins::BACK_TRIGGER),
            Side::Left => (pins::LEFT_ECHO, pins::LEFT_TRIGGER),
            Side::Right => (pins::RIGHT_ECHO, pins::RIGHT_TRIGGER),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tunable ranging constants. Production uses the defaults; tests
/// shrink the timeouts.
#[derive(Debug, Clone)]
pub struct RangingParams {
    pub trigger_pulse: Duration,
    pub echo_timeout: Duration,
    pub settle: Duration,
    pub speed_constant: u64,
}

impl Default for RangingParams {
    fn default() -> Self {
        Self {
            trigger_pulse: TRIGGER_PULSE,
            echo_timeout: ECHO_TIMEOUT,
            settle: SETTLE_GAP,
            speed_constant: SPEED_OF_SOUND,
        }
    }
}

/// One-way distance in centimeters from an echo pulse width.
///
/// Integer formula from the rig's calibration:
/// `cm = Δns * SPEED_OF_SOUND / 2 / 1e9`. Monotone non-decreasing in
/// the pulse width, and zero for a zero-width pulse.
pub fn distance_from_pulse(pulse_ns: u64, speed_constant: u64) -> u64 {
    pulse_ns.saturating_mul(speed_constant) / 2 / 1_000_000_000
}

struct RangingState {
    last_burst: Option<Instant>,
    last_cm: Option<u64>,
}

/// One ultrasonic rangefinder: an echo input and a trigger output on
/// the shared pin bank.
///
/// `measure` is serialized per sensor through an internal lock, so a
/// scheduled tick and an on-demand request can never overlap on the
/// same transducer.
pub struct DistanceSensor {
    side: Side,
    echo: u32,
    trigger: u32,
    pins: Arc<PinBank>,
    params: RangingParams,
    state: Mutex<RangingState>,
}

impl DistanceSensor {
    pub fn new(side: Side, pins: Arc<PinBank>, params: RangingParams) -> Self {
        let (echo, trigger) = side.terminals();
        Self {
            side,
            echo,
            trigger,
            pins,
            params,
            state: Mutex::new(RangingState {
                last_burst: None,
                last_cm: None,
            }),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn params(&self) -> &RangingParams {
        &self.params
    }

    /// Last successful reading, if any
    pub fn last_distance(&self) -> Option<u64> {
        self.state.lock().last_cm
    }

    /// Run one ranging cycle and return the distance in centimeters.
    ///
    /// A missing echo edge within the timeout yields
    /// [`Error::EchoTimeout`]: no reading, never a stale value. Pin
    /// I/O failures propagate unchanged.
    pub fn measure(&self) -> Result<u64> {
        let mut state = self.state.lock();

        // Settle gap: reflections from the previous burst must die out.
        if let Some(last) = state.last_burst {
            let since = last.elapsed();
            if since < self.params.settle {
                std::thread::sleep(self.params.settle - since);
            }
        }

        let result = self.range_once();
        state.last_burst = Some(Instant::now());
        if let Ok(cm) = result {
            state.last_cm = Some(cm);
        }
        result
    }

    fn range_once(&self) -> Result<u64> {
        // Trigger pulse. The width is far below timer resolution, so
        // spin instead of sleeping.
        self.pins.set(self.trigger, true)?;
        let pulse_start = Instant::now();
        while pulse_start.elapsed() < self.params.trigger_pulse {
            std::hint::spin_loop();
        }
        self.pins.set(self.trigger, false)?;

        let t0 = Instant::now();

        // Rising edge of the echo pulse.
        let rise = loop {
            if self.pins.get(self.echo)? {
                break Instant::now();
            }
            if t0.elapsed() > self.params.echo_timeout {
                return Err(Error::EchoTimeout(self.side.label()));
            }
            std::hint::spin_loop();
        };

        // Falling edge, bounded by the same deadline from t0.
        let fall = loop {
            if !self.pins.get(self.echo)? {
                break Instant::now();
            }
            if t0.elapsed() > self.params.echo_timeout {
                return Err(Error::EchoTimeout(self.side.label()));
            }
            std::hint::spin_loop();
        };

        let pulse_ns = (fall - rise).as_nanos() as u64;
        Ok(distance_from_pulse(pulse_ns, self.params.speed_constant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockGpio;

    fn fast_params() -> RangingParams {
        RangingParams {
            trigger_pulse: Duration::from_nanos(100),
            echo_timeout: Duration::from_millis(50),
            settle: Duration::ZERO,
            speed_constant: SPEED_OF_SOUND,
        }
    }

    fn front_sensor(mock: &MockGpio) -> DistanceSensor {
        let bank = Arc::new(PinBank::new(Box::new(mock.clone())));
        for spec in crate::pins::all_specs() {
            bank.configure(spec);
        }
        bank.open_all().unwrap();
        DistanceSensor::new(Side::Front, bank, fast_params())
    }

    #[test]
    fn formula_is_zero_at_zero() {
        assert_eq!(distance_from_pulse(0, SPEED_OF_SOUND), 0);
    }

    #[test]
    fn formula_matches_calibration_reference() {
        // 1 ms echo pulse: 1_000_000 * 34029 / 2 / 1e9 = 17 cm.
        assert_eq!(distance_from_pulse(1_000_000, SPEED_OF_SOUND), 17);
    }

    #[test]
    fn formula_is_monotone() {
        let mut previous = 0;
        for pulse in (0..5_000_000u64).step_by(37_001) {
            let cm = distance_from_pulse(pulse, SPEED_OF_SOUND);
            assert!(cm >= previous, "non-monotone at {pulse} ns");
            previous = cm;
        }
    }

    #[test]
    fn measure_reads_scripted_echo() {
        let mock = MockGpio::new();
        // 2 ms pulse ≈ 34 cm. Wall-clock jitter in the busy-poll adds
        // noise, so assert a band rather than the exact value.
        mock.set_echo_profile(
            crate::pins::FRONT_TRIGGER,
            crate::pins::FRONT_ECHO,
            Duration::ZERO,
            Some(Duration::from_millis(2)),
        );
        let sensor = front_sensor(&mock);
        let cm = sensor.measure().unwrap();
        assert!((30..=40).contains(&cm), "got {cm} cm");
        assert_eq!(sensor.last_distance(), Some(cm));
    }

    #[test]
    fn dead_sensor_times_out_with_no_reading() {
        let mock = MockGpio::new();
        mock.set_echo_profile(
            crate::pins::FRONT_TRIGGER,
            crate::pins::FRONT_ECHO,
            Duration::ZERO,
            None,
        );
        let sensor = front_sensor(&mock);
        assert!(matches!(sensor.measure(), Err(Error::EchoTimeout("FRONT"))));
        assert_eq!(sensor.last_distance(), None);
    }

    #[test]
    fn settle_gap_spaces_consecutive_bursts() {
        let mock = MockGpio::new();
        mock.set_echo_profile(
            crate::pins::FRONT_TRIGGER,
            crate::pins::FRONT_ECHO,
            Duration::ZERO,
            Some(Duration::from_micros(200)),
        );
        let bank = Arc::new(PinBank::new(Box::new(mock.clone())));
        for spec in crate::pins::all_specs() {
            bank.configure(spec);
        }
        bank.open_all().unwrap();
        let params = RangingParams {
            settle: Duration::from_millis(80),
            ..fast_params()
        };
        let sensor = DistanceSensor::new(Side::Front, bank, params);

        let start = Instant::now();
        sensor.measure().unwrap();
        sensor.measure().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
