//! Motor group control.
//!
//! Three independently wired motor groups drive the rig: the arm
//! (boom), the turret (rotating platform) and the traction (track)
//! motor. Each group has one power line and two direction lines on the
//! H-bridge. Every mutation of a group's pins happens under that
//! group's mutex, so an obstacle-triggered `stop` can never interleave
//! with a racing `start`; whichever runs second fully wins.

use crate::error::{Error, Result};
use crate::gpio::PinBank;
use crate::pins;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One of the rig's three actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorId {
    Arm,
    Turret,
    Traction,
}

impl MotorId {
    pub const ALL: [MotorId; 3] = [MotorId::Arm, MotorId::Turret, MotorId::Traction];

    /// Wire encoding used by the command dispatcher: 1=arm, 2=turret,
    /// 3=traction.
    pub fn from_wire(id: u8) -> Result<Self> {
        match id {
            1 => Ok(MotorId::Arm),
            2 => Ok(MotorId::Turret),
            3 => Ok(MotorId::Traction),
            other => Err(Error::InvalidCommand(format!("unknown motor id {other}"))),
        }
    }

    fn index(self) -> usize {
        match self {
            MotorId::Arm => 0,
            MotorId::Turret => 1,
            MotorId::Traction => 2,
        }
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorId::Arm => f.write_str("arm"),
            MotorId::Turret => f.write_str("turret"),
            MotorId::Traction => f.write_str("traction"),
        }
    }
}

/// Direction token for a start command. Arm and traction run
/// front/back; the turret swivels left/right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorDirection {
    Front,
    Back,
    Left,
    Right,
}

impl MotorDirection {
    /// Parse a direction token from the wire ("front", "LEFT", ...)
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_lowercase().as_str() {
            "front" => Ok(MotorDirection::Front),
            "back" => Ok(MotorDirection::Back),
            "left" => Ok(MotorDirection::Left),
            "right" => Ok(MotorDirection::Right),
            other => Err(Error::InvalidCommand(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

impl fmt::Display for MotorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorDirection::Front => f.write_str("front"),
            MotorDirection::Back => f.write_str("back"),
            MotorDirection::Left => f.write_str("left"),
            MotorDirection::Right => f.write_str("right"),
        }
    }
}

/// Wiring of one motor group. The mutex serializes all pin mutation
/// for the group across command and safety threads.
struct MotorGroup {
    id: MotorId,
    power: u32,
    forward: u32,
    backward: u32,
    lock: Mutex<()>,
}

/// Direction pin levels for a (motor, direction) pair, fixed by the
/// H-bridge wiring.
fn direction_levels(motor: MotorId, direction: MotorDirection) -> Result<(bool, bool)> {
    match (motor, direction) {
        (MotorId::Arm | MotorId::Traction, MotorDirection::Front) => Ok((true, false)),
        (MotorId::Arm | MotorId::Traction, MotorDirection::Back) => Ok((false, true)),
        (MotorId::Turret, MotorDirection::Right) => Ok((true, false)),
        (MotorId::Turret, MotorDirection::Left) => Ok((false, true)),
        _ => Err(Error::InvalidCommand(format!(
            "direction '{direction}' is not valid for the {motor} motor"
        ))),
    }
}

/// Controller for the rig's three motor groups
pub struct MotorController {
    pins: Arc<PinBank>,
    groups: [MotorGroup; 3],
}

impl MotorController {
    pub fn new(pins: Arc<PinBank>) -> Self {
        Self {
            pins,
            groups: [
                MotorGroup {
                    id: MotorId::Arm,
                    power: pins::ARM_POWER,
                    forward: pins::ARM_FORWARD,
                    backward: pins::ARM_BACKWARD,
                    lock: Mutex::new(()),
                },
                MotorGroup {
                    id: MotorId::Turret,
                    power: pins::TURRET_POWER,
                    forward: pins::TURRET_FORWARD,
                    backward: pins::TURRET_BACKWARD,
                    lock: Mutex::new(()),
                },
                MotorGroup {
                    id: MotorId::Traction,
                    power: pins::TRACTION_POWER,
                    forward: pins::TRACTION_FORWARD,
                    backward: pins::TRACTION_BACKWARD,
                    lock: Mutex::new(()),
                },
            ],
        }
    }

    /// Start a motor in the given direction.
    ///
    /// An invalid (motor, direction) pair returns
    /// [`Error::InvalidCommand`] before any pin is touched.
    pub fn start(&self, motor: MotorId, direction: MotorDirection) -> Result<()> {
        let (forward, backward) = direction_levels(motor, direction)?;
        let group = &self.groups[motor.index()];

        let _guard = group.lock.lock();
        self.pins.set(group.forward, forward)?;
        self.pins.set(group.backward, backward)?;
        self.pins.set(group.power, true)?;
        log::info!("Motor {} started ({})", group.id, direction);
        Ok(())
    }

    /// Stop a motor: both direction pins and the power pin are
    /// deasserted unconditionally, regardless of prior state. This is
    /// the only operation the safety path calls.
    pub fn stop(&self, motor: MotorId) -> Result<()> {
        let group = &self.groups[motor.index()];

        let _guard = group.lock.lock();
        self.pins.set(group.forward, false)?;
        self.pins.set(group.backward, false)?;
        self.pins.set(group.power, false)?;
        log::info!("Motor {} stopped", group.id);
        Ok(())
    }

    /// Pin levels (power, forward, backward) of a motor group
    pub fn pin_state(&self, motor: MotorId) -> Result<(bool, bool, bool)> {
        let group = &self.groups[motor.index()];
        let _guard = group.lock.lock();
        Ok((
            self.pins.get(group.power)?,
            self.pins.get(group.forward)?,
            self.pins.get(group.backward)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockGpio;
    use std::sync::Barrier;
    use std::thread;

    fn controller() -> (MockGpio, MotorController) {
        let mock = MockGpio::new();
        let bank = Arc::new(PinBank::new(Box::new(mock.clone())));
        for spec in crate::pins::all_specs() {
            bank.configure(spec);
        }
        bank.open_all().unwrap();
        (mock, MotorController::new(bank))
    }

    #[test]
    fn start_asserts_exactly_one_direction_and_power() {
        let cases = [
            (MotorId::Arm, MotorDirection::Front, true, false),
            (MotorId::Arm, MotorDirection::Back, false, true),
            (MotorId::Traction, MotorDirection::Front, true, false),
            (MotorId::Traction, MotorDirection::Back, false, true),
            (MotorId::Turret, MotorDirection::Right, true, false),
            (MotorId::Turret, MotorDirection::Left, false, true),
        ];
        for (motor, direction, forward, backward) in cases {
            let (_, motors) = controller();
            motors.start(motor, direction).unwrap();
            assert_eq!(
                motors.pin_state(motor).unwrap(),
                (true, forward, backward),
                "{motor} {direction}"
            );
        }
    }

    #[test]
    fn stop_deasserts_all_three_pins_and_is_idempotent() {
        let (_, motors) = controller();
        motors.start(MotorId::Arm, MotorDirection::Front).unwrap();
        motors.stop(MotorId::Arm).unwrap();
        assert_eq!(motors.pin_state(MotorId::Arm).unwrap(), (false, false, false));
        // Stopping an already stopped motor is a no-op with the same
        // observable state.
        motors.stop(MotorId::Arm).unwrap();
        assert_eq!(motors.pin_state(MotorId::Arm).unwrap(), (false, false, false));
    }

    #[test]
    fn invalid_direction_leaves_pins_untouched() {
        let (_, motors) = controller();
        let result = motors.start(MotorId::Arm, MotorDirection::Left);
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
        assert_eq!(motors.pin_state(MotorId::Arm).unwrap(), (false, false, false));

        let result = motors.start(MotorId::Turret, MotorDirection::Front);
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
        assert_eq!(
            motors.pin_state(MotorId::Turret).unwrap(),
            (false, false, false)
        );
    }

    #[test]
    fn wire_ids_map_to_motors() {
        assert_eq!(MotorId::from_wire(1).unwrap(), MotorId::Arm);
        assert_eq!(MotorId::from_wire(2).unwrap(), MotorId::Turret);
        assert_eq!(MotorId::from_wire(3).unwrap(), MotorId::Traction);
        assert!(MotorId::from_wire(0).is_err());
        assert!(MotorId::from_wire(4).is_err());
    }

    /// A stop issued after a start has begun must fully win. The
    /// ordering is injected with a barrier: the stopper only runs once
    /// the start call is in flight, and the group mutex forbids its
    /// writes from interleaving with the start's.
    #[test]
    fn obstacle_stop_wins_race_against_start() {
        let (_, motors) = controller();
        let motors = Arc::new(motors);
        let barrier = Arc::new(Barrier::new(2));

        let starter = {
            let motors = Arc::clone(&motors);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                motors.start(MotorId::Arm, MotorDirection::Front).unwrap();
                // Start is committed; release the safety path.
                barrier.wait();
            })
        };
        let stopper = {
            let motors = Arc::clone(&motors);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                motors.stop(MotorId::Arm).unwrap();
            })
        };
        starter.join().unwrap();
        stopper.join().unwrap();

        assert_eq!(motors.pin_state(MotorId::Arm).unwrap(), (false, false, false));
    }

    /// Unordered contention never produces a torn pin state: the group
    /// ends fully started or fully stopped, nothing in between.
    #[test]
    fn concurrent_start_and_stop_never_tear() {
        for _ in 0..50 {
            let (_, motors) = controller();
            let motors = Arc::new(motors);
            let barrier = Arc::new(Barrier::new(2));

            let starter = {
                let motors = Arc::clone(&motors);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    motors.start(MotorId::Arm, MotorDirection::Front).unwrap();
                })
            };
            let stopper = {
                let motors = Arc::clone(&motors);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    motors.stop(MotorId::Arm).unwrap();
                })
            };
            starter.join().unwrap();
            stopper.join().unwrap();

            let state = motors.pin_state(MotorId::Arm).unwrap();
            assert!(
                state == (true, true, false) || state == (false, false, false),
                "torn state {state:?}"
            );
        }
    }
}
