//! GPIO wiring map for the excavator rig main board.
//!
//! Single source of truth: every driver references this module rather
//! than hard-coding terminal numbers. The assignments are a wiring
//! contract with the H-bridge boards and the HC-SR04 sensors; changing
//! them requires re-wiring the rig.

use crate::gpio::{PinDirection, PinMode, PinSpec, PinTrigger};

// ---------------------------------------------------------------------------
// Motor groups (one power line + two direction lines each)
// ---------------------------------------------------------------------------

/// Arm (excavator boom) motor power line.
pub const ARM_POWER: u32 = 4;
pub const ARM_FORWARD: u32 = 8;
pub const ARM_BACKWARD: u32 = 25;

/// Turret (rotating platform) motor power line.
pub const TURRET_POWER: u32 = 11;
pub const TURRET_FORWARD: u32 = 10;
pub const TURRET_BACKWARD: u32 = 9;

/// Traction (wheel/track) motor power line.
pub const TRACTION_POWER: u32 = 26;
pub const TRACTION_FORWARD: u32 = 20;
pub const TRACTION_BACKWARD: u32 = 21;

// ---------------------------------------------------------------------------
// Ultrasonic rangefinders (echo input + trigger output per side)
// ---------------------------------------------------------------------------

pub const FRONT_ECHO: u32 = 19;
pub const FRONT_TRIGGER: u32 = 13;

pub const BACK_ECHO: u32 = 24;
pub const BACK_TRIGGER: u32 = 23;

pub const RIGHT_ECHO: u32 = 6;
pub const RIGHT_TRIGGER: u32 = 5;

pub const LEFT_ECHO: u32 = 27;
pub const LEFT_TRIGGER: u32 = 17;

/// Spec for a motor control line: push-pull output, rising-edge trigger.
fn motor_pin(terminal: u32, name: &'static str) -> PinSpec {
    PinSpec {
        terminal,
        name,
        direction: PinDirection::Output,
        mode: PinMode::PushPull,
        trigger: PinTrigger::Rising,
    }
}

/// Spec for an ultrasonic echo line: input, pull-down, both edges.
fn echo_pin(terminal: u32, name: &'static str) -> PinSpec {
    PinSpec {
        terminal,
        name,
        direction: PinDirection::Input,
        mode: PinMode::PullDown,
        trigger: PinTrigger::Both,
    }
}

/// Spec for an ultrasonic trigger line: push-pull output, both edges.
fn trigger_pin(terminal: u32, name: &'static str) -> PinSpec {
    PinSpec {
        terminal,
        name,
        direction: PinDirection::Output,
        mode: PinMode::PushPull,
        trigger: PinTrigger::Both,
    }
}

/// The full wiring table: every pin the controller claims at startup.
pub fn all_specs() -> Vec<PinSpec> {
    vec![
        motor_pin(ARM_POWER, "arm-power"),
        motor_pin(ARM_FORWARD, "arm-forward"),
        motor_pin(ARM_BACKWARD, "arm-backward"),
        motor_pin(TURRET_POWER, "turret-power"),
        motor_pin(TURRET_FORWARD, "turret-forward"),
        motor_pin(TURRET_BACKWARD, "turret-backward"),
        motor_pin(TRACTION_POWER, "traction-power"),
        motor_pin(TRACTION_FORWARD, "traction-forward"),
        motor_pin(TRACTION_BACKWARD, "traction-backward"),
        echo_pin(FRONT_ECHO, "front-echo"),
        trigger_pin(FRONT_TRIGGER, "front-trigger"),
        echo_pin(BACK_ECHO, "back-echo"),
        trigger_pin(BACK_TRIGGER, "back-trigger"),
        echo_pin(RIGHT_ECHO, "right-echo"),
        trigger_pin(RIGHT_TRIGGER, "right-trigger"),
        echo_pin(LEFT_ECHO, "left-echo"),
        trigger_pin(LEFT_TRIGGER, "left-trigger"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn terminals_are_distinct() {
        let specs = all_specs();
        let terminals: HashSet<u32> = specs.iter().map(|s| s.terminal).collect();
        assert_eq!(terminals.len(), specs.len());
    }

    #[test]
    fn echo_pins_are_inputs_with_pull_down() {
        for spec in all_specs() {
            if spec.name.ends_with("-echo") {
                assert_eq!(spec.direction, PinDirection::Input, "{}", spec.name);
                assert_eq!(spec.mode, PinMode::PullDown, "{}", spec.name);
                assert_eq!(spec.trigger, PinTrigger::Both, "{}", spec.name);
            } else {
                assert_eq!(spec.direction, PinDirection::Output, "{}", spec.name);
                assert_eq!(spec.mode, PinMode::PushPull, "{}", spec.name);
            }
        }
    }
}
