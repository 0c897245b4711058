//! KhanitraIO - safety controller library for the tracked excavator rig
//!
//! Core components: GPIO pin bank with sysfs and mock backends,
//! HC-SR04 ultrasonic ranging, motor direction control, and the
//! obstacle monitor that stops the arm and turret when a reading
//! crosses the clearance threshold.

pub mod app;
pub mod config;
pub mod error;
pub mod gpio;
pub mod monitor;
pub mod motor;
pub mod pins;
pub mod sensor;
pub mod streaming;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
