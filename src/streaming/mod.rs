//! TCP command and telemetry channels for the rig daemon

pub mod command;
pub mod messages;
pub mod telemetry;
pub mod wire;

pub use command::CommandServer;
pub use messages::{CommandReply, RigCommand, TelemetryMessage};
pub use telemetry::{DistanceReporter, TelemetryPublisher};
