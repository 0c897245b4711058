//! Message types for the TCP command and telemetry channels.

use serde::{Deserialize, Serialize};

/// Microseconds since the Unix epoch
pub fn timestamp_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Commands received from the external dispatcher.
///
/// Motor ids follow the rig's wire encoding: 1=arm, 2=turret,
/// 3=traction. Direction tokens are "front"/"back" for arm and
/// traction, "left"/"right" for the turret. Side tokens are
/// "front"/"back"/"left"/"right".
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum RigCommand {
    /// Start a motor in the given direction
    StartMotor { motor: u8, direction: String },
    /// Stop a motor unconditionally
    StopMotor { motor: u8 },
    /// Measure one side on demand and reply with the distance
    MeasureDistance { side: String },
    /// Graceful daemon shutdown
    Shutdown,
}

/// Per-command acknowledgment sent back on the command connection
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum CommandReply {
    /// Command executed
    Ok,
    /// Reply to `MeasureDistance`
    Distance { side: String, distance_cm: u64 },
    /// Command rejected or failed; no state change beyond what the
    /// message describes
    Error { message: String },
}

/// Top-level message broadcast to telemetry clients
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum TelemetryMessage {
    /// Periodic clearance report for all four sides
    DistanceReport(DistanceReport),
    /// A reading crossed the obstacle threshold and the safety policy
    /// fired
    ObstacleEvent(ObstacleEvent),
}

/// Named distance metrics ("FrontDistance", "BackDistance",
/// "LeftDistance", "RightDistance"). Sides whose sample failed are
/// omitted from the report.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistanceReport {
    /// Timestamp in microseconds since epoch
    pub timestamp: u64,
    pub metrics: Vec<DistanceMetric>,
}

/// One side's clearance sample
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistanceMetric {
    pub name: String,
    pub distance_cm: u64,
}

/// Obstacle detection record; ephemeral, not persisted
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObstacleEvent {
    /// Timestamp in microseconds since epoch
    pub timestamp: u64,
    pub side: String,
    pub distance_cm: u64,
}
