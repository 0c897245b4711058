//! Application orchestration for the rig daemon.
//!
//! Builds the GPIO bank, motor controller, distance sensors, obstacle
//! monitor and the two TCP channels from a [`Config`], runs until the
//! shutdown flag clears, and tears everything down in a safe order:
//! command intake first, motors stopped and pins released last.

use crate::config::{Config, HardwareConfig};
use crate::error::{Error, Result};
use crate::gpio::{GpioBackend, MockGpio, PinBank, SysfsGpio};
use crate::monitor::ObstacleMonitor;
use crate::motor::{MotorController, MotorId};
use crate::sensor::{DistanceSensor, Side};
use crate::streaming::{CommandServer, DistanceReporter, TelemetryPublisher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Main-loop poll interval for the shutdown flag
const RUN_POLL: Duration = Duration::from_millis(50);

/// The assembled daemon
pub struct RigApp {
    bank: Arc<PinBank>,
    motors: Arc<MotorController>,
    monitor: Arc<ObstacleMonitor>,
    publisher: TelemetryPublisher,
    reporter: DistanceReporter,
    server: CommandServer,
    running: Arc<AtomicBool>,
}

/// Build the configured GPIO backend
fn build_backend(hardware: &HardwareConfig) -> Result<Box<dyn GpioBackend>> {
    match hardware.backend.as_str() {
        "sysfs" => Ok(Box::new(SysfsGpio::new(hardware.sysfs_root.clone()))),
        "mock" => Ok(Box::new(MockGpio::new())),
        other => Err(Error::Other(format!("Unknown GPIO backend: {other}"))),
    }
}

impl RigApp {
    /// Bring the whole rig up.
    ///
    /// Claims every pin before anything runs; a partial claim is
    /// rolled back so a failed start leaves no pin exported.
    pub fn start(config: &Config, running: Arc<AtomicBool>) -> Result<Self> {
        let backend = build_backend(&config.hardware)?;
        let bank = Arc::new(PinBank::new(backend));
        for spec in crate::pins::all_specs() {
            bank.configure(spec);
        }
        if let Err(e) = bank.open_all() {
            bank.release_all();
            return Err(e);
        }
        log::info!("GPIO bank ready ({} backend)", config.hardware.backend);

        let motors = Arc::new(MotorController::new(Arc::clone(&bank)));

        let ranging = config.safety.ranging_params();
        let sensors: Vec<Arc<DistanceSensor>> = Side::ALL
            .iter()
            .map(|&side| {
                Arc::new(DistanceSensor::new(
                    side,
                    Arc::clone(&bank),
                    ranging.clone(),
                ))
            })
            .collect();

        let publisher = TelemetryPublisher::start(&config.network.telemetry_address)?;
        let monitor = Arc::new(ObstacleMonitor::start(
            sensors,
            Arc::clone(&motors),
            config.safety.monitor_params(),
            publisher.queue(),
        )?);
        let reporter = DistanceReporter::start(
            Arc::clone(&monitor),
            publisher.queue(),
            Duration::from_secs(config.telemetry.report_interval_secs),
        )?;
        let server = CommandServer::start(
            &config.network.command_address,
            Arc::clone(&motors),
            Arc::clone(&monitor),
            Arc::clone(&running),
        )?;

        Ok(Self {
            bank,
            motors,
            monitor,
            publisher,
            reporter,
            server,
            running,
        })
    }

    /// Block until the running flag clears (Ctrl-C or a `Shutdown`
    /// command)
    pub fn run(&self) {
        while self.running.load(Ordering::Relaxed) {
            thread::sleep(RUN_POLL);
        }
    }

    /// Tear the rig down: stop command intake, then monitoring and
    /// telemetry, then the motors, then unexport every pin.
    pub fn shutdown(mut self) {
        log::info!("Shutting down...");
        self.running.store(false, Ordering::Relaxed);
        self.server.stop();
        self.reporter.stop();
        self.monitor.stop();
        for motor in MotorId::ALL {
            if let Err(e) = self.motors.stop(motor) {
                log::error!("Failed to stop {motor} motor on shutdown: {e}");
            }
        }
        self.publisher.stop();
        self.bank.release_all();
        log::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn ephemeral_addr() -> String {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);
        addr
    }

    fn bench_config() -> Config {
        let mut config = Config::rig_defaults();
        config.hardware.backend = "mock".to_string();
        config.network.command_address = ephemeral_addr();
        config.network.telemetry_address = ephemeral_addr();
        // Keep scheduled ticks out of the test window.
        config.safety.initial_delay_secs = 60;
        config.safety.echo_timeout_secs = 1;
        config.safety.settle_secs = 0;
        config
    }

    #[test]
    fn app_starts_and_shuts_down_on_mock_hardware() {
        let config = bench_config();
        let running = Arc::new(AtomicBool::new(true));
        let app = RigApp::start(&config, Arc::clone(&running)).unwrap();
        assert!(app.bank.is_open(crate::pins::ARM_POWER));
        app.shutdown();
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = bench_config();
        config.hardware.backend = "i2c".to_string();
        let running = Arc::new(AtomicBool::new(true));
        assert!(RigApp::start(&config, running).is_err());
    }
}
