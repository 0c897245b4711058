//! Telemetry broadcast over TCP.
//!
//! Uses a lock-free queue between the producers and the socket: the
//! obstacle schedulers and the periodic reporter push with `push()`
//! and never block on network I/O. A dedicated publisher thread owns
//! the TCP listener and broadcasts every queued message to all
//! connected clients as length-prefixed JSON frames, pruning clients
//! whose writes fail.
//!
//! The [`DistanceReporter`] thread samples all four sides on a slow
//! cadence and queues a [`DistanceReport`] carrying one named metric
//! per side (`FrontDistance`, `BackDistance`, `LeftDistance`,
//! `RightDistance`). Sides whose sample fails are left out of that
//! report.

use crate::error::{Error, Result};
use crate::monitor::ObstacleMonitor;
use crate::sensor::Side;
use crate::streaming::messages::{
    DistanceMetric, DistanceReport, TelemetryMessage, timestamp_us,
};
use crossbeam_queue::ArrayQueue;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Queue depth; minutes of telemetry at the default cadences
const QUEUE_CAPACITY: usize = 256;

/// Publisher idle sleep when the queue is empty
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Batch limit per loop iteration so accepts are never starved
const MAX_BATCH: usize = 50;

/// Telemetry publisher owning the listener thread and the queue
pub struct TelemetryPublisher {
    queue: Arc<ArrayQueue<TelemetryMessage>>,
    publisher_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TelemetryPublisher {
    /// Bind the telemetry port and start the publisher thread
    pub fn start(bind_address: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .map_err(|e| Error::Other(format!("Failed to bind to {bind_address}: {e}")))?;
        listener.set_nonblocking(true)?;

        let queue = Arc::new(ArrayQueue::new(QUEUE_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_queue = Arc::clone(&queue);
        let thread_shutdown = Arc::clone(&shutdown);
        let publisher_thread = thread::Builder::new()
            .name("telemetry-publisher".to_string())
            .spawn(move || {
                publisher_loop(listener, thread_queue, thread_shutdown);
            })?;

        log::info!("Telemetry publisher started on {bind_address}");
        Ok(Self {
            queue,
            publisher_thread: Some(publisher_thread),
            shutdown,
        })
    }

    /// Queue handle for producers; `push()` never blocks
    pub fn queue(&self) -> Arc<ArrayQueue<TelemetryMessage>> {
        Arc::clone(&self.queue)
    }

    /// Stop broadcasting and join the publisher thread
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.publisher_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publisher_loop(
    listener: TcpListener,
    queue: Arc<ArrayQueue<TelemetryMessage>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut clients: Vec<TcpStream> = Vec::new();
    let mut published = 0u64;
    // Reused across messages to avoid per-frame allocation.
    let mut frame = Vec::with_capacity(1024);

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Telemetry client connected: {addr}");
                clients.push(stream);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                log::error!("Telemetry accept error: {e}");
            }
        }

        let mut batch = 0;
        while let Some(message) = queue.pop() {
            match encode_frame(&message, &mut frame) {
                Ok(()) => {
                    broadcast(&mut clients, &frame);
                    published += 1;
                }
                Err(e) => {
                    log::error!("Failed to encode telemetry message: {e}");
                }
            }
            batch += 1;
            if batch >= MAX_BATCH {
                break;
            }
        }

        if queue.is_empty() {
            thread::sleep(IDLE_SLEEP);
        }
    }

    log::info!("Telemetry publisher exiting ({published} messages published)");
}

/// Serialize one message into a length-prefixed frame
fn encode_frame(message: &TelemetryMessage, frame: &mut Vec<u8>) -> Result<()> {
    let payload = serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))?;
    frame.clear();
    frame.reserve(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(())
}

/// Write the frame to every client, dropping the ones that fail
fn broadcast(clients: &mut Vec<TcpStream>, frame: &[u8]) {
    clients.retain_mut(|client| match client.write_all(frame) {
        Ok(()) => true,
        Err(e) => {
            if let Ok(addr) = client.peer_addr() {
                log::debug!("Telemetry client {addr} disconnected: {e}");
            }
            false
        }
    });
}

/// Periodic four-side clearance reporter
pub struct DistanceReporter {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl DistanceReporter {
    /// Start sampling all sides every `interval`, queueing one
    /// [`DistanceReport`] per round
    pub fn start(
        monitor: Arc<ObstacleMonitor>,
        queue: Arc<ArrayQueue<TelemetryMessage>>,
        interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("distance-reporter".to_string())
            .spawn(move || {
                reporter_loop(monitor, queue, interval, thread_shutdown);
            })?;
        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DistanceReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reporter_loop(
    monitor: Arc<ObstacleMonitor>,
    queue: Arc<ArrayQueue<TelemetryMessage>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    log::info!("Distance reporter started ({}s cadence)", interval.as_secs());
    while !shutdown.load(Ordering::Relaxed) {
        sleep_with_shutdown(interval, &shutdown);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let report = collect_report(&monitor);
        if report.metrics.is_empty() {
            log::warn!("Distance report skipped, no side answered");
            continue;
        }
        if queue.push(TelemetryMessage::DistanceReport(report)).is_err() {
            log::debug!("Telemetry queue full, distance report dropped");
        }
    }
    log::info!("Distance reporter stopped");
}

/// Sample every side once; failed sides are omitted from the report
fn collect_report(monitor: &ObstacleMonitor) -> DistanceReport {
    let mut metrics = Vec::with_capacity(Side::ALL.len());
    for &side in Side::ALL.iter() {
        match monitor.sample(side) {
            Ok(distance_cm) => metrics.push(DistanceMetric {
                name: side.metric_name().to_string(),
                distance_cm,
            }),
            Err(e) => {
                log::warn!("Distance report sample failed on {side}: {e}");
            }
        }
    }
    DistanceReport {
        timestamp: timestamp_us(),
        metrics,
    }
}

fn sleep_with_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{MockGpio, PinBank};
    use crate::motor::MotorController;
    use crate::sensor::{DistanceSensor, RangingParams, SPEED_OF_SOUND};
    use crate::streaming::messages::ObstacleEvent;
    use crate::streaming::wire::read_frame;

    fn ephemeral_addr() -> String {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);
        addr
    }

    #[test]
    fn queued_messages_reach_a_connected_client() {
        let addr = ephemeral_addr();
        let mut publisher = TelemetryPublisher::start(&addr).unwrap();
        let queue = publisher.queue();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut stream = loop {
            match TcpStream::connect(&addr) {
                Ok(s) => break s,
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("connect failed: {e}"),
            }
        };
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        // Let the publisher pick the connection up before pushing.
        thread::sleep(Duration::from_millis(50));

        queue
            .push(TelemetryMessage::ObstacleEvent(ObstacleEvent {
                timestamp: 42,
                side: "FRONT".to_string(),
                distance_cm: 12,
            }))
            .unwrap();

        let mut buffer = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let message = loop {
            match read_frame::<_, TelemetryMessage>(&mut stream, &mut buffer).unwrap() {
                Some(m) => break m,
                None if Instant::now() < deadline => {}
                None => panic!("no telemetry frame before deadline"),
            }
        };
        assert!(matches!(
            message,
            TelemetryMessage::ObstacleEvent(e) if e.side == "FRONT" && e.distance_cm == 12
        ));
        publisher.stop();
    }

    #[test]
    fn report_omits_sides_that_fail_to_answer() {
        let mock = MockGpio::new();
        let bank = Arc::new(PinBank::new(Box::new(mock.clone())));
        for spec in crate::pins::all_specs() {
            bank.configure(spec);
        }
        bank.open_all().unwrap();
        let motors = Arc::new(MotorController::new(Arc::clone(&bank)));

        let ranging = RangingParams {
            trigger_pulse: Duration::from_nanos(100),
            echo_timeout: Duration::from_millis(30),
            settle: Duration::ZERO,
            speed_constant: SPEED_OF_SOUND,
        };
        for &side in Side::ALL.iter() {
            let (echo, trigger) = side.terminals();
            let pulse = if side == Side::Back {
                // Back sensor is dead: its echo never rises.
                None
            } else {
                Some(Duration::from_millis(4))
            };
            mock.set_echo_profile(trigger, echo, Duration::ZERO, pulse);
        }
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
        let events = Arc::new(ArrayQueue::new(8));
        let params = crate::monitor::MonitorParams {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let monitor = ObstacleMonitor::start(sensors, motors, params, events).unwrap();

        let report = collect_report(&monitor);

        let names: Vec<&str> = report.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["FrontDistance", "LeftDistance", "RightDistance"]);
        for metric in &report.metrics {
            assert!((60..=76).contains(&metric.distance_cm), "{metric:?}");
        }
        monitor.stop();
    }
}
