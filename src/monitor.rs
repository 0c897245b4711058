//! Obstacle monitoring: periodic ranging plus the safety override.
//!
//! One scheduler thread per sensor issues ticks after an initial delay
//! and then on a fixed post-completion delay, so measurements on the
//! same sensor never overlap and a stalled sensor only slows its own
//! cadence. The blocking busy-wait ranging runs on a shared bounded
//! worker pool; the continuation applies the safety policy: a reading
//! inside the obstacle threshold stops the arm and turret motors.
//! The traction motor stays under external command control.
//!
//! A failed or timed-out measurement produces no action for that
//! tick; "not determined" is neither an obstacle nor a clearance. The
//! next tick is the retry mechanism.

use crate::error::{Error, Result};
use crate::motor::{MotorController, MotorId};
use crate::sensor::{DistanceSensor, Side};
use crate::streaming::messages::{ObstacleEvent, TelemetryMessage, timestamp_us};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Granularity of interruptible sleeps in the scheduler threads
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Monitoring cadence and policy constants
#[derive(Debug, Clone)]
pub struct MonitorParams {
    /// Readings strictly below this stop the arm and turret (cm)
    pub threshold_cm: u64,
    /// Delay before a sensor's first tick
    pub initial_delay: Duration,
    /// Post-completion delay between ticks on one sensor
    pub interval: Duration,
    /// Worker pool size, normally one worker per sensor
    pub workers: usize,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            threshold_cm: 20,
            initial_delay: Duration::from_secs(20),
            interval: Duration::from_secs(1),
            workers: 4,
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads for blocking ranging jobs
struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(size);
        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("range-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            handles,
        })
    }

    fn submit(&self, job: Job) -> Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(job)
                .map_err(|_| Error::Other("worker pool is shut down".into())),
            None => Err(Error::Other("worker pool is shut down".into())),
        }
    }

    /// Close the job channel and join the workers; in-flight jobs run
    /// to completion.
    fn stop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Per-sensor periodic scheduler with the obstacle safety override.
///
/// Shared between the app and the command server; `stop` uses interior
/// mutability so an `Arc<ObstacleMonitor>` suffices.
pub struct ObstacleMonitor {
    sensors: HashMap<Side, Arc<DistanceSensor>>,
    pool: Mutex<WorkerPool>,
    schedulers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    /// Worst-case wall time of one on-demand measurement
    sample_budget: Duration,
}

impl ObstacleMonitor {
    /// Start monitoring: spawns the worker pool and one scheduler per
    /// sensor. Obstacle events are pushed to `events` for the
    /// telemetry publisher.
    pub fn start(
        sensors: Vec<Arc<DistanceSensor>>,
        motors: Arc<MotorController>,
        params: MonitorParams,
        events: Arc<ArrayQueue<TelemetryMessage>>,
    ) -> Result<Self> {
        let pool = WorkerPool::new(params.workers)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let sample_budget = sensors
            .first()
            .map(|s| s.params().settle + s.params().echo_timeout)
            .unwrap_or(Duration::from_secs(4))
            + Duration::from_secs(1);

        let mut schedulers = Vec::with_capacity(sensors.len());
        for sensor in &sensors {
            let sensor = Arc::clone(sensor);
            let motors = Arc::clone(&motors);
            let job_tx = pool
                .tx
                .clone()
                .ok_or_else(|| Error::Other("worker pool is shut down".into()))?;
            let shutdown = Arc::clone(&shutdown);
            let events = Arc::clone(&events);
            let params = params.clone();
            let name = format!("monitor-{}", sensor.side().label().to_lowercase());
            schedulers.push(thread::Builder::new().name(name).spawn(move || {
                scheduler_loop(sensor, motors, job_tx, params, shutdown, events);
            })?);
        }

        let sensors = sensors.into_iter().map(|s| (s.side(), s)).collect();
        Ok(Self {
            sensors,
            pool: Mutex::new(pool),
            schedulers: Mutex::new(schedulers),
            shutdown,
            sample_budget,
        })
    }

    /// Measure one side on demand, on the worker pool.
    ///
    /// Serialized against the side's scheduled ticks by the sensor's
    /// own ranging lock; does not feed the safety policy.
    pub fn sample(&self, side: Side) -> Result<u64> {
        let sensor = Arc::clone(
            self.sensors
                .get(&side)
                .ok_or_else(|| Error::InvalidCommand(format!("no sensor on side {side}")))?,
        );
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(sensor.measure());
        });
        self.pool.lock().submit(job)?;
        reply_rx
            .recv_timeout(self.sample_budget)
            .map_err(|_| Error::Other(format!("on-demand sample on {side} timed out")))?
    }

    /// Cancel all schedulers, wait out in-flight measurements, and
    /// tear the pool down.
    pub fn stop(&self) {
        log::info!("Stopping obstacle monitor");
        self.shutdown.store(true, Ordering::Relaxed);
        let handles: Vec<_> = self.schedulers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.pool.lock().stop();
        log::info!("Obstacle monitor stopped");
    }
}

impl Drop for ObstacleMonitor {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::Relaxed) {
            self.stop();
        }
    }
}

fn scheduler_loop(
    sensor: Arc<DistanceSensor>,
    motors: Arc<MotorController>,
    job_tx: Sender<Job>,
    params: MonitorParams,
    shutdown: Arc<AtomicBool>,
    events: Arc<ArrayQueue<TelemetryMessage>>,
) {
    let side = sensor.side();
    log::info!("Obstacle monitor for {side} started");
    sleep_interruptible(params.initial_delay, &shutdown);

    while !shutdown.load(Ordering::Relaxed) {
        let (done_tx, done_rx) = bounded::<()>(1);
        let job: Job = {
            let sensor = Arc::clone(&sensor);
            let motors = Arc::clone(&motors);
            let events = Arc::clone(&events);
            let threshold = params.threshold_cm;
            Box::new(move || {
                match sensor.measure() {
                    Ok(cm) => {
                        log::info!("Distance from {side} sensor = {cm} cm");
                        apply_policy(side, cm, threshold, &motors, &events);
                    }
                    Err(e) => {
                        // No obstacle decision this cycle; the next
                        // tick is the retry.
                        log::warn!("Ranging failed on {side}: {e}");
                    }
                }
                let _ = done_tx.send(());
            })
        };

        if job_tx.send(job).is_err() {
            break;
        }

        // The next tick is scheduled only after this measurement's
        // continuation has run.
        loop {
            match done_rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // In-flight measurement is bounded by the echo
                    // timeout; keep waiting even during shutdown.
                }
            }
        }

        sleep_interruptible(params.interval, &shutdown);
    }
    log::info!("Obstacle monitor for {side} stopped");
}

/// Sleep in short slices so shutdown is observed promptly
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let deadline = std::time::Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SHUTDOWN_POLL));
    }
}

/// The safety policy: a reading strictly inside the threshold stops
/// the arm and turret. Traction is deliberately left running.
fn apply_policy(
    side: Side,
    distance_cm: u64,
    threshold_cm: u64,
    motors: &MotorController,
    events: &ArrayQueue<TelemetryMessage>,
) {
    if distance_cm >= threshold_cm {
        return;
    }
    for motor in [MotorId::Arm, MotorId::Turret] {
        if let Err(e) = motors.stop(motor) {
            log::error!("Obstacle stop of {motor} motor failed: {e}");
        }
    }
    log::warn!(
        "Obstacle detected {distance_cm} cm from {side} sensor - arm and turret stopped"
    );
    let event = TelemetryMessage::ObstacleEvent(ObstacleEvent {
        timestamp: timestamp_us(),
        side: side.label().to_string(),
        distance_cm,
    });
    if events.push(event).is_err() {
        log::debug!("Telemetry queue full, obstacle event dropped");
    }
}
