//! TCP command server for external motor and ranging control.
//!
//! TCP is used for commands (not UDP) because:
//!
//! - **Reliability**: Commands must not be lost (e.g., "stop motor")
//! - **Ordering**: Commands must execute in sequence
//! - **Acknowledgment**: The dispatcher sees a reply for every command
//!
//! Each accepted connection gets its own receiver thread. Commands are
//! length-prefixed JSON frames (see [`crate::streaming::wire`]); every
//! frame is answered with a [`CommandReply`] on the same connection. A
//! malformed or rejected command produces an `Error` reply and leaves
//! the connection open.
//!
//! `Shutdown` clears the daemon running flag; receiver threads notice
//! it within their 500ms read timeout and drain out.

use crate::error::{Error, Result};
use crate::monitor::ObstacleMonitor;
use crate::motor::{MotorController, MotorDirection, MotorId};
use crate::sensor::Side;
use crate::streaming::messages::{CommandReply, RigCommand};
use crate::streaming::wire::{read_frame, write_frame};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read timeout on command connections; bounds shutdown latency
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Accept-loop poll interval when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Command server owning the accept loop
pub struct CommandServer {
    accept_thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl CommandServer {
    /// Bind the command port and start accepting connections.
    ///
    /// `running` is the daemon-wide flag: clearing it stops the accept
    /// loop and all receiver threads, and a `Shutdown` command clears
    /// it from here.
    pub fn start(
        bind_address: &str,
        motors: Arc<MotorController>,
        monitor: Arc<ObstacleMonitor>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .map_err(|e| Error::Other(format!("Failed to bind to {bind_address}: {e}")))?;
        listener.set_nonblocking(true)?;
        log::info!("Command server listening on {bind_address}");

        let accept_running = Arc::clone(&running);
        let accept_thread = thread::Builder::new()
            .name("command-server".to_string())
            .spawn(move || {
                accept_loop(listener, motors, monitor, accept_running);
            })?;

        Ok(Self {
            accept_thread: Some(accept_thread),
            running,
        })
    }

    /// Stop accepting and join the accept loop. Receiver threads exit
    /// on their own once the running flag is clear.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    motors: Arc<MotorController>,
    monitor: Arc<ObstacleMonitor>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Command client connected: {addr}");
                if let Err(e) = stream.set_nonblocking(false) {
                    log::error!("Failed to set blocking mode for {addr}: {e}");
                    continue;
                }
                let motors = Arc::clone(&motors);
                let monitor = Arc::clone(&monitor);
                let running = Arc::clone(&running);
                let spawned = thread::Builder::new()
                    .name("command-receiver".to_string())
                    .spawn(move || {
                        let mut receiver = CommandReceiver::new(motors, monitor, running);
                        if let Err(e) = receiver.run(stream) {
                            log::error!("Command receiver error: {e}");
                        }
                        log::info!("Command client disconnected: {addr}");
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn command receiver: {e}");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::error!("Accept error: {e}");
            }
        }
    }
    log::info!("Command server stopped");
}

/// Per-connection command handler
struct CommandReceiver {
    motors: Arc<MotorController>,
    monitor: Arc<ObstacleMonitor>,
    running: Arc<AtomicBool>,
    /// Reusable buffer for command payloads
    read_buffer: Vec<u8>,
}

impl CommandReceiver {
    fn new(
        motors: Arc<MotorController>,
        monitor: Arc<ObstacleMonitor>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            motors,
            monitor,
            running,
            read_buffer: Vec::with_capacity(256),
        }
    }

    /// Process commands on one connection until disconnect or shutdown
    fn run(&mut self, mut stream: TcpStream) -> Result<()> {
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            log::warn!("Failed to set read timeout: {e}");
        }

        while self.running.load(Ordering::Relaxed) {
            match read_frame::<_, RigCommand>(&mut stream, &mut self.read_buffer) {
                Ok(Some(cmd)) => {
                    log::info!("Received command: {cmd:?}");
                    let reply = self.handle_command(cmd);
                    if let Err(e) = write_frame(&mut stream, &reply) {
                        log::error!("Failed to send reply: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    // Read timed out; loop re-checks the running flag.
                }
                Err(Error::Serialization(msg)) => {
                    // Framing survived but the payload is garbage: tell
                    // the client and keep the connection.
                    log::warn!("Rejected command frame: {msg}");
                    let reply = CommandReply::Error {
                        message: format!("invalid command: {msg}"),
                    };
                    if let Err(e) = write_frame(&mut stream, &reply) {
                        log::error!("Failed to send reply: {e}");
                        break;
                    }
                }
                Err(e) => {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    if let Error::Io(ref io_err) = e
                        && (io_err.kind() == std::io::ErrorKind::UnexpectedEof
                            || io_err.kind() == std::io::ErrorKind::ConnectionReset)
                    {
                        return Ok(());
                    }
                    return Err(e);
                }
            }
        }

        let _ = stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    /// Execute one command and build its reply. Failures become
    /// `Error` replies; no command ever takes the connection down.
    fn handle_command(&self, cmd: RigCommand) -> CommandReply {
        match self.dispatch(cmd) {
            Ok(reply) => reply,
            Err(e) => CommandReply::Error {
                message: e.to_string(),
            },
        }
    }

    fn dispatch(&self, cmd: RigCommand) -> Result<CommandReply> {
        match cmd {
            RigCommand::StartMotor { motor, direction } => {
                let motor = MotorId::from_wire(motor)?;
                let direction = MotorDirection::parse(&direction)?;
                self.motors.start(motor, direction)?;
                Ok(CommandReply::Ok)
            }
            RigCommand::StopMotor { motor } => {
                let motor = MotorId::from_wire(motor)?;
                self.motors.stop(motor)?;
                Ok(CommandReply::Ok)
            }
            RigCommand::MeasureDistance { side } => {
                let side = Side::parse(&side)?;
                let distance_cm = self.monitor.sample(side)?;
                Ok(CommandReply::Distance {
                    side: side.label().to_string(),
                    distance_cm,
                })
            }
            RigCommand::Shutdown => {
                log::info!("Shutdown requested over command channel");
                self.running.store(false, Ordering::Relaxed);
                Ok(CommandReply::Ok)
            }
        }
    }
}
