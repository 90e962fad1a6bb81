use crate::error::BusError;
use crate::protocol::{decode_feedback, encode_command, ControlCommand, Header, MODULE_NAME};
use crate::telemetry::FeedbackCache;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Outbound control channel to the vehicle.
///
/// `publish` is fire-and-forget: no acknowledgement, at-most-once, and safe to call from
/// several tasks at once.
pub trait CommandBus: Send + Sync {
    fn publish(&self, command: &ControlCommand) -> Result<(), BusError>;

    fn close(&self) {}
}

/// Stamps headers with the session sequence counter before handing commands to the bus.
pub struct CommandPublisher {
    bus: Arc<dyn CommandBus>,
    sequence: AtomicU64,
}

impl CommandPublisher {
    pub fn new(bus: Arc<dyn CommandBus>) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publishes a copy of `command` with a fresh header and returns what was sent.
    pub fn publish(&self, command: &ControlCommand) -> Result<ControlCommand, BusError> {
        let mut stamped = command.clone();
        stamped.header = Header {
            module_name: MODULE_NAME.to_string(),
            sequence_num: self.sequence.fetch_add(1, Ordering::AcqRel) + 1,
            timestamp_sec: wall_clock_secs(),
        };

        self.bus.publish(&stamped)?;
        debug!(
            seq = stamped.header.sequence_num,
            throttle = stamped.throttle,
            brake = stamped.brake,
            steering = stamped.steering_target,
            speed = stamped.speed,
            accel = stamped.acceleration,
            gear = %stamped.gear_location,
            epb = stamped.parking_brake,
            "published control command"
        );
        Ok(stamped)
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.bus.close();
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Newline-delimited JSON transport over TCP.
pub struct TcpBus {
    outgoing: mpsc::UnboundedSender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpBus {
    pub async fn connect(addr: &str, cache: Arc<FeedbackCache>) -> Result<Self, BusError> {
        let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BusError::Connect {
                addr: addr.to_string(),
                reason: format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
            })?
            .map_err(|e| BusError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to disable Nagle on command socket");
        }

        let (reader, writer) = stream.into_split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_commands(writer, queue));
        let reader_task = tokio::spawn(read_feedback(reader, cache));

        info!(%addr, "connected to vehicle");
        Ok(Self {
            outgoing,
            tasks: Mutex::new(vec![writer_task, reader_task]),
        })
    }
}

impl CommandBus for TcpBus {
    fn publish(&self, command: &ControlCommand) -> Result<(), BusError> {
        let line = encode_command(command)?;
        self.outgoing.send(line).map_err(|_| BusError::Closed)
    }

    fn close(&self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        info!("vehicle connection closed");
    }
}

async fn write_commands(mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = queue.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "command write failed, closing transport");
            break;
        }
    }
}

async fn read_feedback(reader: OwnedReadHalf, cache: Arc<FeedbackCache>) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match decode_feedback(trimmed) {
                    Ok(frame) => cache.update(frame),
                    Err(e) => warn!(error = %e, "dropping chassis frame"),
                }
            }
            Ok(None) => {
                warn!("vehicle closed the feedback stream");
                break;
            }
            Err(e) => {
                warn!(error = %e, "feedback read failed");
                break;
            }
        }
    }
}

/// In-memory bus that records every command with its send instant.
#[derive(Debug, Default)]
pub struct RecordingBus {
    sent: Mutex<Vec<(Instant, ControlCommand)>>,
    fail_after: Option<usize>,
    attempts: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `accepted` commands, then reports the bus as closed.
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            fail_after: Some(accepted),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(Instant, ControlCommand)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        self.sent().into_iter().map(|(_, command)| command).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl CommandBus for RecordingBus {
    fn publish(&self, command: &ControlCommand) -> Result<(), BusError> {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.is_closed() || self.fail_after.is_some_and(|limit| attempt >= limit) {
            return Err(BusError::Closed);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), command.clone()));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
