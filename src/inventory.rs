/*! Detached consumer for the continuous-inventory tag stream.

`start()` fires `(0x02, 0x10)` at the RF module and spawns a worker
that reads the shared byte channel on a half-second poll. Every
inbound frame is classified: tag notifications (`CMD=0x12`) are
decoded and pushed to a bounded subscriber channel in reception
order (drops are counted, never reordered; deduplication is the
subscriber's business); anything else lands in a small spurious queue
that drops its oldest entry on overflow.

Lifecycle: Idle → Starting → Running → Stopping → Idle. `stop()`
sends `(0x02, 0xFF)` best-effort, waits up to a second for the ACK
and joins the worker; the worker reacts to cancellation within one
read poll. A transport error turns into a terminal event on the
subscriber channel and the machine returns to Idle.
*/
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::client::ReaderSession;
use crate::deframer::Deframer;
use crate::frame::Frame;
use crate::proto::{self, rf};
use crate::tag::TagReport;
use crate::transport::ByteTransport;
use crate::{Error, Result};

/// Read poll interval; also the cancellation latency bound.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `stop()` waits for the stop ACK.
pub const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Subscriber channel depth.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Spurious-frame queue depth.
pub const SPURIOUS_CAPACITY: usize = 64;

/// Streamer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryState {
    /// No inventory running.
    Idle,
    /// Start command sent, ACK not yet seen.
    Starting,
    /// Tag stream flowing.
    Running,
    /// Stop command sent, waiting for the ACK.
    Stopping,
}

/// What the subscriber channel carries.
#[derive(Debug, Clone)]
pub enum InventoryEvent {
    /// One decoded tag read.
    Tag(Box<TagReport>),
    /// The stream ended; no more events follow.
    Terminated {
        /// Why the stream ended (stop, disconnect, transport error).
        reason: String,
    },
}

struct Shared {
    stop: AtomicBool,
    state: Mutex<InventoryState>,
    dropped: AtomicU64,
    spurious: Mutex<VecDeque<Frame>>,
}

impl Shared {
    fn set_state(&self, s: InventoryState) {
        *self.state.lock().unwrap() = s;
    }
}

/// Handle to a running inventory stream.
pub struct InventoryTask {
    shared: Arc<Shared>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl InventoryTask {
    /// Start inventory on the session's byte channel. `tuning`
    /// carries optional antenna-tuning TLVs for the start command.
    ///
    /// The worker owns a clone of the channel; the session itself
    /// stays free for other commands, which is how the web bridge
    /// keeps `/api/status` responsive mid-inventory.
    pub fn start(
        session: &ReaderSession,
        tuning: &[u8],
    ) -> Result<(Self, Receiver<InventoryEvent>)> {
        let start_cmd = Frame::new(proto::CMD_RF, rf::START_INVENTORY, tuning.to_vec())?.encode();
        let stop_cmd = Frame::new(proto::CMD_RF, rf::STOP_INVENTORY, vec![])?.encode();
        let channel = session.clone_channel()?;
        let (tx, rx) = std::sync::mpsc::sync_channel(SUBSCRIBER_CAPACITY);
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            state: Mutex::new(InventoryState::Starting),
            dropped: AtomicU64::new(0),
            spurious: Mutex::new(VecDeque::with_capacity(SPURIOUS_CAPACITY)),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("inventory".into())
            .spawn(move || worker(channel, worker_shared, tx, &start_cmd, &stop_cmd))
            .map_err(|e| Error::State(format!("cannot spawn inventory worker: {e}")))?;
        Ok((
            Self {
                shared,
                handle: Some(handle),
            },
            rx,
        ))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InventoryState {
        *self.shared.state.lock().unwrap()
    }

    /// True until the worker has wound down.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() != InventoryState::Idle
    }

    /// Tag events dropped on subscriber-channel overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Drain the spurious-frame queue (non-tag frames seen while
    /// running).
    #[must_use]
    pub fn take_spurious(&self) -> Vec<Frame> {
        self.shared.spurious.lock().unwrap().drain(..).collect()
    }

    /// Stop the stream: cancel the worker, let it send the stop
    /// command and wait for the ACK, then join it. When this
    /// returns, no further tag events will be delivered (one event
    /// may already sit in the channel).
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("inventory worker panicked");
            }
        }
        self.shared.set_state(InventoryState::Idle);
    }
}

impl Drop for InventoryTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn deliver(shared: &Shared, tx: &SyncSender<InventoryEvent>, event: InventoryEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let n = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n.is_power_of_two() {
                warn!("subscriber channel full, {n} tag events dropped so far");
            }
        }
        Err(TrySendError::Disconnected(_)) => {
            // Nobody is listening any more; the worker will notice
            // the stop flag soon enough.
        }
    }
}

fn push_spurious(shared: &Shared, frame: Frame) {
    let mut q = shared.spurious.lock().unwrap();
    if q.len() == SPURIOUS_CAPACITY {
        q.pop_front();
    }
    q.push_back(frame);
}

fn now_unix() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

fn worker(
    mut channel: Box<dyn ByteTransport>,
    shared: Arc<Shared>,
    tx: SyncSender<InventoryEvent>,
    start_cmd: &[u8],
    stop_cmd: &[u8],
) {
    if let Err(e) = channel.send_all(start_cmd) {
        shared.set_state(InventoryState::Idle);
        let _ = tx.try_send(InventoryEvent::Terminated {
            reason: format!("start failed: {e}"),
        });
        return;
    }

    let mut deframer = Deframer::new();
    let mut count: u64 = 0;
    let mut buf = [0u8; 4096];
    let reason = loop {
        if shared.stop.load(Ordering::SeqCst) {
            break "stopped".to_string();
        }
        let n = match channel.recv(&mut buf, POLL_TIMEOUT) {
            Ok(n) => n,
            Err(e) => {
                shared.set_state(InventoryState::Idle);
                let _ = tx.try_send(InventoryEvent::Terminated {
                    reason: format!("transport error: {e}"),
                });
                return;
            }
        };
        deframer.push(&buf[..n]);
        while let Some(frame) = deframer.next_frame() {
            if frame.cmd == proto::CMD_TAG_NOTIFY {
                count += 1;
                if *shared.state.lock().unwrap() == InventoryState::Starting {
                    // Some firmware revisions stream tags before the
                    // start ACK.
                    shared.set_state(InventoryState::Running);
                }
                let mut report = TagReport::parse(frame.sub, &frame.payload);
                report.count = count;
                report.timestamp = now_unix();
                deliver(&shared, &tx, InventoryEvent::Tag(Box::new(report)));
            } else if frame.cmd == proto::CMD_RF && frame.sub == rf::START_INVENTORY {
                debug!("inventory ACK");
                shared.set_state(InventoryState::Running);
            } else {
                debug!("spurious {frame:?} during inventory");
                push_spurious(&shared, frame);
            }
        }
    };

    // Best-effort stop handshake.
    shared.set_state(InventoryState::Stopping);
    if channel.send_all(stop_cmd).is_ok() {
        let deadline = Instant::now() + STOP_ACK_TIMEOUT;
        'ack: loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("no stop ACK within {STOP_ACK_TIMEOUT:?}");
                break;
            }
            match channel.recv(&mut buf, remaining) {
                Ok(n) => {
                    deframer.push(&buf[..n]);
                    while let Some(frame) = deframer.next_frame() {
                        if frame.cmd == proto::CMD_RF && frame.sub == rf::STOP_INVENTORY {
                            debug!("stop ACK");
                            break 'ack;
                        }
                        // Tags still in flight are discarded: the
                        // subscriber asked us to stop.
                    }
                }
                Err(_) => break,
            }
        }
    }
    shared.set_state(InventoryState::Idle);
    info!("inventory ended ({reason}), {count} tags seen");
    let _ = tx.try_send(InventoryEvent::Terminated { reason });
}
