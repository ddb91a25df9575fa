//! Device connection lifecycle.
//!
//! A [`Session`] owns one logical connection to a device. The socket is
//! driven by a task spawned on the current [`tokio::task::LocalSet`]; the
//! handle only touches shared memory, so [`Session::send`] never waits.
//!
//! ```text
//! Connecting ──handshake ok──▶ Open
//!     ▲                          │
//!     └────── link dropped ──────┘
//!
//! any ── close / fatal error ──▶ Closed   (terminal)
//! ```
//!
//! Every successful handshake starts a new connection epoch. Frames queued
//! under an older epoch are dropped instead of written, so a reconnect never
//! replays stale data.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use guibridge_frame::{Decoded, Frame, FrameCodec, FrameConfig, FrameError, TypeTag};
use guibridge_transport::{Connector, DeviceAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::BridgeConfig;
use crate::control::{ControlMessage, EVENT_PING, EVENT_PONG};
use crate::error::{LinkError, Result};
use crate::handshake::{handshake_client, HandshakeResult};

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate result of a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the writer.
    Queued,
    /// Not open; the frame was dropped.
    Disconnected,
    /// The outbound queue is full; the frame was dropped.
    Backpressure,
    /// The session is closed for good.
    Closed,
    /// The frame was refused before reaching the session.
    Rejected,
}

impl SendStatus {
    pub fn is_queued(self) -> bool {
        self == SendStatus::Queued
    }
}

/// Counters describing session traffic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Outbound frames dropped while disconnected, under backpressure or
    /// left over from a previous connection.
    pub frames_dropped: u64,
    /// Successful handshakes.
    pub connects: u64,
    /// Round trip of the most recent answered ping.
    pub last_rtt: Option<Duration>,
    /// Time since the last inbound frame, sampled when stats were taken.
    pub since_last_inbound: Option<Duration>,
}

impl SessionStats {
    /// Connections established after the first one.
    pub fn reconnects(&self) -> u64 {
        self.connects.saturating_sub(1)
    }
}

type Handler = Box<dyn FnMut(Decoded)>;

enum Outbound {
    Frame { epoch: u64, frame: Frame },
    Flush(oneshot::Sender<()>),
}

struct Shared {
    state: watch::Sender<SessionState>,
    epoch: Cell<u64>,
    handler: RefCell<Option<Handler>>,
    failure: RefCell<Option<LinkError>>,
    handshake: RefCell<Option<HandshakeResult>>,
    stats: RefCell<SessionStats>,
    last_inbound: Cell<Option<Instant>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Closed is terminal: later transitions are ignored.
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "session state change");
            *state = next;
            true
        });
    }

    fn fail(&self, err: LinkError) {
        error!(error = %err, "session failed");
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some(err);
        }
    }

    fn count_dropped(&self) {
        self.stats.borrow_mut().frames_dropped += 1;
    }

    fn deliver(&self, decoded: Decoded) {
        let handler = self.handler.borrow_mut().take();
        if let Some(mut handler) = handler {
            handler(decoded);
            // The handler may have been replaced or detached while it ran.
            let mut slot = self.handler.borrow_mut();
            if slot.is_none() && self.state() != SessionState::Closed {
                *slot = Some(handler);
            }
        }
    }
}

/// Handle to a background device connection.
pub struct Session {
    shared: Rc<Shared>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start connecting to `addr` in the background.
    ///
    /// Must be called from within a [`tokio::task::LocalSet`].
    pub fn open<C>(connector: C, addr: DeviceAddr, config: BridgeConfig) -> Session
    where
        C: Connector + 'static,
    {
        let (state, _) = watch::channel(SessionState::Connecting);
        let shared = Rc::new(Shared {
            state,
            epoch: Cell::new(0),
            handler: RefCell::new(None),
            failure: RefCell::new(None),
            handshake: RefCell::new(None),
            stats: RefCell::new(SessionStats::default()),
            last_inbound: Cell::new(None),
        });
        let (outbound, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let shutdown_timeout = config.shutdown_timeout;

        info!(%addr, transport = connector.transport_name(), "opening device session");
        let task = tokio::task::spawn_local(run(
            connector,
            addr,
            config,
            Rc::clone(&shared),
            outbound_rx,
            cancel.clone(),
        ));

        Session {
            shared,
            outbound,
            cancel,
            shutdown_timeout,
            task: RefCell::new(Some(task)),
        }
    }

    /// Queue `frame` for the device without waiting.
    ///
    /// Frames are only accepted while the session is open and are written in
    /// call order.
    pub fn send(&self, frame: Frame) -> SendStatus {
        match self.shared.state() {
            SessionState::Closed => return SendStatus::Closed,
            SessionState::Connecting => {
                self.shared.count_dropped();
                return SendStatus::Disconnected;
            }
            SessionState::Open => {}
        }

        let epoch = self.shared.epoch.get();
        match self.outbound.try_send(Outbound::Frame { epoch, frame }) {
            Ok(()) => SendStatus::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.count_dropped();
                warn!("outbound queue full, dropping frame");
                SendStatus::Backpressure
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }

    /// Replace the inbound frame handler.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(Decoded) + 'static,
    {
        if self.shared.state() == SessionState::Closed {
            return;
        }
        *self.shared.handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Release the connection, stop reconnecting and detach the handler.
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.set_state(SessionState::Closed);
        self.shared.handler.borrow_mut().take();
    }

    /// Write out frames already queued, then close.
    pub async fn shutdown(&self) {
        if self.shared.state() == SessionState::Open {
            let (done, flushed) = oneshot::channel();
            let wait = async {
                if self.outbound.send(Outbound::Flush(done)).await.is_ok() {
                    let _ = flushed.await;
                }
            };
            if tokio::time::timeout(self.shutdown_timeout, wait).await.is_err() {
                warn!(timeout = ?self.shutdown_timeout, "shutdown flush timed out");
            }
        }
        self.close();
        let task = self.task.borrow_mut().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Wait until the session is open.
    ///
    /// Fails with the recorded fatal error (taking it) or
    /// [`LinkError::Closed`] once the session can no longer open.
    pub async fn wait_open(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                SessionState::Open => return Ok(()),
                SessionState::Closed => {
                    return Err(self.take_failure().unwrap_or(LinkError::Closed));
                }
                SessionState::Connecting => {}
            }
            if state.changed().await.is_err() {
                return Err(LinkError::Closed);
            }
        }
    }

    /// The fatal error that closed the session, once.
    pub fn take_failure(&self) -> Option<LinkError> {
        self.shared.failure.borrow_mut().take()
    }

    /// Result of the most recent handshake.
    pub fn handshake(&self) -> Option<HandshakeResult> {
        self.shared.handshake.borrow().clone()
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.shared.stats.borrow().clone();
        stats.since_last_inbound = self.shared.last_inbound.get().map(|at| at.elapsed());
        stats
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.shared.state())
            .field("epoch", &self.shared.epoch.get())
            .finish()
    }
}

async fn run<C: Connector>(
    connector: C,
    addr: DeviceAddr,
    config: BridgeConfig,
    shared: Rc<Shared>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config.reconnect.clone());
    let control = config.control_channel();
    let mut ever_open = false;
    let mut initial_failures: u32 = 0;

    loop {
        shared.set_state(SessionState::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = establish(&connector, &addr, &config) => attempt,
        };

        match attempt {
            Ok((mut framed, handshake)) => {
                backoff.reset();
                ever_open = true;
                let epoch = shared.epoch.get() + 1;
                shared.epoch.set(epoch);
                drain_stale(&mut outbound, &shared);
                *shared.handshake.borrow_mut() = Some(handshake);
                shared.stats.borrow_mut().connects += 1;
                shared.last_inbound.set(Some(Instant::now()));
                shared.set_state(SessionState::Open);
                info!(%addr, epoch, "device session open");

                let ended = drive(&mut framed, &control, &config, &shared, &mut outbound, &cancel).await;
                match ended {
                    Ok(()) => break,
                    Err(err) => {
                        warn!(%addr, error = %err, "device link dropped");
                        shared.set_state(SessionState::Connecting);
                    }
                }
            }
            Err(err) if err.is_fatal() => {
                shared.fail(err);
                break;
            }
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                if !ever_open {
                    initial_failures = initial_failures.saturating_add(1);
                    if config
                        .reconnect
                        .initial_attempts
                        .is_some_and(|limit| initial_failures >= limit)
                    {
                        shared.fail(LinkError::ReconnectExhausted {
                            attempts: initial_failures,
                        });
                        break;
                    }
                }
            }
        }

        let Some(delay) = backoff.next_delay() else {
            shared.fail(LinkError::ReconnectExhausted {
                attempts: backoff.attempts(),
            });
            break;
        };
        debug!(delay = ?delay, attempt = backoff.attempts(), "reconnecting after delay");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(SessionState::Closed);
    shared.handler.borrow_mut().take();
    drain_stale(&mut outbound, &shared);
    debug!(%addr, "session task finished");
}

async fn establish<C: Connector>(
    connector: &C,
    addr: &DeviceAddr,
    config: &BridgeConfig,
) -> Result<(Framed<C::Stream, FrameCodec>, HandshakeResult)> {
    let stream = connector.connect(addr).await?;
    let codec = FrameCodec::with_config(FrameConfig {
        max_payload_size: config.max_payload_size,
    });
    let mut framed = Framed::new(stream, codec);
    let handshake =
        handshake_client(&mut framed, &config.control_channel(), &config.handshake).await?;
    Ok((framed, handshake))
}

/// Discard whatever was queued before the current epoch.
fn drain_stale(outbound: &mut mpsc::Receiver<Outbound>, shared: &Shared) {
    while let Ok(item) = outbound.try_recv() {
        match item {
            Outbound::Frame { .. } => shared.count_dropped(),
            // Dropping the sender wakes the waiter.
            Outbound::Flush(_) => {}
        }
    }
}

/// Pump one established connection.
///
/// Returns `Ok(())` when the session should stop and `Err` when the link
/// dropped and should be re-established.
async fn drive<S>(
    framed: &mut Framed<S, FrameCodec>,
    control: &str,
    config: &BridgeConfig,
    shared: &Shared,
    outbound: &mut mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let epoch = shared.epoch.get();
    let mut ticker = config
        .ping_interval
        .filter(|period| !period.is_zero())
        .map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
    let mut ping_seq: u64 = 0;
    let mut pending_ping: Option<(u64, Instant)> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),

            inbound = framed.next() => {
                let decoded = match inbound {
                    None | Some(Err(FrameError::ConnectionClosed)) => {
                        return Err(LinkError::Disconnected("device closed the connection".to_string()));
                    }
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(decoded)) => decoded,
                };
                shared.last_inbound.set(Some(Instant::now()));

                if let Decoded::Valid(frame) = &decoded {
                    shared.stats.borrow_mut().frames_received += 1;
                    if frame.channel == control && frame.tag == TypeTag::Json {
                        if let Some(Ok(msg)) = ControlMessage::from_frame(frame) {
                            if msg.is(EVENT_PING) {
                                framed.send(ControlMessage::pong(msg.id).to_frame(control)?).await?;
                                continue;
                            }
                            if msg.is(EVENT_PONG) {
                                if let Some((id, sent_at)) = pending_ping {
                                    if msg.id == Some(id) {
                                        let rtt = sent_at.elapsed();
                                        debug!(rtt = ?rtt, "pong received");
                                        shared.stats.borrow_mut().last_rtt = Some(rtt);
                                        pending_ping = None;
                                    }
                                }
                                continue;
                            }
                        }
                    }
                }
                shared.deliver(decoded);
            }

            item = outbound.recv() => match item {
                None => return Ok(()),
                Some(Outbound::Frame { epoch: queued, .. }) if queued != epoch => {
                    shared.count_dropped();
                }
                Some(Outbound::Frame { frame, .. }) => match framed.send(frame).await {
                    Ok(()) => shared.stats.borrow_mut().frames_sent += 1,
                    Err(err @ (FrameError::PayloadTooLarge { .. }
                    | FrameError::MisalignedPayload { .. }
                    | FrameError::InvalidChannelName(_))) => {
                        warn!(error = %err, "dropping unencodable frame");
                        shared.count_dropped();
                    }
                    Err(err) => return Err(err.into()),
                },
                Some(Outbound::Flush(done)) => {
                    framed.flush().await?;
                    let _ = done.send(());
                }
            },

            _ = tick(&mut ticker) => {
                if let Some(limit) = config.liveness_timeout {
                    let silent = shared
                        .last_inbound
                        .get()
                        .map_or(Duration::ZERO, |at| at.elapsed());
                    if silent > limit {
                        return Err(LinkError::Timeout(limit));
                    }
                }
                ping_seq += 1;
                pending_ping = Some((ping_seq, Instant::now()));
                framed.send(ControlMessage::ping(ping_seq).to_frame(control)?).await?;
            }
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
