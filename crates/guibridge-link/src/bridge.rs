//! The consumer-facing bridge.
//!
//! # Example
//!
//! ```no_run
//! use guibridge_link::{Bridge, BridgeConfig, ElementType, LinkError};
//!
//! # async fn demo() -> Result<(), LinkError> {
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let bridge = Bridge::connect(BridgeConfig::for_host("192.168.7.2"))?;
//!         bridge.wait_open().await?;
//!
//!         bridge.send_buffer(0, ElementType::Float32, &[0.6, 0.5, 1.0]);
//!         bridge.updated().await;
//!         println!("level = {}", bridge.buffers().scalar(0));
//!         Ok::<(), LinkError>(())
//!     })
//!     .await
//! # }
//! ```

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::pin::pin;
use std::rc::Rc;

use guibridge_frame::{Decoded, ElementType, Samples};
use guibridge_transport::{Connector, TcpConnector};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::control::ControlMessage;
use crate::diagnostics::Diagnostics;
use crate::error::{LinkError, Result};
use crate::handshake::HandshakeResult;
use crate::registry::{BufferRegistry, BuffersView};
use crate::router::{ChannelHandle, ChannelRouter, Dispatch, RouterBuilder};
use crate::session::{SendStatus, Session, SessionState, SessionStats};

/// Control events kept for [`Bridge::take_events`].
const EVENT_BACKLOG: usize = 64;

/// Inbound frames parked while a [`Buffers`] view is held.
const PENDING_LIMIT: usize = 256;

/// Live view over a channel's buffers.
///
/// Frames that arrive while a view is held are parked and applied on the
/// next bridge call once every view is dropped. Drop it before awaiting.
pub type Buffers<'a> = BuffersView<Ref<'a, BufferRegistry>>;

/// Traffic counters for a [`Bridge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeStats {
    pub session: SessionStats,
    /// Inbound frames parked because a [`Buffers`] view was held.
    pub inbound_deferred: u64,
    /// Parked frames dropped because too many were waiting.
    pub inbound_overflow: u64,
    /// Inbound frames discarded by routing.
    pub discarded: u64,
}

struct Inbound {
    router: RefCell<ChannelRouter>,
    updated: Notify,
    events: RefCell<VecDeque<ControlMessage>>,
    pending: RefCell<VecDeque<Decoded>>,
    deferred: Cell<u64>,
    overflow: Cell<u64>,
}

impl Inbound {
    fn receive(&self, decoded: Decoded) {
        {
            let mut pending = self.pending.borrow_mut();
            if pending.len() == PENDING_LIMIT {
                pending.pop_front();
                self.overflow.set(self.overflow.get() + 1);
                warn!(limit = PENDING_LIMIT, "too many parked inbound frames, dropping oldest");
            }
            pending.push_back(decoded);
        }
        if !self.settle() {
            self.deferred.set(self.deferred.get() + 1);
            debug!("buffer view held during delivery, parking inbound frame");
        }
    }

    /// Apply parked frames. Returns false if a view still holds the router.
    fn settle(&self) -> bool {
        let Ok(mut router) = self.router.try_borrow_mut() else {
            return false;
        };
        let mut stored = false;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(decoded) = next else {
                break;
            };
            stored |= self.apply(&mut router, decoded);
        }
        drop(router);
        if stored {
            self.updated.notify_waiters();
        }
        true
    }

    /// Route one frame. Returns true if a buffer was stored.
    fn apply(&self, router: &mut ChannelRouter, decoded: Decoded) -> bool {
        let frame = match decoded {
            Decoded::Valid(frame) => frame,
            Decoded::Discarded(discarded) => {
                router.record_malformed(&discarded);
                return false;
            }
        };

        match router.dispatch(frame) {
            Dispatch::Stored { .. } => true,
            Dispatch::Event { channel, message } => {
                debug!(channel = channel.name(), event = %message.event, "control event");
                let mut events = self.events.borrow_mut();
                if events.len() == EVENT_BACKLOG {
                    events.pop_front();
                }
                events.push_back(message);
                false
            }
            Dispatch::Discarded(_) => false,
        }
    }

    fn router_mut(&self) -> Result<RefMut<'_, ChannelRouter>> {
        self.settle();
        self.router.try_borrow_mut().map_err(|_| LinkError::Busy)
    }
}

/// Bidirectional buffer exchange with one device.
///
/// Construction returns immediately; the connection is made in the
/// background on the current [`tokio::task::LocalSet`]. Sends are
/// fire-and-forget and reads return the latest value received.
pub struct Bridge {
    config: BridgeConfig,
    session: Session,
    inbound: Rc<Inbound>,
    data: ChannelHandle,
    control: ChannelHandle,
}

impl Bridge {
    /// Connect over TCP to `config.host:config.port`.
    pub fn connect(config: BridgeConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.connect_timeout);
        Self::with_connector(config, connector)
    }

    /// Connect through an explicit transport.
    pub fn with_connector<C>(config: BridgeConfig, connector: C) -> Result<Self>
    where
        C: Connector + 'static,
    {
        config.validate()?;

        let mut builder = RouterBuilder::new();
        let data = builder.bind(&config.data_channel())?;
        let control = builder.bind(&config.control_channel())?;

        let inbound = Rc::new(Inbound {
            router: RefCell::new(builder.build()),
            updated: Notify::new(),
            events: RefCell::new(VecDeque::new()),
            pending: RefCell::new(VecDeque::new()),
            deferred: Cell::new(0),
            overflow: Cell::new(0),
        });

        let session = Session::open(connector, config.device_addr(), config.clone());
        let sink = Rc::clone(&inbound);
        session.on_message(move |decoded| sink.receive(decoded));

        Ok(Self {
            config,
            session,
            inbound,
            data,
            control,
        })
    }

    /// Send `values` as buffer `index` on the data channel.
    ///
    /// Values are coerced to `element` first. The first send on an index
    /// fixes its type; later sends with another type are rejected.
    pub fn send_buffer(&self, index: u32, element: ElementType, values: &[f64]) -> SendStatus {
        self.send_samples(index, &Samples::coerce(element, values))
    }

    /// Send already-typed samples on the data channel.
    pub fn send_samples(&self, index: u32, samples: &Samples) -> SendStatus {
        self.send_on(&self.data, index, samples)
    }

    /// Send `values` as buffer `index` on the control channel.
    pub fn send_control(&self, index: u32, element: ElementType, values: &[f64]) -> SendStatus {
        self.send_on(&self.control, index, &Samples::coerce(element, values))
    }

    fn send_on(&self, channel: &ChannelHandle, index: u32, samples: &Samples) -> SendStatus {
        if self.session.state() == SessionState::Closed {
            return SendStatus::Closed;
        }
        if samples.byte_len() > self.config.max_payload_size {
            warn!(
                channel = channel.name(),
                index,
                size = samples.byte_len(),
                max = self.config.max_payload_size,
                "buffer too large to send"
            );
            return SendStatus::Rejected;
        }

        let routed = match self.inbound.router.try_borrow() {
            Ok(router) => router.route_outbound(channel, index, samples),
            Err(_) => {
                warn!("router busy during send");
                return SendStatus::Rejected;
            }
        };
        match routed {
            Ok(frame) => self.session.send(frame),
            Err(err) => {
                warn!(channel = channel.name(), index, error = %err, "send rejected");
                SendStatus::Rejected
            }
        }
    }

    /// Live view of the data channel: `bridge.buffers()[i]`.
    pub fn buffers(&self) -> Buffers<'_> {
        self.view(&self.data)
    }

    /// Live view of the control channel.
    pub fn control_buffers(&self) -> Buffers<'_> {
        self.view(&self.control)
    }

    fn view(&self, channel: &ChannelHandle) -> Buffers<'_> {
        self.inbound.settle();
        let router = self.inbound.router.borrow();
        BuffersView::new(Ref::map(router, |router| {
            router
                .registry(channel)
                .unwrap_or(BufferRegistry::empty())
        }))
    }

    /// Copy of the latest value of data buffer `index`.
    pub fn read_latest(&self, index: u32) -> Option<Samples> {
        self.inbound.settle();
        let router = self.inbound.router.borrow();
        router.registry(&self.data)?.read_latest(index).cloned()
    }

    /// Fix the type and maximum length of inbound data buffer `index`.
    ///
    /// Fails with [`LinkError::Busy`] while a [`Buffers`] view is held.
    pub fn declare_buffer(
        &self,
        index: u32,
        element: ElementType,
        capacity: Option<usize>,
    ) -> Result<()> {
        let mut router = self.inbound.router_mut()?;
        match router.registry_mut(&self.data) {
            Some(registry) => registry.declare(index, element, capacity),
            None => Ok(()),
        }
    }

    /// Forget data buffer `index` in both directions so it can change type.
    ///
    /// Fails with [`LinkError::Busy`] while a [`Buffers`] view is held.
    pub fn reset_buffer(&self, index: u32) -> Result<()> {
        self.inbound.router_mut()?.reset(&self.data, index)
    }

    /// Control events received from the device, oldest first.
    pub fn take_events(&self) -> Vec<ControlMessage> {
        self.inbound.events.borrow_mut().drain(..).collect()
    }

    /// Resolves after the next inbound buffer is stored.
    ///
    /// Frames parked while a view was held count as new.
    pub async fn updated(&self) {
        let mut notified = pin!(self.inbound.updated.notified());
        notified.as_mut().enable();
        self.inbound.settle();
        notified.await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// See [`Session::wait_open`].
    pub async fn wait_open(&self) -> Result<()> {
        self.session.wait_open().await
    }

    pub fn handshake(&self) -> Option<HandshakeResult> {
        self.session.handshake()
    }

    pub fn stats(&self) -> BridgeStats {
        self.inbound.settle();
        BridgeStats {
            session: self.session.stats(),
            inbound_deferred: self.inbound.deferred.get(),
            inbound_overflow: self.inbound.overflow.get(),
            discarded: self.inbound.router.borrow().diagnostics().total(),
        }
    }

    /// Snapshot of routing diagnostics.
    pub fn diagnostics(&self) -> Diagnostics {
        self.inbound.settle();
        self.inbound.router.borrow().diagnostics().clone()
    }

    pub fn take_failure(&self) -> Option<LinkError> {
        self.session.take_failure()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Data channel handle.
    pub fn data_channel(&self) -> &ChannelHandle {
        &self.data
    }

    /// Control channel handle.
    pub fn control_channel(&self) -> &ChannelHandle {
        &self.control
    }

    /// Tear down immediately. Queued frames are dropped.
    pub fn close(&self) {
        self.session.close();
    }

    /// Write out queued frames, then tear down.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("addr", &self.config.device_addr().to_string())
            .field("state", &self.state())
            .field("data", &self.data.name())
            .field("control", &self.control.name())
            .finish()
    }
}
