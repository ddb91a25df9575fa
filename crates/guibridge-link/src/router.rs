//! Channel multiplexing over a single device connection.
//!
//! Channels are bound on a [`RouterBuilder`] and get a fixed offset in bind
//! order. After [`RouterBuilder::build`] the set of channels cannot change.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use guibridge_frame::{validate_channel_name, Discarded, ElementType, Frame, Samples, TypeTag};
use tracing::debug;

use crate::control::ControlMessage;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{LinkError, Result};
use crate::registry::{BufferRegistry, WriteOutcome, MAX_BUFFER_INDEX};

/// Channels one router can carry.
pub const MAX_CHANNELS: usize = 256;

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Token for a bound channel. Only valid with the router that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    router: u64,
    offset: u8,
    name: Arc<str>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the channel in bind order.
    pub fn offset(&self) -> u8 {
        self.offset
    }
}

/// Collects channel bindings before the router is sealed.
#[derive(Debug)]
pub struct RouterBuilder {
    id: u64,
    handles: Vec<ChannelHandle>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            id: NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed),
            handles: Vec::new(),
        }
    }

    /// Bind `name` to the next free offset.
    pub fn bind(&mut self, name: &str) -> Result<ChannelHandle> {
        validate_channel_name(name)?;
        if self.handles.iter().any(|h| h.name() == name) {
            return Err(LinkError::DuplicateChannel(name.to_string()));
        }
        let offset = u8::try_from(self.handles.len()).map_err(|_| {
            LinkError::InvalidConfig(format!("at most {MAX_CHANNELS} channels can be bound"))
        })?;

        let handle = ChannelHandle {
            router: self.id,
            offset,
            name: Arc::from(name),
        };
        self.handles.push(handle.clone());
        Ok(handle)
    }

    pub fn build(self) -> ChannelRouter {
        let routes = self
            .handles
            .into_iter()
            .map(|handle| Route {
                handle,
                registry: BufferRegistry::new(),
                outbound: RefCell::new(HashMap::new()),
            })
            .collect();
        ChannelRouter {
            id: self.id,
            routes,
            diagnostics: Diagnostics::new(),
        }
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Route {
    handle: ChannelHandle,
    registry: BufferRegistry,
    // Outbound types are tracked behind a shared borrow so sends work while
    // a buffer view is held.
    outbound: RefCell<HashMap<u32, ElementType>>,
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Samples stored in the channel registry.
    Stored {
        channel: ChannelHandle,
        index: u32,
        outcome: WriteOutcome,
    },
    /// A JSON control event for the consumer.
    Event {
        channel: ChannelHandle,
        message: ControlMessage,
    },
    Discarded(DiagnosticKind),
}

/// Sealed set of channels with their registries.
#[derive(Debug)]
pub struct ChannelRouter {
    id: u64,
    routes: Vec<Route>,
    diagnostics: Diagnostics,
}

impl ChannelRouter {
    /// Build the outbound frame for `samples` at `index` on `handle`.
    ///
    /// The first send on an index fixes its outbound element type.
    pub fn route_outbound(
        &self,
        handle: &ChannelHandle,
        index: u32,
        samples: &Samples,
    ) -> Result<Frame> {
        if index >= MAX_BUFFER_INDEX {
            return Err(LinkError::IndexOutOfRange {
                index,
                max: MAX_BUFFER_INDEX - 1,
            });
        }
        let route = self.route(handle)?;
        let got = samples.element_type();
        let mut outbound = route.outbound.borrow_mut();
        match outbound.get(&index) {
            Some(&expected) if expected != got => {
                return Err(LinkError::TypeMismatch {
                    index,
                    expected,
                    got,
                });
            }
            Some(_) => {}
            None => {
                outbound.insert(index, got);
            }
        }
        Ok(Frame::from_samples(handle.name(), index, samples))
    }

    /// Deliver an inbound frame to its channel registry.
    ///
    /// Frames for unbound channels, with a type that conflicts with the
    /// stored one, or with an undecodable payload are discarded and recorded.
    pub fn dispatch(&mut self, frame: Frame) -> Dispatch {
        let Some(pos) = self
            .routes
            .iter()
            .position(|route| *route.handle.name == frame.channel)
        else {
            return self.discard(
                DiagnosticKind::UnboundChannel,
                &frame.channel,
                frame.index,
                "no channel bound under this name",
            );
        };

        if frame.tag == TypeTag::Json {
            return match ControlMessage::from_frame(&frame) {
                Some(Ok(message)) => Dispatch::Event {
                    channel: self.routes[pos].handle.clone(),
                    message,
                },
                Some(Err(err)) => self.discard(
                    DiagnosticKind::Malformed,
                    &frame.channel,
                    frame.index,
                    err.to_string(),
                ),
                None => self.discard(
                    DiagnosticKind::Malformed,
                    &frame.channel,
                    frame.index,
                    "json tag without json payload",
                ),
            };
        }

        let samples = match frame.samples() {
            Ok(samples) => samples,
            Err(err) => {
                return self.discard(
                    DiagnosticKind::Malformed,
                    &frame.channel,
                    frame.index,
                    err.to_string(),
                );
            }
        };

        let route = &mut self.routes[pos];
        match route.registry.write(frame.index, samples) {
            Ok(outcome) => {
                if let WriteOutcome::Trimmed { from, to } = outcome {
                    self.diagnostics.record(
                        DiagnosticKind::Trimmed,
                        &frame.channel,
                        frame.index,
                        format!("{from} elements exceed capacity {to}"),
                    );
                }
                debug!(channel = %frame.channel, index = frame.index, "stored inbound buffer");
                Dispatch::Stored {
                    channel: self.routes[pos].handle.clone(),
                    index: frame.index,
                    outcome,
                }
            }
            Err(err @ LinkError::TypeMismatch { .. }) => self.discard(
                DiagnosticKind::TypeMismatch,
                &frame.channel,
                frame.index,
                err.to_string(),
            ),
            Err(err) => self.discard(
                DiagnosticKind::IndexOutOfRange,
                &frame.channel,
                frame.index,
                err.to_string(),
            ),
        }
    }

    /// Record a frame the codec could not accept.
    pub fn record_malformed(&mut self, discarded: &Discarded) {
        self.diagnostics.record(
            DiagnosticKind::Malformed,
            &discarded.channel,
            discarded.index,
            discarded.error.to_string(),
        );
    }

    pub fn registry(&self, handle: &ChannelHandle) -> Option<&BufferRegistry> {
        self.route(handle).ok().map(|route| &route.registry)
    }

    pub fn registry_mut(&mut self, handle: &ChannelHandle) -> Option<&mut BufferRegistry> {
        self.route_mut(handle).ok().map(|route| &mut route.registry)
    }

    /// Forget both the stored value and the outbound type of `index`.
    pub fn reset(&mut self, handle: &ChannelHandle, index: u32) -> Result<()> {
        let route = self.route_mut(handle)?;
        route.registry.reset(index);
        route.outbound.get_mut().remove(&index);
        Ok(())
    }

    /// Look up a bound channel by name.
    pub fn handle(&self, name: &str) -> Option<&ChannelHandle> {
        self.routes
            .iter()
            .map(|route| &route.handle)
            .find(|handle| handle.name() == name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelHandle> + '_ {
        self.routes.iter().map(|route| &route.handle)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn discard(
        &mut self,
        kind: DiagnosticKind,
        channel: &str,
        index: u32,
        detail: impl Into<String>,
    ) -> Dispatch {
        self.diagnostics.record(kind, channel, index, detail);
        Dispatch::Discarded(kind)
    }

    fn route(&self, handle: &ChannelHandle) -> Result<&Route> {
        self.routes
            .get(handle.offset as usize)
            .filter(|route| handle.router == self.id && route.handle == *handle)
            .ok_or_else(|| LinkError::UnboundChannel(handle.name().to_string()))
    }

    fn route_mut(&mut self, handle: &ChannelHandle) -> Result<&mut Route> {
        let id = self.id;
        self.routes
            .get_mut(handle.offset as usize)
            .filter(|route| handle.router == id && route.handle == *handle)
            .ok_or_else(|| LinkError::UnboundChannel(handle.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use guibridge_frame::{FrameError, CONTROL, DATA};

    use super::*;

    fn gui_router() -> (ChannelRouter, ChannelHandle, ChannelHandle) {
        let mut builder = RouterBuilder::new();
        let data = builder.bind(DATA).unwrap();
        let control = builder.bind(CONTROL).unwrap();
        (builder.build(), data, control)
    }

    #[test]
    fn offsets_follow_bind_order() {
        let (router, data, control) = gui_router();
        assert_eq!(data.offset(), 0);
        assert_eq!(control.offset(), 1);
        assert_eq!(router.handle(CONTROL), Some(&control));
        assert_eq!(router.channels().count(), 2);
    }

    #[test]
    fn duplicate_and_invalid_names_rejected() {
        let mut builder = RouterBuilder::new();
        builder.bind(DATA).unwrap();
        assert!(matches!(
            builder.bind(DATA),
            Err(LinkError::DuplicateChannel(_))
        ));
        assert!(matches!(
            builder.bind("has space"),
            Err(LinkError::Frame(FrameError::InvalidChannelName(_)))
        ));
    }

    #[test]
    fn outbound_frame_carries_channel_and_index() {
        let (router, data, _) = gui_router();
        let samples = Samples::Float32(vec![0.6, 0.5, 1.0]);
        let frame = router.route_outbound(&data, 0, &samples).unwrap();
        assert_eq!(frame.channel, DATA);
        assert_eq!(frame.index, 0);
        assert_eq!(frame.tag, TypeTag::Float32);
        assert_eq!(frame.samples().unwrap(), samples);
    }

    #[test]
    fn outbound_type_is_fixed_per_index() {
        let (mut router, data, control) = gui_router();
        router
            .route_outbound(&data, 1, &Samples::Float32(vec![1.0]))
            .unwrap();
        let err = router
            .route_outbound(&data, 1, &Samples::Int32(vec![1]))
            .unwrap_err();
        assert!(matches!(err, LinkError::TypeMismatch { index: 1, .. }));

        // Same index on another channel is independent.
        assert!(router
            .route_outbound(&control, 1, &Samples::Int32(vec![1]))
            .is_ok());

        router.reset(&data, 1).unwrap();
        assert!(router
            .route_outbound(&data, 1, &Samples::Int32(vec![1]))
            .is_ok());
    }

    #[test]
    fn inbound_value_is_readable_right_after_dispatch() {
        let (mut router, data, _) = gui_router();
        let frame = Frame::from_samples(DATA, 0, &Samples::Int32(vec![3]));

        let dispatch = router.dispatch(frame);
        assert!(matches!(dispatch, Dispatch::Stored { index: 0, .. }));

        let registry = router.registry(&data).unwrap();
        assert_eq!(registry.peek_all().scalar(0), 3.0);
        assert_eq!(registry[0], Some(Samples::Int32(vec![3])));
    }

    #[test]
    fn unbound_channel_is_discarded_with_diagnostic() {
        let (mut router, data, control) = gui_router();
        let frame = Frame::from_samples("scope_data", 0, &Samples::Int32(vec![3]));

        assert_eq!(
            router.dispatch(frame),
            Dispatch::Discarded(DiagnosticKind::UnboundChannel)
        );
        assert!(router.registry(&data).unwrap().is_empty());
        assert!(router.registry(&control).unwrap().is_empty());
        assert_eq!(router.diagnostics().count(DiagnosticKind::UnboundChannel), 1);
        assert_eq!(
            router.diagnostics().last().map(|d| d.channel.as_str()),
            Some("scope_data")
        );
    }

    #[test]
    fn inbound_type_change_is_discarded() {
        let (mut router, data, _) = gui_router();
        router.dispatch(Frame::from_samples(DATA, 0, &Samples::Float32(vec![0.5])));
        let dispatch = router.dispatch(Frame::from_samples(DATA, 0, &Samples::Int32(vec![1])));

        assert_eq!(dispatch, Dispatch::Discarded(DiagnosticKind::TypeMismatch));
        assert_eq!(
            router.registry(&data).unwrap().read_latest(0),
            Some(&Samples::Float32(vec![0.5]))
        );
    }

    #[test]
    fn trimmed_writes_are_stored_and_reported() {
        let (mut router, data, _) = gui_router();
        router
            .registry_mut(&data)
            .unwrap()
            .declare(0, ElementType::Char, Some(2))
            .unwrap();

        let frame = Frame::from_samples(DATA, 0, &Samples::Char(b"abcd".to_vec()));
        let dispatch = router.dispatch(frame);
        assert!(matches!(
            dispatch,
            Dispatch::Stored {
                outcome: WriteOutcome::Trimmed { from: 4, to: 2 },
                ..
            }
        ));
        assert_eq!(router.diagnostics().count(DiagnosticKind::Trimmed), 1);
    }

    #[test]
    fn index_out_of_range_is_discarded() {
        let (mut router, _, _) = gui_router();
        let dispatch = router.dispatch(Frame::from_samples(
            DATA,
            MAX_BUFFER_INDEX,
            &Samples::Int32(vec![1]),
        ));
        assert_eq!(
            dispatch,
            Dispatch::Discarded(DiagnosticKind::IndexOutOfRange)
        );
    }

    #[test]
    fn json_frames_become_events() {
        let (mut router, _, control) = gui_router();
        let payload = br#"{"event":"param","payload":{"gain":0.5}}"#;
        let frame = Frame::new(CONTROL, 0, TypeTag::Json, &payload[..]);

        match router.dispatch(frame) {
            Dispatch::Event { channel, message } => {
                assert_eq!(channel, control);
                assert_eq!(message.event, "param");
            }
            other => panic!("expected event, got {other:?}"),
        }

        let bad = Frame::new(CONTROL, 0, TypeTag::Json, &b"{oops"[..]);
        assert_eq!(
            router.dispatch(bad),
            Dispatch::Discarded(DiagnosticKind::Malformed)
        );
    }

    #[test]
    fn handles_from_another_router_are_rejected() {
        let (router, _, _) = gui_router();
        let (_, foreign, _) = gui_router();
        assert!(router.registry(&foreign).is_none());
        assert!(matches!(
            router.route_outbound(&foreign, 0, &Samples::Int32(vec![1])),
            Err(LinkError::UnboundChannel(_))
        ));
    }
}
