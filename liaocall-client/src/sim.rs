/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! In-process loopback implementations of the three external primitives:
//! presence transport, media endpoints and device capture.
//!
//! Everything is delivered synchronously on the calling thread, which makes
//! multi-client scenarios deterministic: two [`crate::CallClient`]s sharing
//! one [`SimNetwork`] go through the same discovery, initiation and stream
//! attach sequence a real deployment does, just without timers. The tests
//! and examples run entirely on this module.
//!
//! Handlers are never invoked while internal state is borrowed, so handler
//! code is free to call back into the network (track presence, place calls,
//! close links).

use crate::connection::{
    EndpointError, EndpointHandlers, LinkHandlers, MediaEndpoint, MediaEndpointProvider, MediaLink,
};
use crate::media::{
    DeviceAccessError, DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, MediaStream,
    MediaTrack, TrackSource,
};
use crate::signaling::{PresenceChannel, PresenceHandlers, PresenceTransport, SignalingError};
use liaocall_types::{BroadcastMessage, CallMetadata, PeerId, PresenceState};
use log::warn;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

// ===========================================================================
// Network
// ===========================================================================

struct SimNetworkInner {
    rooms: HashMap<String, Vec<Rc<SimChannel>>>,
    endpoints: HashMap<PeerId, Rc<SimEndpoint>>,
    hold_acks: bool,
    pending_acks: Vec<Rc<SimChannel>>,
    strip_metadata: bool,
}

/// One shared loopback "backend" for any number of clients.
#[derive(Clone)]
pub struct SimNetwork {
    inner: Rc<RefCell<SimNetworkInner>>,
}

impl SimNetwork {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimNetworkInner {
                rooms: HashMap::new(),
                endpoints: HashMap::new(),
                hold_acks: false,
                pending_acks: Vec::new(),
                strip_metadata: false,
            })),
        }
    }

    /// While held, `subscribe` does not acknowledge; presence tracked in the
    /// meantime must be deferred by the adapter under test.
    pub fn hold_subscription_acks(&self, hold: bool) {
        self.inner.borrow_mut().hold_acks = hold;
    }

    /// Acknowledges every held subscription.
    pub fn release_subscription_acks(&self) {
        let held = {
            let mut inner = self.inner.borrow_mut();
            inner.hold_acks = false;
            std::mem::take(&mut inner.pending_acks)
        };
        for channel in held {
            channel.acknowledge();
        }
    }

    /// Deliver inbound call metadata as `None`, simulating payloads that
    /// failed validation.
    pub fn strip_call_metadata(&self, strip: bool) {
        self.inner.borrow_mut().strip_metadata = strip;
    }

    /// Re-delivers the current membership to every subscriber, as managed
    /// presence backends routinely do.
    pub fn resync_room(&self, room_id: &str) {
        self.fan_out_sync(room_id);
    }

    /// Ungraceful transport loss for one member's channel: no leave is
    /// propagated, the victim just goes stale.
    pub fn drop_channel(&self, room_id: &str, peer: &PeerId, reason: &str) {
        let victim = {
            let mut inner = self.inner.borrow_mut();
            let Some(channels) = inner.rooms.get_mut(room_id) else {
                return;
            };
            let index = channels.iter().position(|c| {
                c.presence
                    .borrow()
                    .as_ref()
                    .map(|p| &p.peer_id == peer)
                    .unwrap_or(false)
            });
            index.map(|i| channels.remove(i))
        };
        if let Some(channel) = victim {
            channel.subscribed.set(false);
            channel.handlers.on_channel_down.emit(reason.to_string());
        }
    }

    /// Marks the link between two peers as failed, delivering a mid-call
    /// error to both sides.
    pub fn fail_link(&self, a: &PeerId, b: &PeerId, reason: &str) {
        let cores = self.cores_between(a, b);
        for core in cores {
            core.open.set(false);
            let handlers = (
                core.caller.handlers.borrow().clone(),
                core.callee.handlers.borrow().clone(),
            );
            if let Some(h) = handlers.0 {
                h.on_error.emit(reason.to_string());
            }
            if let Some(h) = handlers.1 {
                h.on_error.emit(reason.to_string());
            }
        }
    }

    /// Open links between two peers; the tie-break rule makes more than one
    /// a bug.
    pub fn link_count_between(&self, a: &PeerId, b: &PeerId) -> usize {
        self.cores_between(a, b)
            .iter()
            .filter(|core| core.open.get())
            .count()
    }

    fn cores_between(&self, a: &PeerId, b: &PeerId) -> Vec<Rc<SimLinkCore>> {
        let inner = self.inner.borrow();
        let mut cores = Vec::new();
        if let Some(endpoint) = inner.endpoints.get(a) {
            for core in endpoint.links.borrow().iter() {
                let pair = (core.caller.peer.clone(), core.callee.peer.clone());
                if (&pair.0 == a && &pair.1 == b) || (&pair.0 == b && &pair.1 == a) {
                    cores.push(Rc::clone(core));
                }
            }
        }
        cores
    }

    fn fan_out_sync(&self, room_id: &str) {
        let (members, targets) = {
            let inner = self.inner.borrow();
            let Some(channels) = inner.rooms.get(room_id) else {
                return;
            };
            let members: Vec<PresenceState> = channels
                .iter()
                .filter_map(|c| c.presence.borrow().clone())
                .collect();
            let targets: Vec<Rc<SimChannel>> = channels
                .iter()
                .filter(|c| c.subscribed.get())
                .cloned()
                .collect();
            (members, targets)
        };
        for channel in targets {
            if channel.subscribed.get() {
                channel.handlers.on_sync.emit(members.clone());
            }
        }
    }

    fn fan_out_leave(&self, room_id: &str, departed: PeerId) {
        let targets: Vec<Rc<SimChannel>> = {
            let inner = self.inner.borrow();
            match inner.rooms.get(room_id) {
                Some(channels) => channels
                    .iter()
                    .filter(|c| c.subscribed.get())
                    .cloned()
                    .collect(),
                None => return,
            }
        };
        for channel in targets {
            if channel.subscribed.get() {
                channel.handlers.on_leave.emit(vec![departed.clone()]);
            }
        }
    }

    fn fan_out_message(&self, room_id: &str, from: &SimChannel, raw: &str) {
        let targets: Vec<Rc<SimChannel>> = {
            let inner = self.inner.borrow();
            match inner.rooms.get(room_id) {
                Some(channels) => channels
                    .iter()
                    .filter(|c| c.subscribed.get() && !std::ptr::eq(c.as_ref(), from))
                    .cloned()
                    .collect(),
                None => return,
            }
        };
        for channel in targets {
            if !channel.subscribed.get() {
                continue;
            }
            // Receivers fail closed on anything malformed.
            match serde_json::from_str::<BroadcastMessage>(raw) {
                Ok(message) => channel.handlers.on_message.emit(message),
                Err(e) => warn!("dropping malformed broadcast: {e}"),
            }
        }
    }
}

// ===========================================================================
// Presence
// ===========================================================================

struct SimChannel {
    room_id: String,
    network: SimNetwork,
    handlers: PresenceHandlers,
    subscribed: Cell<bool>,
    closed: Cell<bool>,
    presence: RefCell<Option<PresenceState>>,
}

impl SimChannel {
    fn acknowledge(&self) {
        if self.closed.get() {
            return;
        }
        self.subscribed.set(true);
        self.handlers.on_subscribed.emit(());
    }
}

impl PresenceTransport for SimNetwork {
    fn subscribe(
        &self,
        room_id: &str,
        handlers: PresenceHandlers,
    ) -> anyhow::Result<Rc<dyn PresenceChannel>> {
        let channel = Rc::new(SimChannel {
            room_id: room_id.to_string(),
            network: self.clone(),
            handlers,
            subscribed: Cell::new(false),
            closed: Cell::new(false),
            presence: RefCell::new(None),
        });
        let ack_now = {
            let mut inner = self.inner.borrow_mut();
            inner
                .rooms
                .entry(room_id.to_string())
                .or_default()
                .push(Rc::clone(&channel));
            if inner.hold_acks {
                inner.pending_acks.push(Rc::clone(&channel));
                false
            } else {
                true
            }
        };
        if ack_now {
            channel.acknowledge();
        }
        Ok(channel)
    }
}

impl PresenceChannel for SimChannel {
    fn track(&self, state: PresenceState) -> Result<(), SignalingError> {
        if self.closed.get() {
            return Err(SignalingError::ChannelClosed);
        }
        if !self.subscribed.get() {
            return Err(SignalingError::NotSubscribed);
        }
        *self.presence.borrow_mut() = Some(state);
        self.network.fan_out_sync(&self.room_id);
        Ok(())
    }

    fn send(&self, message: BroadcastMessage) -> Result<(), SignalingError> {
        if self.closed.get() {
            return Err(SignalingError::ChannelClosed);
        }
        if !self.subscribed.get() {
            return Err(SignalingError::NotSubscribed);
        }
        // Round-trip through the wire encoding, exactly as a real channel
        // would carry it.
        let raw = serde_json::to_string(&message)
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        self.network.fan_out_message(&self.room_id, self, &raw);
        Ok(())
    }

    fn unsubscribe(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.subscribed.set(false);
        let departed = self.presence.borrow_mut().take();
        {
            let mut inner = self.network.inner.borrow_mut();
            if let Some(channels) = inner.rooms.get_mut(&self.room_id) {
                channels.retain(|c| !std::ptr::eq(c.as_ref(), self));
            }
        }
        if let Some(presence) = departed {
            self.network.fan_out_leave(&self.room_id, presence.peer_id);
            self.network.fan_out_sync(&self.room_id);
        }
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.get() && !self.closed.get()
    }
}

// ===========================================================================
// Endpoints and links
// ===========================================================================

struct LinkSide {
    peer: PeerId,
    handlers: RefCell<Option<LinkHandlers>>,
    stream: RefCell<Option<MediaStream>>,
    stream_delivered: Cell<bool>,
}

impl LinkSide {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            handlers: RefCell::new(None),
            stream: RefCell::new(None),
            stream_delivered: Cell::new(false),
        }
    }
}

struct SimLinkCore {
    caller: LinkSide,
    callee: LinkSide,
    metadata: Option<CallMetadata>,
    open: Cell<bool>,
    video_replacements: Cell<u32>,
}

impl SimLinkCore {
    fn side(&self, side: Side) -> &LinkSide {
        match side {
            Side::Caller => &self.caller,
            Side::Callee => &self.callee,
        }
    }

    // Streams are delivered once per side, as soon as that side has handlers
    // and the opposite side has contributed a stream. Idempotent, so it can
    // be retried from answer() and set_handlers().
    fn try_deliver(&self, side: Side) {
        if !self.open.get() {
            return;
        }
        let receiver = self.side(side);
        if receiver.stream_delivered.get() {
            return;
        }
        let stream = self.side(side.other()).stream.borrow().clone();
        let handlers = receiver.handlers.borrow().clone();
        if let (Some(stream), Some(handlers)) = (stream, handlers) {
            receiver.stream_delivered.set(true);
            handlers.on_stream.emit(stream);
        }
    }

    fn close(&self) {
        if !self.open.replace(false) {
            return;
        }
        let handlers = (
            self.caller.handlers.borrow().clone(),
            self.callee.handlers.borrow().clone(),
        );
        if let Some(h) = handlers.0 {
            h.on_close.emit(());
        }
        if let Some(h) = handlers.1 {
            h.on_close.emit(());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Caller,
    Callee,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Caller => Side::Callee,
            Side::Callee => Side::Caller,
        }
    }
}

struct SimLink {
    core: Rc<SimLinkCore>,
    side: Side,
}

impl MediaLink for SimLink {
    fn remote_peer_id(&self) -> PeerId {
        self.core.side(self.side.other()).peer.clone()
    }

    fn metadata(&self) -> Option<CallMetadata> {
        match self.side {
            // Only the answering side sees caller metadata.
            Side::Callee => self.core.metadata.clone(),
            Side::Caller => None,
        }
    }

    fn answer(&self, stream: MediaStream) {
        if !self.core.open.get() {
            return;
        }
        *self.core.side(self.side).stream.borrow_mut() = Some(stream);
        self.core.try_deliver(self.side);
        self.core.try_deliver(self.side.other());
    }

    fn set_handlers(&self, handlers: LinkHandlers) {
        *self.core.side(self.side).handlers.borrow_mut() = Some(handlers);
        self.core.try_deliver(self.side);
    }

    fn replace_video_track(&self, _track: Option<MediaTrack>) {
        // The shared stream handle already carries the swap; count it so
        // tests can assert the renegotiation-free path was taken.
        self.core
            .video_replacements
            .set(self.core.video_replacements.get() + 1);
    }

    fn close(&self) {
        self.core.close();
    }

    fn is_open(&self) -> bool {
        self.core.open.get()
    }
}

struct SimEndpoint {
    peer_id: PeerId,
    network: SimNetwork,
    handlers: RefCell<EndpointHandlers>,
    links: RefCell<Vec<Rc<SimLinkCore>>>,
    closed: Cell<bool>,
}

impl MediaEndpoint for SimEndpoint {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn set_handlers(&self, handlers: EndpointHandlers) {
        *self.handlers.borrow_mut() = handlers;
    }

    fn call(
        &self,
        remote: &PeerId,
        stream: MediaStream,
        metadata: CallMetadata,
    ) -> Result<Rc<dyn MediaLink>, EndpointError> {
        if self.closed.get() {
            return Err(EndpointError::Closed);
        }
        let (callee, strip) = {
            let inner = self.network.inner.borrow();
            (
                inner.endpoints.get(remote).cloned(),
                inner.strip_metadata,
            )
        };
        let callee = match callee {
            Some(endpoint) if !endpoint.closed.get() => endpoint,
            _ => return Err(EndpointError::PeerUnreachable(remote.clone())),
        };

        let core = Rc::new(SimLinkCore {
            caller: LinkSide::new(self.peer_id.clone()),
            callee: LinkSide::new(remote.clone()),
            metadata: (!strip).then_some(metadata),
            open: Cell::new(true),
            video_replacements: Cell::new(0),
        });
        *core.caller.stream.borrow_mut() = Some(stream);
        self.links.borrow_mut().push(Rc::clone(&core));
        callee.links.borrow_mut().push(Rc::clone(&core));

        let incoming = callee.handlers.borrow().on_incoming.clone();
        incoming.emit(Rc::new(SimLink {
            core: Rc::clone(&core),
            side: Side::Callee,
        }) as Rc<dyn MediaLink>);

        Ok(Rc::new(SimLink {
            core,
            side: Side::Caller,
        }))
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        {
            let mut inner = self.network.inner.borrow_mut();
            inner.endpoints.remove(&self.peer_id);
        }
        let links = std::mem::take(&mut *self.links.borrow_mut());
        for core in links {
            core.close();
        }
    }
}

impl MediaEndpointProvider for SimNetwork {
    fn create_endpoint(&self, local: &PeerId) -> anyhow::Result<Rc<dyn MediaEndpoint>> {
        let endpoint = Rc::new(SimEndpoint {
            peer_id: local.clone(),
            network: self.clone(),
            handlers: RefCell::new(EndpointHandlers::default()),
            links: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        });
        self.inner
            .borrow_mut()
            .endpoints
            .insert(local.clone(), Rc::clone(&endpoint));
        Ok(endpoint)
    }
}

// ===========================================================================
// Devices
// ===========================================================================

struct SimDevicesInner {
    deny_all: RefCell<Option<DeviceAccessError>>,
    deny_video: RefCell<Option<DeviceAccessError>>,
    deny_display: RefCell<Option<DeviceAccessError>>,
}

/// Configurable fake of the device-media primitive.
#[derive(Clone)]
pub struct SimDevices {
    inner: Rc<SimDevicesInner>,
}

impl SimDevices {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SimDevicesInner {
                deny_all: RefCell::new(None),
                deny_video: RefCell::new(None),
                deny_display: RefCell::new(None),
            }),
        }
    }

    /// Every capture request fails with `error`.
    pub fn deny_all(&self, error: DeviceAccessError) {
        *self.inner.deny_all.borrow_mut() = Some(error);
    }

    /// Requests including video fail with `error`; audio-only succeeds.
    pub fn deny_video(&self, error: DeviceAccessError) {
        *self.inner.deny_video.borrow_mut() = Some(error);
    }

    /// Display capture fails with `error`.
    pub fn deny_display(&self, error: DeviceAccessError) {
        *self.inner.deny_display.borrow_mut() = Some(error);
    }

    pub fn allow_all(&self) {
        *self.inner.deny_all.borrow_mut() = None;
        *self.inner.deny_video.borrow_mut() = None;
        *self.inner.deny_display.borrow_mut() = None;
    }
}

impl MediaDevices for SimDevices {
    fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, DeviceAccessError> {
        if let Some(error) = self.inner.deny_all.borrow().clone() {
            return Err(error);
        }
        if constraints.video {
            if let Some(error) = self.inner.deny_video.borrow().clone() {
                return Err(error);
            }
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackSource::Microphone));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackSource::Camera));
        }
        Ok(MediaStream::with_tracks(tracks))
    }

    fn get_display_media(&self) -> Result<MediaStream, DeviceAccessError> {
        if let Some(error) = self.inner.deny_all.borrow().clone() {
            return Err(error);
        }
        if let Some(error) = self.inner.deny_display.borrow().clone() {
            return Err(error);
        }
        Ok(MediaStream::with_tracks(vec![MediaTrack::new(
            TrackSource::Screen,
        )]))
    }

    fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                device_id: "sim-mic-0".to_string(),
                kind: DeviceKind::AudioInput,
                label: "Simulated Microphone".to_string(),
            },
            DeviceInfo {
                device_id: "sim-cam-0".to_string(),
                kind: DeviceKind::VideoInput,
                label: "Simulated Camera".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liaocall_types::{Callback, PeerProfile, UserId};
    use std::cell::RefCell;

    fn metadata(user: &str) -> CallMetadata {
        CallMetadata::new(UserId::from(user), PeerProfile::new(user, user, ""))
    }

    #[test]
    fn calling_an_unknown_peer_is_unreachable() {
        let network = SimNetwork::new();
        let endpoint = network.create_endpoint(&PeerId::from("a1")).unwrap();
        let result = endpoint.call(&PeerId::from("ghost"), MediaStream::empty(), metadata("a"));
        assert!(matches!(
            result,
            Err(EndpointError::PeerUnreachable(p)) if p == PeerId::from("ghost")
        ));
    }

    #[test]
    fn streams_replay_to_late_handlers() {
        let network = SimNetwork::new();
        let a = network.create_endpoint(&PeerId::from("a1")).unwrap();
        let b = network.create_endpoint(&PeerId::from("b2")).unwrap();

        let inbound: Rc<RefCell<Option<Rc<dyn MediaLink>>>> = Rc::new(RefCell::new(None));
        let sink = inbound.clone();
        a.set_handlers(EndpointHandlers {
            on_incoming: Callback::from(move |link| *sink.borrow_mut() = Some(link)),
            on_error: Callback::noop(),
        });

        let outbound = b
            .call(&PeerId::from("a1"), MediaStream::empty(), metadata("b"))
            .unwrap();
        let inbound = inbound.borrow().clone().unwrap();
        assert_eq!(inbound.metadata().unwrap().user_id, UserId::from("b"));

        // Answer before the caller attached handlers.
        inbound.answer(MediaStream::empty());

        let got = Rc::new(RefCell::new(Vec::new()));
        let sink = got.clone();
        outbound.set_handlers(LinkHandlers {
            on_stream: Callback::from(move |s| sink.borrow_mut().push(s)),
            on_close: Callback::noop(),
            on_error: Callback::noop(),
        });
        assert_eq!(got.borrow().len(), 1);
    }

    #[test]
    fn close_reaches_both_sides_once() {
        let network = SimNetwork::new();
        let a = network.create_endpoint(&PeerId::from("a1")).unwrap();
        let b = network.create_endpoint(&PeerId::from("b2")).unwrap();

        let closes = Rc::new(Cell::new(0));
        let sink = closes.clone();
        a.set_handlers(EndpointHandlers {
            on_incoming: Callback::from(move |link: Rc<dyn MediaLink>| {
                let sink = sink.clone();
                link.set_handlers(LinkHandlers {
                    on_stream: Callback::noop(),
                    on_close: Callback::from(move |_| sink.set(sink.get() + 1)),
                    on_error: Callback::noop(),
                });
                link.answer(MediaStream::empty());
            }),
            on_error: Callback::noop(),
        });

        let outbound = b
            .call(&PeerId::from("a1"), MediaStream::empty(), metadata("b"))
            .unwrap();
        outbound.close();
        outbound.close();
        assert_eq!(closes.get(), 1);
        assert!(!outbound.is_open());
        assert_eq!(
            network.link_count_between(&PeerId::from("a1"), &PeerId::from("b2")),
            0
        );
    }
}
