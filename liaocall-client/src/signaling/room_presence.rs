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

//! Bridges the raw presence channel to room membership events.
//!
//! The adapter owns three concerns the raw channel does not: deferring the
//! local announce until the subscription is acknowledged (tracking earlier
//! silently loses the announce), collapsing overlapping `sync` deliveries
//! into exactly one `member_discovered` per peer, and fanning out departures.

use super::channel::{PresenceChannel, PresenceHandlers, PresenceTransport, SignalingError};
use liaocall_types::{
    BroadcastMessage, Callback, MediaStateBroadcast, MediaStateFlags, PeerId, PresenceState,
};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

pub struct RoomPresenceOptions {
    pub room_id: String,

    /// The local presence tuple to announce.
    pub local: PresenceState,

    /// Called exactly once per distinct remote peer id observed in the room.
    pub on_member_discovered: Callback<PresenceState>,

    /// Called once per departing presence key.
    pub on_member_left: Callback<PeerId>,

    /// In-band broadcasts from other members.
    pub on_message: Callback<BroadcastMessage>,

    /// The transport lost the channel; membership is frozen until the caller
    /// rejoins.
    pub on_channel_down: Callback<String>,
}

struct PresenceInner {
    local: PresenceState,
    known: HashSet<PeerId>,
    subscribed: bool,
    announced: bool,
    channel: Option<Rc<dyn PresenceChannel>>,
    on_member_discovered: Callback<PresenceState>,
    on_member_left: Callback<PeerId>,
}

/// Room membership adapter over one presence channel subscription.
pub struct RoomPresence {
    room_id: String,
    inner: Rc<RefCell<PresenceInner>>,
}

impl RoomPresence {
    pub fn join(
        transport: &dyn PresenceTransport,
        options: RoomPresenceOptions,
    ) -> anyhow::Result<Self> {
        let inner = Rc::new(RefCell::new(PresenceInner {
            local: options.local,
            known: HashSet::new(),
            subscribed: false,
            announced: false,
            channel: None,
            on_member_discovered: options.on_member_discovered,
            on_member_left: options.on_member_left,
        }));

        let handlers = PresenceHandlers {
            on_subscribed: Callback::from({
                let inner = Rc::downgrade(&inner);
                move |_| {
                    if let Some(inner) = inner.upgrade() {
                        inner.borrow_mut().subscribed = true;
                        Self::announce_if_ready(&inner);
                    }
                }
            }),
            on_sync: Callback::from({
                let inner = Rc::downgrade(&inner);
                move |members| Self::handle_sync(&inner, members)
            }),
            on_leave: Callback::from({
                let inner = Rc::downgrade(&inner);
                move |departed| Self::handle_leave(&inner, departed)
            }),
            on_message: options.on_message,
            on_channel_down: Callback::from({
                let inner = Rc::downgrade(&inner);
                let on_channel_down = options.on_channel_down;
                move |reason: String| {
                    if let Some(inner) = inner.upgrade() {
                        let mut inner = inner.borrow_mut();
                        inner.subscribed = false;
                        inner.announced = false;
                    }
                    on_channel_down.emit(reason);
                }
            }),
        };

        let channel = transport.subscribe(&options.room_id, handlers)?;
        inner.borrow_mut().channel = Some(channel);
        Self::announce_if_ready(&inner);

        Ok(Self {
            room_id: options.room_id,
            inner,
        })
    }

    // Announce is deferred until both the channel handle is stored and the
    // subscription is acknowledged, whichever happens last.
    fn announce_if_ready(inner: &Rc<RefCell<PresenceInner>>) {
        let (channel, local) = {
            let inner = inner.borrow();
            if !inner.subscribed || inner.announced {
                return;
            }
            match &inner.channel {
                Some(channel) => (Rc::clone(channel), inner.local.clone()),
                None => return,
            }
        };
        // Not holding the borrow here: tracking fans sync events straight
        // back into our own handlers.
        match channel.track(local) {
            Ok(()) => {
                inner.borrow_mut().announced = true;
                debug!("presence announced");
            }
            Err(SignalingError::NotSubscribed) => {
                debug!("presence announce deferred until subscription ack");
            }
            Err(e) => warn!("presence announce failed: {e}"),
        }
    }

    fn handle_sync(inner: &Weak<RefCell<PresenceInner>>, members: Vec<PresenceState>) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let (discovered, callback) = {
            let mut inner = inner.borrow_mut();
            let local_peer = inner.local.peer_id.clone();
            let local_user = inner.local.user_id.clone();
            let mut fresh = Vec::new();
            for member in members {
                // Only a member matching on both identities is our own echo.
                // A foreign member presenting our peer id is an id collision
                // and must reach the connection manager to be rejected.
                if member.peer_id == local_peer && member.user_id == local_user {
                    continue;
                }
                if inner.known.insert(member.peer_id.clone()) {
                    fresh.push(member);
                }
            }
            (fresh, inner.on_member_discovered.clone())
        };
        for member in discovered {
            debug!("member discovered: {}", member.peer_id);
            callback.emit(member);
        }
    }

    fn handle_leave(inner: &Weak<RefCell<PresenceInner>>, departed: Vec<PeerId>) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let (gone, callback) = {
            let mut inner = inner.borrow_mut();
            let gone: Vec<PeerId> = departed
                .into_iter()
                .filter(|peer| inner.known.remove(peer))
                .collect();
            (gone, inner.on_member_left.clone())
        };
        for peer in gone {
            debug!("member left: {peer}");
            callback.emit(peer);
        }
    }

    /// Re-announces presence with updated media flags and broadcasts them to
    /// current members. Both legs are best effort.
    pub fn broadcast_state(&self, flags: MediaStateFlags) {
        let (channel, local) = {
            let mut inner = self.inner.borrow_mut();
            inner.local.media = flags;
            (inner.channel.clone(), inner.local.clone())
        };
        let Some(channel) = channel else {
            return;
        };
        if let Err(e) = channel.track(local.clone()) {
            warn!("presence re-announce failed: {e}");
        }
        let broadcast = BroadcastMessage::MediaState(MediaStateBroadcast::new(
            local.peer_id.clone(),
            flags,
        ));
        if let Err(e) = channel.send(broadcast) {
            warn!("media state broadcast failed: {e}");
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.borrow().local.peer_id.clone()
    }

    pub fn known_members(&self) -> Vec<PeerId> {
        self.inner.borrow().known.iter().cloned().collect()
    }

    pub fn is_announced(&self) -> bool {
        self.inner.borrow().announced
    }

    /// Drops the presence entry and the subscription. Membership callbacks
    /// stop firing once this returns.
    pub fn leave(&self) {
        let channel = {
            let mut inner = self.inner.borrow_mut();
            inner.known.clear();
            inner.subscribed = false;
            inner.announced = false;
            inner.channel.take()
        };
        if let Some(channel) = channel {
            channel.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;
    use liaocall_types::{PeerProfile, UserId};
    use std::cell::RefCell;

    fn presence(peer: &str, user: &str) -> PresenceState {
        PresenceState {
            peer_id: PeerId::from(peer),
            user_id: UserId::from(user),
            profile: PeerProfile::new(user, user, ""),
            media: MediaStateFlags::default(),
        }
    }

    struct Harness {
        room: RoomPresence,
        discovered: Rc<RefCell<Vec<PeerId>>>,
        left: Rc<RefCell<Vec<PeerId>>>,
    }

    fn join(network: &SimNetwork, peer: &str) -> Harness {
        let discovered = Rc::new(RefCell::new(Vec::new()));
        let left = Rc::new(RefCell::new(Vec::new()));
        let d = discovered.clone();
        let l = left.clone();
        let room = RoomPresence::join(
            network,
            RoomPresenceOptions {
                room_id: "R".to_string(),
                local: presence(peer, &format!("user-{peer}")),
                on_member_discovered: Callback::from(move |m: PresenceState| {
                    d.borrow_mut().push(m.peer_id)
                }),
                on_member_left: Callback::from(move |p| l.borrow_mut().push(p)),
                on_message: Callback::noop(),
                on_channel_down: Callback::noop(),
            },
        )
        .unwrap();
        Harness {
            room,
            discovered,
            left,
        }
    }

    #[test]
    fn discovers_each_member_exactly_once() {
        let network = SimNetwork::new();
        let a = join(&network, "a1");
        let b = join(&network, "b2");

        assert_eq!(*a.discovered.borrow(), vec![PeerId::from("b2")]);
        assert_eq!(*b.discovered.borrow(), vec![PeerId::from("a1")]);

        // Overlapping re-sync changes nothing.
        network.resync_room("R");
        assert_eq!(a.discovered.borrow().len(), 1);
        assert_eq!(b.discovered.borrow().len(), 1);
    }

    #[test]
    fn announce_waits_for_subscription_ack() {
        let network = SimNetwork::new();
        network.hold_subscription_acks(true);

        let a = join(&network, "a1");
        assert!(!a.room.is_announced());

        let b = join(&network, "b2");
        assert!(a.discovered.borrow().is_empty());

        network.release_subscription_acks();
        assert!(a.room.is_announced());
        assert!(b.room.is_announced());
        assert_eq!(*a.discovered.borrow(), vec![PeerId::from("b2")]);
    }

    #[test]
    fn leave_emits_member_left_once() {
        let network = SimNetwork::new();
        let a = join(&network, "a1");
        let b = join(&network, "b2");

        b.room.leave();
        assert_eq!(*a.left.borrow(), vec![PeerId::from("b2")]);
        // A second leave from the same peer is a no-op.
        network.resync_room("R");
        assert_eq!(a.left.borrow().len(), 1);
        assert!(a.room.known_members().is_empty());
    }

    #[test]
    fn channel_down_resets_announce_state() {
        let network = SimNetwork::new();
        let downs = Rc::new(RefCell::new(Vec::new()));
        let sink = downs.clone();
        let room = RoomPresence::join(
            &network,
            RoomPresenceOptions {
                room_id: "R".to_string(),
                local: presence("a1", "user-a"),
                on_member_discovered: Callback::noop(),
                on_member_left: Callback::noop(),
                on_message: Callback::noop(),
                on_channel_down: Callback::from(move |reason| sink.borrow_mut().push(reason)),
            },
        )
        .unwrap();
        assert!(room.is_announced());

        network.drop_channel("R", &PeerId::from("a1"), "transport reset");
        assert!(!room.is_announced());
        assert_eq!(downs.borrow().len(), 1);
    }
}
