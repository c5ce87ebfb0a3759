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

//! The peer mesh connection manager.
//!
//! Owns every media link of the active room session and guarantees at most
//! one link per peer pair without a central coordinator: on discovering a
//! member, the side with the lexicographically greater peer id initiates and
//! the other side only answers. Inbound calls are always auto-answered with
//! the current local stream, so a client whose devices failed still joins
//! calls, it just contributes silence.

use super::endpoint::{EndpointError, EndpointHandlers, LinkHandlers, MediaEndpoint, MediaLink};
use crate::constants::MAX_BUFFERED_MEDIA_STATES;
use crate::media::{MediaStream, MediaTrack};
use crate::peers::{Participant, ParticipantStore};
use liaocall_diagnostics::{global_sender, metric, now_ms, DiagEvent};
use liaocall_types::{
    Callback, CallMetadata, MediaStateBroadcast, MediaStateFlags, PeerId, PresenceState,
};
use log::{debug, error, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Which side of a freshly discovered pair opens the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitiationRole {
    /// Local id is greater: place the outbound call.
    Initiate,
    /// Remote id is greater: wait for the inbound call and answer it.
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Two members presented the same peer id. Ids are assumed unique and
    /// comparable; equality is an internal consistency failure, never a
    /// silent hang.
    IdCollision(PeerId),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::IdCollision(peer) => {
                write!(f, "peer id collision: remote presented local id {peer}")
            }
        }
    }
}

impl std::error::Error for MeshError {}

/// Deterministic symmetry break for call initiation.
pub fn decide_initiator(local: &PeerId, remote: &PeerId) -> Result<InitiationRole, MeshError> {
    match local.cmp(remote) {
        std::cmp::Ordering::Greater => Ok(InitiationRole::Initiate),
        std::cmp::Ordering::Less => Ok(InitiationRole::Answer),
        std::cmp::Ordering::Equal => Err(MeshError::IdCollision(remote.clone())),
    }
}

/// Callbacks the session wires into its event stream.
#[derive(Clone)]
pub struct MeshCallbacks {
    pub on_participant_added: Callback<PeerId>,
    pub on_participant_updated: Callback<PeerId>,
    pub on_participant_removed: Callback<PeerId>,

    /// Transient, auto-dismissing user notification.
    pub on_notification: Callback<String>,
}

impl Default for MeshCallbacks {
    fn default() -> Self {
        Self {
            on_participant_added: Callback::noop(),
            on_participant_updated: Callback::noop(),
            on_participant_removed: Callback::noop(),
            on_notification: Callback::noop(),
        }
    }
}

struct MeshInner {
    local_peer_id: PeerId,
    endpoint: Rc<dyn MediaEndpoint>,
    store: Rc<RefCell<ParticipantStore>>,
    local_stream: MediaStream,
    metadata: CallMetadata,
    links: HashMap<PeerId, Rc<dyn MediaLink>>,
    // Media-state broadcasts for peers we have not discovered yet.
    // Last-writer-wins per peer, oldest peer evicted on overflow.
    pending_states: Vec<(PeerId, MediaStateFlags)>,
    closed: bool,
    callbacks: MeshCallbacks,
}

/// Owner of all media links for one room session.
pub struct PeerMesh {
    inner: Rc<RefCell<MeshInner>>,
}

impl PeerMesh {
    pub fn new(
        endpoint: Rc<dyn MediaEndpoint>,
        store: Rc<RefCell<ParticipantStore>>,
        local_stream: MediaStream,
        metadata: CallMetadata,
        callbacks: MeshCallbacks,
    ) -> Self {
        let local_peer_id = endpoint.local_peer_id();
        let inner = Rc::new(RefCell::new(MeshInner {
            local_peer_id,
            endpoint: Rc::clone(&endpoint),
            store,
            local_stream,
            metadata,
            links: HashMap::new(),
            pending_states: Vec::new(),
            closed: false,
            callbacks,
        }));

        endpoint.set_handlers(EndpointHandlers {
            on_incoming: Callback::from({
                let inner = Rc::downgrade(&inner);
                move |link| handle_incoming(&inner, link)
            }),
            on_error: Callback::from({
                let inner = Rc::downgrade(&inner);
                move |e| handle_endpoint_error(&inner, e)
            }),
        });

        Self { inner }
    }

    /// A presence member we have not seen before. Decides the initiation
    /// role, creates the pending participant, and places the outbound call
    /// when this side is the initiator.
    pub fn member_discovered(&self, member: PresenceState) -> Result<(), MeshError> {
        let peer = member.peer_id.clone();
        let role = {
            let inner = self.inner.borrow();
            if inner.closed {
                return Ok(());
            }
            if inner.links.contains_key(&peer) {
                debug!("already linked to {peer}, ignoring rediscovery");
                return Ok(());
            }
            decide_initiator(&inner.local_peer_id, &peer)?
        };

        insert_or_update(&self.inner, Participant::from_presence(&member));
        flush_pending_state(&self.inner, &peer);

        if role == InitiationRole::Answer {
            debug!("awaiting inbound call from {peer}");
            return Ok(());
        }

        let (endpoint, stream, metadata) = {
            let inner = self.inner.borrow();
            (
                Rc::clone(&inner.endpoint),
                inner.local_stream.clone(),
                inner.metadata.clone(),
            )
        };
        debug!("initiating call to {peer}");
        match endpoint.call(&peer, stream, metadata) {
            Ok(link) => register_link(&self.inner, peer, link),
            Err(e) => handle_call_failure(&self.inner, &peer, e),
        }
        Ok(())
    }

    /// A media-state broadcast from the room. Applied immediately for known
    /// peers, buffered for peers discovery has not delivered yet.
    pub fn apply_media_state(&self, broadcast: MediaStateBroadcast) {
        let peer = broadcast.peer_id.clone();
        let flags = broadcast.flags();
        let applied = {
            let inner = self.inner.borrow();
            if inner.closed || peer == inner.local_peer_id {
                return;
            }
            let applied = inner.store.borrow_mut().apply_media_state(&peer, flags);
            applied
        };
        if applied {
            emit(&self.inner, |cb| cb.on_participant_updated.clone(), peer);
        } else {
            debug!("buffering media state for undiscovered peer {peer}");
            let mut inner = self.inner.borrow_mut();
            if let Some(entry) = inner.pending_states.iter_mut().find(|(p, _)| *p == peer) {
                entry.1 = flags;
                return;
            }
            if inner.pending_states.len() >= MAX_BUFFERED_MEDIA_STATES {
                let (evicted, _) = inner.pending_states.remove(0);
                debug!("pending media-state buffer full, dropping {evicted}");
            }
            inner.pending_states.push((peer, flags));
        }
    }

    /// A presence departure. Tears the link down and removes the entry.
    pub fn member_left(&self, peer: &PeerId) {
        debug!("member left: {peer}");
        remove_peer(&self.inner, peer);
    }

    /// Explicit local hang-up on one peer. Idempotent.
    pub fn hang_up(&self, peer: &PeerId) {
        remove_peer(&self.inner, peer);
    }

    /// Swaps the outgoing video track in place on every open link; used for
    /// camera/screen toggling. No renegotiation.
    pub fn replace_video_track(&self, track: Option<MediaTrack>) {
        let links: Vec<Rc<dyn MediaLink>> = {
            let inner = self.inner.borrow();
            inner.links.values().cloned().collect()
        };
        debug!("replacing outgoing video track on {} links", links.len());
        for link in links {
            link.replace_video_track(track.clone());
        }
    }

    /// Tears down every link and the endpoint. All resources are released
    /// before this returns; late transport callbacks become no-ops.
    pub fn close(&self) {
        let (links, endpoint) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.pending_states.clear();
            (std::mem::take(&mut inner.links), Rc::clone(&inner.endpoint))
        };
        for (peer, link) in links {
            debug!("closing link to {peer}");
            link.close();
        }
        endpoint.close();
    }

    pub fn link_count(&self) -> usize {
        self.inner.borrow().links.len()
    }

    pub fn has_link(&self, peer: &PeerId) -> bool {
        self.inner.borrow().links.contains_key(peer)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.borrow().local_peer_id.clone()
    }

    pub fn buffered_state_count(&self) -> usize {
        self.inner.borrow().pending_states.len()
    }
}

impl Drop for PeerMesh {
    fn drop(&mut self) {
        self.close();
    }
}

type Inner = Rc<RefCell<MeshInner>>;

fn handle_incoming(inner: &Weak<RefCell<MeshInner>>, link: Rc<dyn MediaLink>) {
    let Some(inner) = inner.upgrade() else {
        // The session is gone; a call answered now would resurrect nothing.
        link.close();
        return;
    };
    if inner.borrow().closed {
        link.close();
        return;
    }
    let peer = link.remote_peer_id();

    let stale = inner.borrow_mut().links.remove(&peer);
    if let Some(stale) = stale {
        // A re-offer replaces whatever link we still held.
        warn!("replacing existing link for {peer} with new inbound call");
        stale.close();
    }

    match link.metadata() {
        Some(metadata) => {
            insert_or_update(
                &inner,
                Participant::new(peer.clone(), metadata.user_id, metadata.profile),
            );
        }
        // Fail closed on missing/malformed metadata: the call proceeds but
        // the tile stays unlabeled until presence fills it in.
        None => {
            warn!("inbound call from {peer} carried no valid metadata");
            insert_or_update(
                &inner,
                Participant::new(peer.clone(), "".into(), Default::default()),
            );
        }
    }
    flush_pending_state(&inner, &peer);

    let stream = inner.borrow().local_stream.clone();
    debug!("auto-answering inbound call from {peer}");
    register_link(&inner, peer, Rc::clone(&link));
    link.answer(stream);
}

fn handle_endpoint_error(inner: &Weak<RefCell<MeshInner>>, error: EndpointError) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.borrow().closed {
        return;
    }
    match error {
        EndpointError::PeerUnreachable(peer) => {
            let target = peer.clone();
            handle_call_failure(&inner, &target, EndpointError::PeerUnreachable(peer));
        }
        EndpointError::Closed => {
            debug!("endpoint reported closed");
        }
        EndpointError::Other(e) => {
            error!("endpoint error: {e}");
            notify(&inner, format!("Call system error: {e}"));
        }
    }
}

// Registers the link and attaches its event handlers. The link must be in
// `links` before handlers attach, because a loopback transport can replay a
// buffered stream event synchronously.
fn register_link(inner: &Inner, peer: PeerId, link: Rc<dyn MediaLink>) {
    inner
        .borrow_mut()
        .links
        .insert(peer.clone(), Rc::clone(&link));
    report_links(inner, &peer, "link_open");

    let weak = Rc::downgrade(inner);
    link.set_handlers(LinkHandlers {
        on_stream: Callback::from({
            let weak = weak.clone();
            let peer = peer.clone();
            move |stream| {
                if let Some(inner) = weak.upgrade() {
                    handle_stream(&inner, &peer, stream);
                }
            }
        }),
        on_close: Callback::from({
            let weak = weak.clone();
            let peer = peer.clone();
            move |_| {
                if let Some(inner) = weak.upgrade() {
                    debug!("link to {peer} closed");
                    remove_peer(&inner, &peer);
                }
            }
        }),
        on_error: Callback::from({
            let peer = peer.clone();
            move |reason: String| {
                if let Some(inner) = weak.upgrade() {
                    warn!("link to {peer} failed: {reason}");
                    remove_peer(&inner, &peer);
                    notify(&inner, format!("Connection to {peer} was lost"));
                }
            }
        }),
    });
}

fn handle_stream(inner: &Inner, peer: &PeerId, stream: MediaStream) {
    let updated = {
        let inner = inner.borrow();
        if inner.closed {
            return;
        }
        let updated = inner.store.borrow_mut().set_stream(peer, stream);
        updated
    };
    if updated {
        debug!("stream attached for {peer}");
        emit(inner, |cb| cb.on_participant_updated.clone(), peer.clone());
    }
}

fn handle_call_failure(inner: &Inner, peer: &PeerId, error: EndpointError) {
    warn!("call with {peer} failed: {error}");
    remove_peer(inner, peer);
    match error {
        EndpointError::PeerUnreachable(_) => notify(inner, format!("Could not reach {peer}")),
        other => notify(inner, format!("Call to {peer} failed: {other}")),
    }
}

// Creates the entry, or fills identity in on an entry created by an
// unlabeled inbound call.
fn insert_or_update(inner: &Inner, participant: Participant) {
    let peer = participant.peer_id.clone();
    let (added, updated) = {
        let inner = inner.borrow();
        let mut store = inner.store.borrow_mut();
        if store.insert(participant.clone()) {
            (true, false)
        } else {
            (
                false,
                store.update_identity(&peer, participant.user_id, participant.profile),
            )
        }
    };
    if added {
        emit(inner, |cb| cb.on_participant_added.clone(), peer);
    } else if updated {
        emit(inner, |cb| cb.on_participant_updated.clone(), peer);
    }
}

fn flush_pending_state(inner: &Inner, peer: &PeerId) {
    let flags = {
        let mut inner = inner.borrow_mut();
        match inner.pending_states.iter().position(|(p, _)| p == peer) {
            Some(i) => Some(inner.pending_states.remove(i).1),
            None => None,
        }
    };
    if let Some(flags) = flags {
        let applied = {
            let inner = inner.borrow();
            let applied = inner.store.borrow_mut().apply_media_state(peer, flags);
            applied
        };
        if applied {
            debug!("applied buffered media state for {peer}");
            emit(inner, |cb| cb.on_participant_updated.clone(), peer.clone());
        }
    }
}

fn remove_peer(inner: &Inner, peer: &PeerId) {
    let (link, removed) = {
        let mut borrowed = inner.borrow_mut();
        let link = borrowed.links.remove(peer);
        let removed = borrowed.store.borrow_mut().remove(peer).is_some();
        (link, removed)
    };
    if let Some(link) = link {
        link.close();
        report_links(inner, peer, "link_closed");
    }
    if removed {
        emit(inner, |cb| cb.on_participant_removed.clone(), peer.clone());
    }
}

fn notify(inner: &Inner, message: String) {
    emit(inner, |cb| cb.on_notification.clone(), message);
}

fn emit<T, F>(inner: &Inner, pick: F, value: T)
where
    F: Fn(&MeshCallbacks) -> Callback<T>,
{
    let callback = pick(&inner.borrow().callbacks);
    callback.emit(value);
}

fn report_links(inner: &Inner, peer: &PeerId, event: &'static str) {
    let links = inner.borrow().links.len() as u64;
    let _ = global_sender().send(DiagEvent {
        subsystem: "peer_mesh",
        peer_id: Some(peer.to_string()),
        ts_ms: now_ms(),
        metrics: vec![metric!("event", event), metric!("links", links)],
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;
    use liaocall_types::{PeerProfile, UserId};

    #[test]
    fn greater_id_initiates() {
        let a = PeerId::from("a1");
        let b = PeerId::from("b2");
        assert_eq!(decide_initiator(&b, &a), Ok(InitiationRole::Initiate));
        assert_eq!(decide_initiator(&a, &b), Ok(InitiationRole::Answer));
    }

    #[test]
    fn equal_ids_are_a_consistency_error() {
        let a = PeerId::from("a1");
        assert_eq!(
            decide_initiator(&a, &a),
            Err(MeshError::IdCollision(PeerId::from("a1")))
        );
    }

    fn test_mesh(network: &SimNetwork, peer: &str) -> (PeerMesh, Rc<RefCell<ParticipantStore>>) {
        use crate::connection::MediaEndpointProvider;
        let endpoint = network.create_endpoint(&PeerId::from(peer)).unwrap();
        let store = Rc::new(RefCell::new(ParticipantStore::new()));
        let mesh = PeerMesh::new(
            endpoint,
            Rc::clone(&store),
            MediaStream::empty(),
            CallMetadata::new(UserId::from(peer), PeerProfile::default()),
            MeshCallbacks::default(),
        );
        (mesh, store)
    }

    fn member(peer: &str) -> PresenceState {
        PresenceState {
            peer_id: PeerId::from(peer),
            user_id: UserId::from(format!("user-{peer}")),
            profile: PeerProfile::new(peer, peer, ""),
            media: MediaStateFlags::default(),
        }
    }

    fn muted_broadcast(peer: &str) -> MediaStateBroadcast {
        MediaStateBroadcast::new(
            PeerId::from(peer),
            MediaStateFlags {
                is_muted: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn state_broadcast_before_discovery_is_buffered_then_applied() {
        let network = SimNetwork::new();
        let (mesh, store) = test_mesh(&network, "z9");
        let (_peer_mesh, _peer_store) = test_mesh(&network, "a1");

        mesh.apply_media_state(muted_broadcast("a1"));
        assert_eq!(mesh.buffered_state_count(), 1);
        assert!(store.borrow().is_empty());

        mesh.member_discovered(member("a1")).unwrap();
        assert_eq!(mesh.buffered_state_count(), 0);
        assert!(store.borrow().get(&PeerId::from("a1")).unwrap().is_muted);
    }

    #[test]
    fn pending_state_buffer_is_bounded() {
        let network = SimNetwork::new();
        let (mesh, _store) = test_mesh(&network, "z9");
        for i in 0..(MAX_BUFFERED_MEDIA_STATES + 8) {
            mesh.apply_media_state(muted_broadcast(&format!("peer-{i:03}")));
        }
        assert_eq!(mesh.buffered_state_count(), MAX_BUFFERED_MEDIA_STATES);
        // Last writer wins per peer, without growing the buffer.
        mesh.apply_media_state(muted_broadcast(&format!(
            "peer-{:03}",
            MAX_BUFFERED_MEDIA_STATES + 7
        )));
        assert_eq!(mesh.buffered_state_count(), MAX_BUFFERED_MEDIA_STATES);
    }

    #[test]
    fn unreachable_target_dismisses_the_pending_participant() {
        let network = SimNetwork::new();
        let (mesh, store) = test_mesh(&network, "z9");

        // "a1" never registered an endpoint, so the outbound call fails.
        mesh.member_discovered(member("a1")).unwrap();
        assert!(store.borrow().is_empty());
        assert_eq!(mesh.link_count(), 0);
    }

    #[test]
    fn collision_creates_no_participant_and_no_link() {
        let network = SimNetwork::new();
        let (mesh, store) = test_mesh(&network, "a1");
        let result = mesh.member_discovered(member("a1"));
        assert_eq!(result, Err(MeshError::IdCollision(PeerId::from("a1"))));
        assert!(store.borrow().is_empty());
        assert_eq!(mesh.link_count(), 0);
    }
}
