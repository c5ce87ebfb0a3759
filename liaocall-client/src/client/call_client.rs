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

//! The call session object.
//!
//! [`CallClient`] wires the presence adapter, the peer mesh, the participant
//! store, media acquisition and the speaking monitor into one explicit
//! session with `join()`/`leave()` lifecycle. Any number of independent
//! sessions can coexist in a process; nothing here is global.

use crate::audio::SpeakingMonitor;
use crate::connection::{MediaEndpointProvider, MeshCallbacks, PeerMesh};
use crate::event_bus::CallEventBus;
use crate::events::CallEvent;
use crate::media::{
    DeviceAccessError, MediaAcquisition, MediaConstraints, MediaDevices, MediaStream,
};
use crate::peers::{Participant, ParticipantStore};
use crate::signaling::{PresenceTransport, RoomPresence, RoomPresenceOptions};
use anyhow::{anyhow, Result};
use async_broadcast::Receiver;
use liaocall_types::{
    BroadcastMessage, Callback, CallMetadata, MediaStateFlags, PeerId, PeerProfile, PresenceState,
    UserId,
};
use log::{debug, error, info};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The three external primitives a session runs on.
#[derive(Clone)]
pub struct CallRuntime {
    pub presence: Rc<dyn PresenceTransport>,
    pub endpoints: Rc<dyn MediaEndpointProvider>,
    pub devices: Rc<dyn MediaDevices>,
}

/// Options struct for constructing a session via
/// [CallClient::new(options, runtime)][CallClient::new].
#[derive(Clone)]
pub struct CallClientOptions {
    /// The room to join.
    pub room_id: String,

    /// The current user's durable account id. Appears as this participant's
    /// `user_id` on the remote clients.
    pub user_id: UserId,

    /// Profile used to label this participant's tile remotely.
    pub profile: PeerProfile,

    /// Signaling identity to use. A random collision-resistant id is
    /// generated on each join when omitted.
    pub peer_id: Option<PeerId>,

    /// What to capture on join.
    pub constraints: MediaConstraints,

    /// Callback will be called as `callback(())` whenever any participant
    /// entry changes; cheap to handle, read snapshots via
    /// [`participants()`](CallClient::participants).
    pub on_participants_changed: Callback<()>,

    /// Callback will be called as `callback(message)` with short-lived,
    /// auto-dismissing notification text.
    pub on_notification: Callback<String>,
}

struct Inner {
    options: CallClientOptions,
    runtime: CallRuntime,
    events: Rc<CallEventBus>,
    store: Rc<RefCell<ParticipantStore>>,
    acquisition: MediaAcquisition,
    monitor: SpeakingMonitor,
    presence: Option<Rc<RoomPresence>>,
    mesh: Option<Rc<PeerMesh>>,
    local_peer_id: Option<PeerId>,
}

/// A room call session.
///
/// Construct with [new(options, runtime)][Self::new], then [`join()`]
/// (Self::join) the room. Drive [`tick()`](Self::tick) on the host's frame
/// cadence for speaking detection, and call [`leave()`](Self::leave) to tear
/// everything down; teardown completes before `leave()` returns.
#[derive(Clone)]
pub struct CallClient {
    inner: Rc<RefCell<Inner>>,
    events: Rc<CallEventBus>,
}

impl CallClient {
    /// Constructor for the session struct. See [CallClientOptions] for the
    /// description of the options.
    pub fn new(options: CallClientOptions, runtime: CallRuntime) -> Self {
        let events = Rc::new(CallEventBus::new());
        let mut acquisition = MediaAcquisition::new(Rc::clone(&runtime.devices));
        acquisition.on_media_error = Callback::from({
            let events = Rc::clone(&events);
            let notify = options.on_notification.clone();
            move |e: DeviceAccessError| {
                events.emit(CallEvent::MediaError(e.to_string()));
                notify.emit(format!("Media devices unavailable: {e}"));
            }
        });

        let inner = Rc::new(RefCell::new(Inner {
            options,
            runtime,
            events: Rc::clone(&events),
            store: Rc::new(RefCell::new(ParticipantStore::new())),
            acquisition,
            monitor: SpeakingMonitor::new(),
            presence: None,
            mesh: None,
            local_peer_id: None,
        }));

        Self { inner, events }
    }

    /// Joins the room: acquires local media, opens the signaling identity,
    /// announces presence and starts answering/initiating calls.
    pub fn join(&self) -> Result<()> {
        let (room_id, local_state) = {
            let mut inner = self.inner.borrow_mut();
            if inner.presence.is_some() {
                return Err(anyhow!("already joined"));
            }

            let peer_id = inner
                .options
                .peer_id
                .clone()
                .unwrap_or_else(PeerId::random);
            let endpoint = inner.runtime.endpoints.create_endpoint(&peer_id)?;

            let constraints = inner.options.constraints;
            let stream = inner.acquisition.acquire(constraints);
            let flags = inner.acquisition.flags();

            let mut local = Participant::new(
                peer_id.clone(),
                inner.options.user_id.clone(),
                inner.options.profile.clone(),
            );
            local.set_flags(flags);
            local.stream = Some(stream.clone());
            inner.store.borrow_mut().insert(local);
            let metadata = CallMetadata::new(
                inner.options.user_id.clone(),
                inner.options.profile.clone(),
            );
            let mesh = PeerMesh::new(
                endpoint,
                Rc::clone(&inner.store),
                stream.clone(),
                metadata,
                self.mesh_callbacks(&inner.options),
            );
            inner.mesh = Some(Rc::new(mesh));
            inner.local_peer_id = Some(peer_id.clone());
            inner.monitor.register(peer_id.clone(), stream);

            info!("joining room {} as {peer_id}", inner.options.room_id);
            (
                inner.options.room_id.clone(),
                PresenceState {
                    peer_id,
                    user_id: inner.options.user_id.clone(),
                    profile: inner.options.profile.clone(),
                    media: flags,
                },
            )
        };

        // The presence join fans membership straight back into the handlers
        // below, so the inner borrow must be released first.
        let joined = RoomPresence::join(
            &*self.transport(),
            RoomPresenceOptions {
                room_id,
                local: local_state,
                on_member_discovered: Callback::from({
                    let inner = Rc::downgrade(&self.inner);
                    move |member| Self::handle_member_discovered(&inner, member)
                }),
                on_member_left: Callback::from({
                    let inner = Rc::downgrade(&self.inner);
                    move |peer: PeerId| {
                        if let Some(mesh) = Self::mesh_of(&inner) {
                            mesh.member_left(&peer);
                        }
                    }
                }),
                on_message: Callback::from({
                    let inner = Rc::downgrade(&self.inner);
                    move |message: BroadcastMessage| {
                        let BroadcastMessage::MediaState(broadcast) = message;
                        if let Some(mesh) = Self::mesh_of(&inner) {
                            mesh.apply_media_state(broadcast);
                        }
                    }
                }),
                on_channel_down: Callback::from({
                    let events = Rc::clone(&self.events);
                    let notify = self.inner.borrow().options.on_notification.clone();
                    move |reason: String| {
                        events.emit(CallEvent::ChannelDown(reason.clone()));
                        notify.emit(format!("Lost connection to the room: {reason}"));
                    }
                }),
            },
        );
        let presence = match joined {
            Ok(presence) => presence,
            Err(e) => {
                // Roll back the half-open session before surfacing the error.
                self.leave();
                return Err(e);
            }
        };

        self.inner.borrow_mut().presence = Some(Rc::new(presence));
        self.events.emit(CallEvent::RoomJoined);
        Ok(())
    }

    /// Leaves the room. Every link, local track, monitor registration and
    /// the presence entry are released before this returns; transport
    /// callbacks arriving later are no-ops.
    pub fn leave(&self) {
        let (presence, mesh) = {
            let mut inner = self.inner.borrow_mut();
            if inner.presence.is_none() && inner.mesh.is_none() {
                return;
            }
            inner.local_peer_id = None;
            (inner.presence.take(), inner.mesh.take())
        };

        if let Some(mesh) = mesh {
            mesh.close();
        }
        if let Some(presence) = presence {
            presence.leave();
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.acquisition.stop();
            inner.monitor.clear();
            inner.store.borrow_mut().clear();
        }
        info!("left room");
        self.events.emit(CallEvent::RoomLeft);
    }

    /// Leaves and rejoins with a fresh signaling identity. The manual
    /// recovery path for a dropped channel; there is no automatic retry.
    pub fn rejoin(&self) -> Result<()> {
        self.leave();
        self.join()
    }

    /// One sampling pass of the speaking monitor, plus reconciliation of
    /// which streams it watches. Call on the host's frame cadence.
    pub fn tick(&self) {
        let changes = {
            let mut inner = self.inner.borrow_mut();
            if inner.presence.is_none() {
                return;
            }
            // Register streams that appeared, drop peers that left.
            let snapshot = inner.store.borrow().snapshot();
            for participant in &snapshot {
                if let Some(stream) = &participant.stream {
                    if !inner.monitor.is_registered(&participant.peer_id) {
                        inner
                            .monitor
                            .register(participant.peer_id.clone(), stream.clone());
                    }
                }
            }
            for peer in inner.monitor.registered_peers() {
                if !inner.store.borrow().contains(&peer) {
                    inner.monitor.unregister(&peer);
                }
            }

            let changes = inner.monitor.sample();
            for (peer, speaking) in &changes {
                inner.store.borrow_mut().set_speaking(peer, *speaking);
            }
            changes
        };

        for (peer_id, speaking) in changes {
            let _ = liaocall_diagnostics::global_sender().send(liaocall_diagnostics::DiagEvent {
                subsystem: "speaking",
                peer_id: Some(peer_id.to_string()),
                ts_ms: liaocall_diagnostics::now_ms(),
                metrics: vec![liaocall_diagnostics::metric!("speaking", speaking as u64)],
            });
            self.events.emit(CallEvent::SpeakingChanged {
                peer_id,
                speaking,
            });
            self.participants_changed();
        }
    }

    // === Local media controls ===

    /// Mute/unmute the outgoing audio. Local flags stay the single source
    /// of truth for track enablement; the new state is broadcast to the
    /// room.
    pub fn set_muted(&self, muted: bool) {
        self.update_local_media(|acquisition| {
            acquisition.set_muted(muted);
            None
        });
    }

    /// Turn the outgoing camera on/off (track stays attached, disabled).
    pub fn set_camera_enabled(&self, enabled: bool) {
        self.update_local_media(|acquisition| {
            acquisition.set_camera_enabled(enabled);
            None
        });
    }

    /// Starts screen share: swaps the screen track into every open link in
    /// place, no renegotiation.
    pub fn start_screen_share(&self) -> Result<(), DeviceAccessError> {
        let mut result = Ok(());
        self.update_local_media(|acquisition| match acquisition.start_screen_share() {
            Ok(track) => Some(Some(track)),
            Err(e) => {
                result = Err(e);
                None
            }
        });
        result
    }

    /// Stops screen share and restores the camera track (if any).
    pub fn stop_screen_share(&self) {
        self.update_local_media(|acquisition| {
            if acquisition.flags().is_screen_sharing {
                Some(acquisition.stop_screen_share())
            } else {
                None
            }
        });
    }

    /// Hangs up on one peer. Idempotent.
    pub fn hang_up(&self, peer: &PeerId) {
        if let Some(mesh) = self.inner.borrow().mesh.clone() {
            mesh.hang_up(peer);
        }
    }

    // === Read side ===

    /// Subscribe to this session's events.
    pub fn subscribe(&self) -> Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.borrow().presence.is_some()
    }

    pub fn room_id(&self) -> String {
        self.inner.borrow().options.room_id.clone()
    }

    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.inner.borrow().local_peer_id.clone()
    }

    /// Immutable snapshots of every participant (local included), sorted by
    /// peer id. Safe to call from any event handler.
    pub fn participants(&self) -> Vec<Participant> {
        self.inner.borrow().store.borrow().snapshot()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        let inner = self.inner.borrow();
        let peer = inner.local_peer_id.clone()?;
        let participant = inner.store.borrow().get(&peer).cloned();
        participant
    }

    pub fn remote_participants(&self) -> Vec<Participant> {
        let local = self.local_peer_id();
        self.participants()
            .into_iter()
            .filter(|p| Some(&p.peer_id) != local.as_ref())
            .collect()
    }

    /// Peer ids of the connected remote participants, sorted.
    pub fn sorted_peer_ids(&self) -> Vec<PeerId> {
        let local = self.local_peer_id();
        self.inner
            .borrow()
            .store
            .borrow()
            .sorted_peer_ids()
            .into_iter()
            .filter(|p| Some(p) != local.as_ref())
            .collect()
    }

    pub fn local_media_flags(&self) -> MediaStateFlags {
        self.inner.borrow().acquisition.flags()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.inner.borrow().acquisition.local_stream()
    }

    // === Internals ===

    fn transport(&self) -> Rc<dyn PresenceTransport> {
        Rc::clone(&self.inner.borrow().runtime.presence)
    }

    fn mesh_of(inner: &Weak<RefCell<Inner>>) -> Option<Rc<PeerMesh>> {
        inner.upgrade().and_then(|inner| inner.borrow().mesh.clone())
    }

    fn handle_member_discovered(inner: &Weak<RefCell<Inner>>, member: PresenceState) {
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let (mesh, events, notify) = {
            let inner = strong.borrow();
            (
                inner.mesh.clone(),
                Rc::clone(&inner.events),
                inner.options.on_notification.clone(),
            )
        };
        let Some(mesh) = mesh else {
            return;
        };
        if let Err(e) = mesh.member_discovered(member) {
            error!("dropping member discovery: {e}");
            events.emit(CallEvent::Notification(format!(
                "Ignoring inconsistent room member: {e}"
            )));
            notify.emit(format!("Ignoring inconsistent room member: {e}"));
        }
    }

    fn mesh_callbacks(&self, options: &CallClientOptions) -> MeshCallbacks {
        let events = Rc::clone(&self.events);
        let changed = options.on_participants_changed.clone();
        let notify = options.on_notification.clone();
        MeshCallbacks {
            on_participant_added: Callback::from({
                let events = Rc::clone(&events);
                let changed = changed.clone();
                move |peer| {
                    events.emit(CallEvent::ParticipantAdded(peer));
                    changed.emit(());
                }
            }),
            on_participant_updated: Callback::from({
                let events = Rc::clone(&events);
                let changed = changed.clone();
                move |peer| {
                    events.emit(CallEvent::ParticipantUpdated(peer));
                    changed.emit(());
                }
            }),
            on_participant_removed: Callback::from({
                let events = Rc::clone(&events);
                let changed = changed.clone();
                move |peer| {
                    events.emit(CallEvent::ParticipantRemoved(peer));
                    changed.emit(());
                }
            }),
            on_notification: Callback::from({
                move |message: String| {
                    events.emit(CallEvent::Notification(message.clone()));
                    notify.emit(message);
                }
            }),
        }
    }

    // Applies a local media mutation, then propagates: video-track swaps to
    // every link, new flags to the local store entry and the room.
    fn update_local_media<F>(&self, mutate: F)
    where
        F: FnOnce(&mut MediaAcquisition) -> Option<Option<crate::media::MediaTrack>>,
    {
        let (replacement, flags, peer, mesh, presence) = {
            let mut inner = self.inner.borrow_mut();
            let Some(peer) = inner.local_peer_id.clone() else {
                return;
            };
            let replacement = mutate(&mut inner.acquisition);
            let flags = inner.acquisition.flags();
            inner.store.borrow_mut().apply_media_state(&peer, flags);
            (
                replacement,
                flags,
                peer,
                inner.mesh.clone(),
                inner.presence.clone(),
            )
        };

        if let (Some(track), Some(mesh)) = (replacement, &mesh) {
            mesh.replace_video_track(track);
        }
        if let Some(presence) = presence {
            presence.broadcast_state(flags);
        }
        debug!("local media flags now {flags:?}");
        self.events.emit(CallEvent::ParticipantUpdated(peer));
        self.participants_changed();
    }

    fn participants_changed(&self) {
        let changed = self.inner.borrow().options.on_participants_changed.clone();
        changed.emit(());
    }
}
