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

//! The single in-memory source of truth for participant records.
//!
//! Reads are synchronous with writes: a consumer rendering right after any
//! mutation sees the mutation. Only discovery (`insert`) creates entries;
//! every patch operation no-ops for an absent peer, so a patch racing a
//! removal can never resurrect a participant.

use super::ordered_map::OrderedKeyMap;
use super::participant::Participant;
use crate::media::MediaStream;
use liaocall_types::{MediaStateFlags, PeerId, PeerProfile, UserId};
use log::debug;

#[derive(Debug, Default)]
pub struct ParticipantStore {
    participants: OrderedKeyMap<PeerId, Participant>,
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self {
            participants: OrderedKeyMap::new(),
        }
    }

    /// Adds a newly discovered participant. Returns `false` (and changes
    /// nothing) if an entry for this peer already exists.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if self.participants.contains_key(&participant.peer_id) {
            return false;
        }
        debug!("participant added: {}", participant.peer_id);
        self.participants
            .insert(participant.peer_id.clone(), participant);
        true
    }

    /// Attaches the remote stream. No-op for unknown peers.
    pub fn set_stream(&mut self, peer_id: &PeerId, stream: MediaStream) -> bool {
        match self.participants.get_mut(peer_id) {
            Some(participant) => {
                participant.stream = Some(stream);
                true
            }
            None => false,
        }
    }

    /// Applies a media-state broadcast: only the three flags, never the
    /// stream. No-op for unknown peers.
    pub fn apply_media_state(&mut self, peer_id: &PeerId, flags: MediaStateFlags) -> bool {
        match self.participants.get_mut(peer_id) {
            Some(participant) => {
                participant.set_flags(flags);
                true
            }
            None => false,
        }
    }

    /// Fills in identity fields, e.g. when presence arrives after an
    /// unlabeled inbound call. An empty identity never overwrites a real
    /// one. No-op for unknown peers; returns `true` when something changed.
    pub fn update_identity(
        &mut self,
        peer_id: &PeerId,
        user_id: UserId,
        profile: PeerProfile,
    ) -> bool {
        let Some(participant) = self.participants.get_mut(peer_id) else {
            return false;
        };
        if user_id.as_str().is_empty() {
            return false;
        }
        if participant.user_id == user_id && participant.profile == profile {
            return false;
        }
        participant.user_id = user_id;
        participant.profile = profile;
        true
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_speaking(&mut self, peer_id: &PeerId, speaking: bool) -> bool {
        match self.participants.get_mut(peer_id) {
            Some(participant) if participant.speaking != speaking => {
                participant.speaking = speaking;
                true
            }
            _ => false,
        }
    }

    /// Removes a participant. Idempotent.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Participant> {
        let removed = self.participants.remove(peer_id);
        if removed.is_some() {
            debug!("participant removed: {peer_id}");
        }
        removed
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.participants.contains_key(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Participant> {
        self.participants.get(peer_id)
    }

    /// Peer ids in sorted order.
    pub fn sorted_peer_ids(&self) -> Vec<PeerId> {
        self.participants.ordered_keys().clone()
    }

    /// Immutable snapshots in sorted peer-id order, for rendering.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants
            .iter_ordered()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liaocall_types::{PeerProfile, UserId};

    fn participant(peer: &str) -> Participant {
        Participant::new(
            PeerId::from(peer),
            UserId::from(format!("user-{peer}")),
            PeerProfile::new(peer, peer, ""),
        )
    }

    #[test]
    fn insert_is_create_only() {
        let mut store = ParticipantStore::new();
        assert!(store.insert(participant("a1")));
        let mut dup = participant("a1");
        dup.is_muted = true;
        assert!(!store.insert(dup));
        assert!(!store.get(&PeerId::from("a1")).unwrap().is_muted);
    }

    #[test]
    fn patches_never_resurrect_removed_peers() {
        let mut store = ParticipantStore::new();
        store.insert(participant("a1"));
        store.remove(&PeerId::from("a1"));

        let peer = PeerId::from("a1");
        assert!(!store.set_stream(&peer, MediaStream::empty()));
        assert!(!store.apply_media_state(&peer, MediaStateFlags::default()));
        assert!(!store.set_speaking(&peer, true));
        assert!(store.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = ParticipantStore::new();
        store.insert(participant("a1"));
        assert!(store.remove(&PeerId::from("a1")).is_some());
        assert!(store.remove(&PeerId::from("a1")).is_none());
    }

    #[test]
    fn media_state_patch_leaves_stream_alone() {
        let mut store = ParticipantStore::new();
        store.insert(participant("a1"));
        let peer = PeerId::from("a1");
        let stream = MediaStream::empty();
        store.set_stream(&peer, stream.clone());

        store.apply_media_state(
            &peer,
            MediaStateFlags {
                is_muted: true,
                is_video_off: true,
                is_screen_sharing: false,
            },
        );
        let p = store.get(&peer).unwrap();
        assert!(p.is_muted && p.is_video_off);
        assert!(p.stream.as_ref().unwrap().ptr_eq(&stream));
    }

    #[test]
    fn snapshots_come_back_sorted() {
        let mut store = ParticipantStore::new();
        store.insert(participant("c3"));
        store.insert(participant("a1"));
        store.insert(participant("b2"));
        let ids: Vec<_> = store.snapshot().into_iter().map(|p| p.peer_id).collect();
        assert_eq!(
            ids,
            vec![PeerId::from("a1"), PeerId::from("b2"), PeerId::from("c3")]
        );
    }

    #[test]
    fn empty_identity_never_overwrites_a_real_one() {
        let mut store = ParticipantStore::new();
        store.insert(participant("a1"));
        let peer = PeerId::from("a1");

        assert!(!store.update_identity(&peer, UserId::from(""), PeerProfile::default()));
        assert_eq!(store.get(&peer).unwrap().user_id, UserId::from("user-a1"));

        let profile = PeerProfile::new("Ana", "ana", "");
        assert!(store.update_identity(&peer, UserId::from("u-a"), profile.clone()));
        assert_eq!(store.get(&peer).unwrap().profile, profile);
        // Same identity again reports no change.
        assert!(!store.update_identity(&peer, UserId::from("u-a"), profile));
    }

    #[test]
    fn set_speaking_reports_changes_only() {
        let mut store = ParticipantStore::new();
        store.insert(participant("a1"));
        let peer = PeerId::from("a1");
        assert!(store.set_speaking(&peer, true));
        assert!(!store.set_speaking(&peer, true));
        assert!(store.set_speaking(&peer, false));
    }
}
