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

use crate::media::MediaStream;
use liaocall_types::{MediaStateFlags, PeerId, PeerProfile, PresenceState, UserId};

/// One party in a call, local or remote.
///
/// `stream: None` is a valid transient state (connection pending); the entry
/// must eventually get a stream attached or be removed. The mute/video/
/// screen flags mirror [`MediaStateFlags`]: authoritative for the local
/// participant, informational for remote ones.
#[derive(Clone, Debug)]
pub struct Participant {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub profile: PeerProfile,
    pub stream: Option<MediaStream>,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
    pub speaking: bool,
}

impl Participant {
    pub fn new(peer_id: PeerId, user_id: UserId, profile: PeerProfile) -> Self {
        Self {
            peer_id,
            user_id,
            profile,
            stream: None,
            is_muted: false,
            is_video_off: false,
            is_screen_sharing: false,
            speaking: false,
        }
    }

    /// Entry for a member learned from a presence announce.
    pub fn from_presence(member: &PresenceState) -> Self {
        let mut participant = Self::new(
            member.peer_id.clone(),
            member.user_id.clone(),
            member.profile.clone(),
        );
        participant.set_flags(member.media);
        participant
    }

    pub fn flags(&self) -> MediaStateFlags {
        MediaStateFlags {
            is_muted: self.is_muted,
            is_video_off: self.is_video_off,
            is_screen_sharing: self.is_screen_sharing,
        }
    }

    pub fn set_flags(&mut self, flags: MediaStateFlags) {
        self.is_muted = flags.is_muted;
        self.is_video_off = flags.is_video_off;
        self.is_screen_sharing = flags.is_screen_sharing;
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }
}
