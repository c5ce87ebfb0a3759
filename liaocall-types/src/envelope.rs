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

//! The typed signaling envelope carried over the presence channel.
//!
//! Receivers never trust a raw payload: decoding fails closed on malformed
//! shapes, unknown fields and unsupported versions, instead of treating the
//! payload as a duck-typed bag.

use crate::ids::{PeerId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamped into every [`CallMetadata`] payload. Bump when the
/// envelope shape changes incompatibly.
pub const SIGNAL_SCHEMA_VERSION: u32 = 1;

/// Public profile of a participant, used only to label tiles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    pub username: String,
}

impl PeerProfile {
    pub fn new(
        display_name: impl Into<String>,
        username: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
            username: username.into(),
        }
    }
}

/// Mute/camera/screen flags for one participant.
///
/// For the local participant these are authoritative; for remote
/// participants they are informational only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStateFlags {
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
}

/// The tuple each member tracks on the room presence channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub peer_id: PeerId,
    pub user_id: UserId,
    pub profile: PeerProfile,
    #[serde(default)]
    pub media: MediaStateFlags,
}

/// Out-of-band payload attached to an outbound call, so the remote side can
/// label the tile before the first stream frame arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallMetadata {
    pub version: u32,
    pub user_id: UserId,
    pub profile: PeerProfile,
}

impl CallMetadata {
    pub fn new(user_id: UserId, profile: PeerProfile) -> Self {
        Self {
            version: SIGNAL_SCHEMA_VERSION,
            user_id,
            profile,
        }
    }

    /// Decodes metadata received from a remote caller. Fails closed: a
    /// malformed shape or a version this build does not understand is an
    /// error, never a best-effort guess.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        let metadata: Self =
            serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if metadata.version != SIGNAL_SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(metadata.version));
        }
        Ok(metadata)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

/// Transient last-writer-wins media flags for one peer, fanned out to the
/// room. Not persisted anywhere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaStateBroadcast {
    pub peer_id: PeerId,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
}

impl MediaStateBroadcast {
    pub fn new(peer_id: PeerId, flags: MediaStateFlags) -> Self {
        Self {
            peer_id,
            is_muted: flags.is_muted,
            is_video_off: flags.is_video_off,
            is_screen_sharing: flags.is_screen_sharing,
        }
    }

    pub fn flags(&self) -> MediaStateFlags {
        MediaStateFlags {
            is_muted: self.is_muted,
            is_video_off: self.is_video_off,
            is_screen_sharing: self.is_screen_sharing,
        }
    }
}

/// Messages fanned out over the room channel beyond presence itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    MediaState(MediaStateBroadcast),
}

impl BroadcastMessage {
    /// Decodes a broadcast received from the channel, failing closed on
    /// unknown message types or malformed bodies.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    Malformed(String),
    UnsupportedVersion(u32),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Malformed(e) => write!(f, "malformed signaling payload: {e}"),
            EnvelopeError::UnsupportedVersion(v) => {
                write!(f, "unsupported signaling schema version {v}")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> PeerProfile {
        PeerProfile::new("Mei", "mei.l", "https://cdn.example/mei.png")
    }

    #[test]
    fn metadata_round_trips() {
        let metadata = CallMetadata::new(UserId::from("u-9"), profile());
        let raw = metadata.to_json().unwrap();
        assert_eq!(CallMetadata::from_json(&raw).unwrap(), metadata);
    }

    #[test]
    fn metadata_rejects_unknown_fields() {
        let raw = r#"{"version":1,"user_id":"u-9","profile":{"display_name":"Mei","username":"mei.l"},"admin":true}"#;
        assert!(matches!(
            CallMetadata::from_json(raw),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn metadata_rejects_future_versions() {
        let raw = r#"{"version":2,"user_id":"u-9","profile":{"display_name":"Mei","username":"mei.l"}}"#;
        assert_eq!(
            CallMetadata::from_json(raw),
            Err(EnvelopeError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn metadata_rejects_garbage() {
        assert!(CallMetadata::from_json("not json").is_err());
        assert!(CallMetadata::from_json("{}").is_err());
    }

    #[test]
    fn broadcast_is_tagged_by_type() {
        let message = BroadcastMessage::MediaState(MediaStateBroadcast::new(
            PeerId::from("p-1"),
            MediaStateFlags {
                is_muted: true,
                ..Default::default()
            },
        ));
        let raw = message.to_json().unwrap();
        assert!(raw.contains("\"type\":\"media_state\""));
        assert_eq!(BroadcastMessage::from_json(&raw).unwrap(), message);
    }

    #[test]
    fn broadcast_rejects_unknown_type() {
        assert!(BroadcastMessage::from_json(r#"{"type":"kick","peer_id":"p-1"}"#).is_err());
    }

    #[test]
    fn presence_defaults_media_flags() {
        let raw = r#"{"peer_id":"p-1","user_id":"u-1","profile":{"display_name":"Mei","username":"mei.l"}}"#;
        let presence: PresenceState = serde_json::from_str(raw).unwrap();
        assert_eq!(presence.media, MediaStateFlags::default());
    }
}
