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

// Defines the trait seam for the managed presence/broadcast primitive, at the
// level of typed envelope payloads.
//
// Implemented by whatever realtime backend the app ships with; the in-process
// loopback implementation lives in crate::sim.

use liaocall_types::{BroadcastMessage, Callback, PeerId, PresenceState};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The channel subscription has not been acknowledged yet; presence
    /// tracked now would be lost.
    NotSubscribed,
    /// The channel was torn down.
    ChannelClosed,
    Transport(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::NotSubscribed => write!(f, "channel subscription not acknowledged"),
            SignalingError::ChannelClosed => write!(f, "channel closed"),
            SignalingError::Transport(e) => write!(f, "signaling transport error: {e}"),
        }
    }
}

impl std::error::Error for SignalingError {}

/// Handlers a subscriber registers on a presence channel.
#[derive(Clone)]
pub struct PresenceHandlers {
    /// Called once the transport acknowledges the subscription; presence
    /// tracked before this fires is lost.
    pub on_subscribed: Callback<()>,

    /// Full membership recomputation. May fire repeatedly with overlapping
    /// member sets.
    pub on_sync: Callback<Vec<PresenceState>>,

    /// Departing presence keys.
    pub on_leave: Callback<Vec<PeerId>>,

    /// In-band broadcast from some member.
    pub on_message: Callback<BroadcastMessage>,

    /// The transport lost the channel; membership is stale from here on.
    pub on_channel_down: Callback<String>,
}

impl Default for PresenceHandlers {
    fn default() -> Self {
        Self {
            on_subscribed: Callback::noop(),
            on_sync: Callback::noop(),
            on_leave: Callback::noop(),
            on_message: Callback::noop(),
            on_channel_down: Callback::noop(),
        }
    }
}

/// A live subscription to one room's presence channel.
pub trait PresenceChannel {
    /// Announces (or re-announces) the local presence tuple to the room.
    fn track(&self, state: PresenceState) -> Result<(), SignalingError>;

    /// Fire-and-forget broadcast to every other member. Best effort: no
    /// acknowledgement, no cross-member ordering.
    fn send(&self, message: BroadcastMessage) -> Result<(), SignalingError>;

    fn unsubscribe(&self);

    fn is_subscribed(&self) -> bool;
}

/// The presence/broadcast primitive itself.
pub trait PresenceTransport {
    fn subscribe(
        &self,
        room_id: &str,
        handlers: PresenceHandlers,
    ) -> anyhow::Result<Rc<dyn PresenceChannel>>;
}
