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

//! Framework-agnostic event types for the call session.
//!
//! These events are emitted on the session's event bus and can be consumed
//! by any frontend. They carry ids, not stream handles; the UI reads
//! participant snapshots from the session when it needs the streams.

use liaocall_types::PeerId;

/// Events emitted by a [`crate::CallClient`] that UI frameworks can
/// subscribe to.
#[derive(Clone, Debug)]
pub enum CallEvent {
    // === Session events ===
    /// The local presence announce reached the room.
    RoomJoined,

    /// The session was torn down, by `leave()` or a fatal failure.
    RoomLeft,

    /// The signaling channel dropped; membership is frozen until the caller
    /// rejoins.
    ChannelDown(String),

    // === Participant events ===
    /// A participant entry was created (presence join or inbound call).
    ParticipantAdded(PeerId),

    /// A participant entry changed (stream attach, media flags, identity).
    ParticipantUpdated(PeerId),

    /// A participant entry was removed (leave, close, error or hang-up).
    ParticipantRemoved(PeerId),

    /// The speaking flag flipped for a participant (local included).
    SpeakingChanged { peer_id: PeerId, speaking: bool },

    // === Transient user-facing events ===
    /// A device request failed; the call continues degraded.
    MediaError(String),

    /// Short-lived toast message, e.g. an unreachable call target.
    Notification(String),
}
