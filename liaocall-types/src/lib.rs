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

//! Shared types for the LiaoCall room-call core.
//!
//! This crate holds everything the signaling adapter, the peer mesh and the
//! embedding UI need to agree on: participant identifiers, the versioned
//! signaling envelope carried over the presence channel, and the
//! framework-agnostic [`Callback`] type used at every component seam.
//!
//! Nothing in here touches a transport; payloads are plain serde types so
//! that whatever broadcast primitive carries them can treat them as opaque
//! JSON.

pub mod callback;
pub mod envelope;
pub mod ids;

pub use callback::Callback;
pub use envelope::{
    BroadcastMessage, CallMetadata, EnvelopeError, MediaStateBroadcast, MediaStateFlags,
    PeerProfile, PresenceState, SIGNAL_SCHEMA_VERSION,
};
pub use ids::{PeerId, UserId};
