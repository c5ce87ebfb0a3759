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

//! Room-call core for the LiaoTian client.
//!
//! This crate takes care of everything between "the user pressed the call
//! button" and "the UI has a list of participant tiles to render": presence
//! signaling for room membership, deterministic mesh call initiation between
//! members, per-participant state, speaking detection and local media
//! acquisition.
//!
//! It makes no assumptions about the UI and owns no transport: the managed
//! presence channel, the peer media connection and the device layer are
//! consumed through the [`PresenceTransport`], [`MediaEndpoint`] and
//! [`MediaDevices`] traits. In-process loopback implementations of all three
//! live in the [`sim`] module and are what the tests and examples run on.
//!
//! # Outline of usage
//!
//! For more detailed documentation see the doc for each struct.
//!
//! ## Session creation and room join:
//! ```no_run
//! # use liaocall_client::{CallClient, CallClientOptions, CallRuntime};
//! # fn demo(options: CallClientOptions, runtime: CallRuntime) -> anyhow::Result<()> {
//! let client = CallClient::new(options, runtime);
//!
//! client.join()?;
//! // ... drive client.tick() on the host's frame cadence ...
//! client.leave();
//! # Ok(())
//! # }
//! ```
//!
//! ## Observing state:
//! ```no_run
//! # use liaocall_client::{CallClient, CallEvent};
//! # fn demo(client: &CallClient) {
//! let mut events = client.subscribe();
//! while let Ok(event) = events.try_recv() {
//!     match event {
//!         CallEvent::ParticipantAdded(peer_id) => { /* add a tile */ }
//!         CallEvent::ParticipantRemoved(peer_id) => { /* drop the tile */ }
//!         _ => {}
//!     }
//! }
//! let tiles = client.participants(); // sorted snapshots, incl. local
//! # }
//! ```

mod audio;
mod client;
mod connection;
mod constants;
mod event_bus;
mod events;
mod media;
mod peers;
mod signaling;
pub mod sim;

pub use audio::SpeakingMonitor;
pub use client::{CallClient, CallClientOptions, CallRuntime};
pub use connection::{
    decide_initiator, EndpointError, EndpointHandlers, InitiationRole, LinkHandlers, MediaEndpoint,
    MediaEndpointProvider, MediaLink, MeshError,
};
pub use event_bus::CallEventBus;
pub use events::CallEvent;
pub use media::{
    DeviceAccessError, DeviceInfo, DeviceKind, MediaAcquisition, MediaConstraints, MediaDeviceList,
    MediaDevices, MediaStream, MediaTrack, SelectableDevices, TrackKind, TrackSource,
};
pub use peers::{Participant, ParticipantStore};
pub use signaling::{
    PresenceChannel, PresenceHandlers, PresenceTransport, RoomPresence, RoomPresenceOptions,
    SignalingError,
};
