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

// Defines the trait seam for the peer/media-connection primitive, at the
// level of whole streams and typed call metadata.
//
// Media transport, congestion control and NAT traversal all live below this
// seam; the in-process loopback implementation lives in crate::sim.

use crate::media::{MediaStream, MediaTrack};
use liaocall_types::{Callback, CallMetadata, PeerId};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The target endpoint is unknown or gone. Recoverable: the pending
    /// participant is dismissed, the room session continues.
    PeerUnreachable(PeerId),
    /// The local endpoint was closed.
    Closed,
    Other(String),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::PeerUnreachable(peer) => write!(f, "peer {peer} is unreachable"),
            EndpointError::Closed => write!(f, "local endpoint closed"),
            EndpointError::Other(e) => write!(f, "endpoint error: {e}"),
        }
    }
}

impl std::error::Error for EndpointError {}

/// Handlers for events on one media link.
#[derive(Clone)]
pub struct LinkHandlers {
    /// The remote side's stream arrived.
    pub on_stream: Callback<MediaStream>,

    /// The link closed, by either side.
    pub on_close: Callback<()>,

    /// The link failed mid-call.
    pub on_error: Callback<String>,
}

impl Default for LinkHandlers {
    fn default() -> Self {
        Self {
            on_stream: Callback::noop(),
            on_close: Callback::noop(),
            on_error: Callback::noop(),
        }
    }
}

/// Handlers for events on the local endpoint.
#[derive(Clone)]
pub struct EndpointHandlers {
    /// An inbound call arrived; answer it (or close it) on the link.
    pub on_incoming: Callback<Rc<dyn MediaLink>>,

    /// An out-of-band endpoint failure, e.g. an unreachable call target.
    pub on_error: Callback<EndpointError>,
}

impl Default for EndpointHandlers {
    fn default() -> Self {
        Self {
            on_incoming: Callback::noop(),
            on_error: Callback::noop(),
        }
    }
}

/// An ephemeral media connection between two participants.
pub trait MediaLink {
    fn remote_peer_id(&self) -> PeerId;

    /// Metadata the caller attached, already validated by the transport
    /// layer; `None` on a malformed or missing payload (fail closed).
    fn metadata(&self) -> Option<CallMetadata>;

    /// Accepts an inbound call, contributing `stream` (possibly trackless).
    fn answer(&self, stream: MediaStream);

    fn set_handlers(&self, handlers: LinkHandlers);

    /// Swaps the outgoing video track without renegotiating the link.
    fn replace_video_track(&self, track: Option<MediaTrack>);

    fn close(&self);

    fn is_open(&self) -> bool;
}

/// The client's single outbound signaling identity.
pub trait MediaEndpoint {
    fn local_peer_id(&self) -> PeerId;

    fn set_handlers(&self, handlers: EndpointHandlers);

    /// Opens an outbound call carrying the current local stream and a typed
    /// metadata envelope.
    fn call(
        &self,
        remote: &PeerId,
        stream: MediaStream,
        metadata: CallMetadata,
    ) -> Result<Rc<dyn MediaLink>, EndpointError>;

    /// Closes the endpoint and every link it owns.
    fn close(&self);
}

/// Creates endpoints; one per joined room session.
pub trait MediaEndpointProvider {
    fn create_endpoint(&self, local: &PeerId) -> anyhow::Result<Rc<dyn MediaEndpoint>>;
}
