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

//! Identifier newtypes for the two distinct identities a participant has.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Signaling-layer connection address of a participant.
///
/// Every client in a room carries exactly one `PeerId`; members address their
/// media connections to it. The type is totally ordered because call
/// initiation between two members is decided by comparing their peer ids.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh collision-resistant id, for clients the signaling system does
    /// not assign one to.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Durable account identity of a participant.
///
/// Unlike [`PeerId`], a `UserId` survives rejoining a room; at most one live
/// participant per `UserId` is valid at a time.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_order_lexicographically() {
        let a = PeerId::from("a1");
        let b = PeerId::from("b2");
        assert!(b > a);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn random_peer_ids_are_distinct() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn peer_id_serializes_as_bare_string() {
        let id = PeerId::from("p-77");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p-77\"");
        let back: PeerId = serde_json::from_str("\"p-77\"").unwrap();
        assert_eq!(back, id);
    }
}
