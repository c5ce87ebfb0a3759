pub mod channel;
pub mod room_presence;

pub use channel::{PresenceChannel, PresenceHandlers, PresenceTransport, SignalingError};
pub use room_presence::{RoomPresence, RoomPresenceOptions};
