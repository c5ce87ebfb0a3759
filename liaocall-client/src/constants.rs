/// Normalized audio amplitude above which a participant counts as speaking.
pub const SPEAKING_LEVEL_THRESHOLD: f32 = 0.05;

/// Consecutive quiet samples before the speaking flag drops. Roughly 200ms
/// at a 60Hz sampling cadence.
pub const SPEAKING_HOLD_FRAMES: u8 = 12;

/// Upper bound on media-state broadcasts buffered for peers that have not
/// been discovered yet. Last-writer-wins per peer; the oldest peer is
/// evicted on overflow.
pub const MAX_BUFFERED_MEDIA_STATES: usize = 32;

/// Capacity of a session's event bus channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
