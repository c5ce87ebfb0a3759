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

//! Derives a per-participant "currently speaking" boolean from live audio
//! amplitude.
//!
//! The monitor holds no timer of its own: the host calls [`sample`]
//! (SpeakingMonitor::sample) on its frame cadence, and deregistering a
//! stream stops its sampling immediately. The rising edge fires instantly;
//! the falling edge is held for a few quiet frames so brief pauses do not
//! flicker the UI.

use crate::constants::{SPEAKING_HOLD_FRAMES, SPEAKING_LEVEL_THRESHOLD};
use crate::media::MediaStream;
use crate::peers::ordered_map::OrderedKeyMap;
use liaocall_types::PeerId;
use log::debug;

struct MonitorEntry {
    stream: MediaStream,
    speaking: bool,
    quiet_frames: u8,
}

pub struct SpeakingMonitor {
    entries: OrderedKeyMap<PeerId, MonitorEntry>,
    threshold: f32,
    hold_frames: u8,
}

impl SpeakingMonitor {
    pub fn new() -> Self {
        Self::with_tuning(SPEAKING_LEVEL_THRESHOLD, SPEAKING_HOLD_FRAMES)
    }

    pub fn with_tuning(threshold: f32, hold_frames: u8) -> Self {
        Self {
            entries: OrderedKeyMap::new(),
            threshold,
            hold_frames,
        }
    }

    /// Starts sampling `stream` for `peer`. Re-registering replaces the
    /// stream and resets the speaking state.
    pub fn register(&mut self, peer: PeerId, stream: MediaStream) {
        debug!("speaking monitor: registering {peer}");
        self.entries.insert(
            peer,
            MonitorEntry {
                stream,
                speaking: false,
                quiet_frames: 0,
            },
        );
    }

    /// Stops sampling immediately. Idempotent.
    pub fn unregister(&mut self, peer: &PeerId) {
        if self.entries.remove(peer).is_some() {
            debug!("speaking monitor: unregistered {peer}");
        }
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn registered_count(&self) -> usize {
        self.entries.len()
    }

    pub fn registered_peers(&self) -> Vec<PeerId> {
        self.entries.ordered_keys().clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// One sampling pass over every registered stream. Returns the peers
    /// whose speaking flag flipped, in sorted order.
    pub fn sample(&mut self) -> Vec<(PeerId, bool)> {
        let threshold = self.threshold;
        let hold_frames = self.hold_frames;
        let mut changes = Vec::new();

        for peer in self.entries.ordered_keys().clone() {
            let Some(entry) = self.entries.get_mut(&peer) else {
                continue;
            };
            let level = entry
                .stream
                .audio_tracks()
                .iter()
                .map(|t| t.level())
                .fold(0.0f32, f32::max);

            if level >= threshold {
                entry.quiet_frames = 0;
                if !entry.speaking {
                    entry.speaking = true;
                    changes.push((peer, true));
                }
            } else if entry.speaking {
                entry.quiet_frames = entry.quiet_frames.saturating_add(1);
                if entry.quiet_frames >= hold_frames {
                    entry.speaking = false;
                    entry.quiet_frames = 0;
                    changes.push((peer, false));
                }
            }
        }
        changes
    }
}

impl Default for SpeakingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackSource};

    fn voiced_stream() -> (MediaStream, MediaTrack) {
        let track = MediaTrack::new(TrackSource::Microphone);
        let stream = MediaStream::with_tracks(vec![track.clone()]);
        (stream, track)
    }

    #[test]
    fn rising_edge_fires_immediately() {
        let mut monitor = SpeakingMonitor::with_tuning(0.1, 3);
        let (stream, track) = voiced_stream();
        monitor.register(PeerId::from("a1"), stream);

        assert!(monitor.sample().is_empty());
        track.set_level(0.5);
        assert_eq!(monitor.sample(), vec![(PeerId::from("a1"), true)]);
        // Still speaking: no repeat change.
        assert!(monitor.sample().is_empty());
    }

    #[test]
    fn falling_edge_waits_for_hold_frames() {
        let mut monitor = SpeakingMonitor::with_tuning(0.1, 3);
        let (stream, track) = voiced_stream();
        monitor.register(PeerId::from("a1"), stream);

        track.set_level(0.5);
        monitor.sample();
        track.set_level(0.0);
        assert!(monitor.sample().is_empty());
        assert!(monitor.sample().is_empty());
        assert_eq!(monitor.sample(), vec![(PeerId::from("a1"), false)]);
    }

    #[test]
    fn brief_dips_do_not_flicker() {
        let mut monitor = SpeakingMonitor::with_tuning(0.1, 3);
        let (stream, track) = voiced_stream();
        monitor.register(PeerId::from("a1"), stream);

        track.set_level(0.5);
        monitor.sample();
        track.set_level(0.0);
        monitor.sample();
        track.set_level(0.5);
        assert!(monitor.sample().is_empty()); // never dropped
    }

    #[test]
    fn muted_track_reads_silent() {
        let mut monitor = SpeakingMonitor::with_tuning(0.1, 1);
        let (stream, track) = voiced_stream();
        monitor.register(PeerId::from("a1"), stream);

        track.set_level(0.5);
        monitor.sample();
        track.set_enabled(false);
        assert_eq!(monitor.sample(), vec![(PeerId::from("a1"), false)]);
    }

    #[test]
    fn unregister_stops_sampling_immediately() {
        let mut monitor = SpeakingMonitor::with_tuning(0.1, 3);
        let (stream, track) = voiced_stream();
        monitor.register(PeerId::from("a1"), stream);
        track.set_level(0.5);
        monitor.sample();

        monitor.unregister(&PeerId::from("a1"));
        monitor.unregister(&PeerId::from("a1"));
        assert!(monitor.sample().is_empty());
        assert_eq!(monitor.registered_count(), 0);
    }
}
