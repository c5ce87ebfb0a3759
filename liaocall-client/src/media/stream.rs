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

//! Handle types for media streams and tracks.
//!
//! A [`MediaStream`] is a cheaply cloneable handle; every clone refers to the
//! same live tracks, which is what lets a local stream be shared by reference
//! with the peer mesh and the preview tile. Only the stream's owner (media
//! acquisition) may stop tracks; every other holder is limited to toggling
//! `enabled` and reading.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// What a track captures. Camera and screen tracks are both video but are
/// swapped in and out of the same stream slot when screen share toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: Cell<bool>,
    ended: Cell<bool>,
    // Live amplitude written by the capture side; only meaningful for audio.
    level: Cell<f32>,
}

/// A single live media track.
pub struct MediaTrack(Rc<TrackInner>);

impl MediaTrack {
    pub fn new(source: TrackSource) -> Self {
        Self(Rc::new(TrackInner {
            id: format!("track-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)),
            source,
            enabled: Cell::new(true),
            ended: Cell::new(false),
            level: Cell::new(0.0),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn kind(&self) -> TrackKind {
        self.0.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.0.source
    }

    pub fn is_enabled(&self) -> bool {
        self.0.enabled.get()
    }

    /// Consumers may toggle `enabled`; a disabled track keeps its device
    /// open but publishes silence/black.
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.set(enabled);
    }

    pub fn is_ended(&self) -> bool {
        self.0.ended.get()
    }

    /// Current amplitude as observed by the capture side, in `0.0..=1.0`.
    /// A disabled or ended track always reads as silent.
    pub fn level(&self) -> f32 {
        if self.0.enabled.get() && !self.0.ended.get() {
            self.0.level.get()
        } else {
            0.0
        }
    }

    /// Written by the capture side (or a test driving it).
    pub fn set_level(&self, level: f32) {
        self.0.level.set(level);
    }

    // Owner-only: releases the underlying device capture.
    pub(crate) fn stop(&self) {
        self.0.ended.set(true);
        self.0.level.set(0.0);
    }
}

impl Clone for MediaTrack {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.0.id)
            .field("source", &self.0.source)
            .field("enabled", &self.0.enabled.get())
            .field("ended", &self.0.ended.get())
            .finish()
    }
}

#[derive(Debug)]
struct StreamInner {
    id: String,
    tracks: RefCell<Vec<MediaTrack>>,
}

/// A handle to a set of live tracks. Clones share the same tracks.
pub struct MediaStream(Rc<StreamInner>);

impl MediaStream {
    /// An empty stream. Valid as a call contribution: a client whose device
    /// access failed still answers calls with one of these.
    pub fn empty() -> Self {
        Self::with_tracks(Vec::new())
    }

    pub fn with_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self(Rc::new(StreamInner {
            id: format!("stream-{}", NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)),
            tracks: RefCell::new(tracks),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.0.tracks.borrow().clone()
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.0
            .tracks
            .borrow()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks().is_empty()
    }

    pub fn has_video(&self) -> bool {
        !self.video_tracks().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.tracks.borrow().is_empty()
    }

    /// Swaps the published video track in place, returning the previous one.
    /// The previous track is *not* stopped here; its owner decides that.
    pub(crate) fn replace_video_track(&self, new: Option<MediaTrack>) -> Option<MediaTrack> {
        let mut tracks = self.0.tracks.borrow_mut();
        let old = tracks
            .iter()
            .position(|t| t.kind() == TrackKind::Video)
            .map(|i| tracks.remove(i));
        if let Some(track) = new {
            tracks.push(track);
        }
        old
    }

    // Owner-only.
    pub(crate) fn stop_all(&self) {
        for track in self.0.tracks.borrow().iter() {
            track.stop();
        }
    }

    /// Whether two handles refer to the same live stream.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Clone for MediaStream {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.0.id)
            .field("tracks", &self.0.tracks.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_track_state() {
        let track = MediaTrack::new(TrackSource::Microphone);
        let stream = MediaStream::with_tracks(vec![track.clone()]);
        let alias = stream.clone();

        track.set_enabled(false);
        assert!(!alias.audio_tracks()[0].is_enabled());
        assert!(stream.ptr_eq(&alias));
    }

    #[test]
    fn disabled_track_reads_silent() {
        let track = MediaTrack::new(TrackSource::Microphone);
        track.set_level(0.8);
        assert_eq!(track.level(), 0.8);
        track.set_enabled(false);
        assert_eq!(track.level(), 0.0);
    }

    #[test]
    fn replace_video_track_swaps_in_place() {
        let mic = MediaTrack::new(TrackSource::Microphone);
        let camera = MediaTrack::new(TrackSource::Camera);
        let stream = MediaStream::with_tracks(vec![mic, camera.clone()]);

        let screen = MediaTrack::new(TrackSource::Screen);
        let old = stream.replace_video_track(Some(screen.clone()));
        assert_eq!(old, Some(camera));
        assert_eq!(stream.video_tracks(), vec![screen]);
        assert!(stream.has_audio());
    }

    #[test]
    fn replace_with_none_drops_video() {
        let camera = MediaTrack::new(TrackSource::Camera);
        let stream = MediaStream::with_tracks(vec![camera.clone()]);
        assert_eq!(stream.replace_video_track(None), Some(camera));
        assert!(!stream.has_video());
    }

    #[test]
    fn stop_all_ends_every_track() {
        let stream = MediaStream::with_tracks(vec![
            MediaTrack::new(TrackSource::Microphone),
            MediaTrack::new(TrackSource::Camera),
        ]);
        stream.stop_all();
        assert!(stream.tracks().iter().all(|t| t.is_ended()));
    }
}
