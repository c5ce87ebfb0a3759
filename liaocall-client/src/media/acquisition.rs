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

//! Local media acquisition.
//!
//! [`MediaAcquisition`] requests microphone/camera/display capture through
//! the [`MediaDevices`] seam, normalizes failures into a small closed
//! taxonomy, and *always* comes back with a usable stream: device failure
//! degrades what this client contributes to a call, it never blocks call
//! setup. The acquired stream is exclusively owned here; everything else
//! holds it by reference and may only toggle `enabled` on its tracks.

use super::device_list::DeviceInfo;
use super::stream::{MediaStream, MediaTrack, TrackSource};
use liaocall_types::{Callback, MediaStateFlags};
use log::{debug, warn};
use std::fmt;
use std::rc::Rc;

/// Closed taxonomy for device failures. Anything the device layer reports
/// that is not a missing device or a permission refusal lands in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAccessError {
    NotFound,
    PermissionDenied,
    Other(String),
}

impl fmt::Display for DeviceAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAccessError::NotFound => write!(f, "no matching capture device found"),
            DeviceAccessError::PermissionDenied => write!(f, "device access permission denied"),
            DeviceAccessError::Other(e) => write!(f, "device access failed: {e}"),
        }
    }
}

impl std::error::Error for DeviceAccessError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// The device-media primitive. Implemented by the platform layer; the
/// in-process fake lives in [`crate::sim`].
pub trait MediaDevices {
    fn get_user_media(&self, constraints: MediaConstraints)
        -> Result<MediaStream, DeviceAccessError>;
    fn get_display_media(&self) -> Result<MediaStream, DeviceAccessError>;
    fn enumerate_devices(&self) -> Vec<DeviceInfo>;
}

/// Owner of the local media stream for one call session.
pub struct MediaAcquisition {
    devices: Rc<dyn MediaDevices>,
    stream: Option<MediaStream>,
    flags: MediaStateFlags,
    // Camera track parked while a screen track occupies the video slot.
    parked_camera: Option<MediaTrack>,
    last_error: Option<DeviceAccessError>,

    /// Callback that is called whenever a device request fails; the session
    /// surfaces it as a transient notification.
    pub on_media_error: Callback<DeviceAccessError>,
}

impl MediaAcquisition {
    pub fn new(devices: Rc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
            flags: MediaStateFlags::default(),
            parked_camera: None,
            last_error: None,
            on_media_error: Callback::noop(),
        }
    }

    /// Requests capture per `constraints` and returns the local stream.
    ///
    /// Never fails. If the full request is refused, a video request falls
    /// back to audio-only; if that is refused too, the stream is trackless.
    /// In every degraded case the local flags are forced to match what the
    /// stream actually carries.
    pub fn acquire(&mut self, constraints: MediaConstraints) -> MediaStream {
        self.last_error = None;
        let stream = match self.devices.get_user_media(constraints) {
            Ok(stream) => stream,
            Err(e) if constraints.video => {
                warn!("media request failed ({e}), retrying audio-only");
                self.record_error(e);
                match self.devices.get_user_media(MediaConstraints::audio_only()) {
                    Ok(stream) => stream,
                    Err(e2) => {
                        warn!("audio-only fallback failed too: {e2}");
                        MediaStream::empty()
                    }
                }
            }
            Err(e) => {
                warn!("media request failed: {e}");
                self.record_error(e);
                MediaStream::empty()
            }
        };

        self.flags = MediaStateFlags {
            is_muted: !stream.has_audio(),
            is_video_off: !stream.has_video(),
            is_screen_sharing: false,
        };
        self.parked_camera = None;
        debug!(
            "acquired local stream {} (audio: {}, video: {})",
            stream.id(),
            stream.has_audio(),
            stream.has_video()
        );
        self.stream = Some(stream.clone());
        stream
    }

    fn record_error(&mut self, error: DeviceAccessError) {
        self.last_error = Some(error.clone());
        self.on_media_error.emit(error);
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.stream.clone()
    }

    /// Authoritative mute/camera/screen flags for the local participant.
    pub fn flags(&self) -> MediaStateFlags {
        self.flags
    }

    pub fn last_error(&self) -> Option<&DeviceAccessError> {
        self.last_error.as_ref()
    }

    /// Toggles the outgoing audio tracks. Unmuting with no live audio track
    /// is forced back to muted; the flag never claims capability the stream
    /// does not have.
    pub fn set_muted(&mut self, muted: bool) {
        let mut have_audio = false;
        if let Some(stream) = &self.stream {
            for track in stream.audio_tracks() {
                if !track.is_ended() {
                    have_audio = true;
                    track.set_enabled(!muted);
                }
            }
        }
        self.flags.is_muted = muted || !have_audio;
    }

    /// Toggles the outgoing camera tracks. Screen tracks are unaffected.
    pub fn set_camera_enabled(&mut self, enabled: bool) {
        let mut have_camera = false;
        if let Some(stream) = &self.stream {
            for track in stream.video_tracks() {
                if track.source() == TrackSource::Camera && !track.is_ended() {
                    have_camera = true;
                    track.set_enabled(enabled);
                }
            }
        }
        for track in self.parked_camera.iter() {
            have_camera = true;
            track.set_enabled(enabled);
        }
        self.flags.is_video_off = !enabled || !have_camera;
    }

    /// Starts display capture, swapping the screen track into the published
    /// video slot. The camera track (if any) is parked, not stopped, so
    /// stopping the share restores it.
    pub fn start_screen_share(&mut self) -> Result<MediaTrack, DeviceAccessError> {
        if self.flags.is_screen_sharing {
            return Err(DeviceAccessError::Other("already screen sharing".into()));
        }
        let stream = match &self.stream {
            Some(stream) => stream.clone(),
            None => return Err(DeviceAccessError::Other("no active local stream".into())),
        };
        let display = match self.devices.get_display_media() {
            Ok(display) => display,
            Err(e) => {
                self.record_error(e.clone());
                return Err(e);
            }
        };
        let screen_track = display.video_tracks().into_iter().next().ok_or_else(|| {
            DeviceAccessError::Other("display capture produced no video track".into())
        })?;

        self.parked_camera = stream.replace_video_track(Some(screen_track.clone()));
        self.flags.is_screen_sharing = true;
        debug!("screen share started, camera parked: {}", self.parked_camera.is_some());
        Ok(screen_track)
    }

    /// Stops display capture and restores the parked camera track. Returns
    /// the restored track, or `None` when no camera comes back.
    pub fn stop_screen_share(&mut self) -> Option<MediaTrack> {
        if !self.flags.is_screen_sharing {
            return None;
        }
        let restored = self.parked_camera.take();
        if let Some(stream) = &self.stream {
            if let Some(screen) = stream.replace_video_track(restored.clone()) {
                screen.stop();
            }
        }
        self.flags.is_screen_sharing = false;
        self.flags.is_video_off = restored
            .as_ref()
            .map(|t| !t.is_enabled())
            .unwrap_or(true);
        restored
    }

    /// Stops every local track and releases the stream. Only the owner ever
    /// does this; it is what clears the device-in-use indicator.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        if let Some(camera) = self.parked_camera.take() {
            camera.stop();
        }
        self.flags = MediaStateFlags {
            is_muted: true,
            is_video_off: true,
            is_screen_sharing: false,
        };
    }
}
