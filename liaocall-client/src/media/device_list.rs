//! Device enumeration with per-kind selection, for settings UIs.

use super::acquisition::MediaDevices;
use liaocall_types::Callback;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// A "smart" list of [`DeviceInfo`] items, used by [`MediaDeviceList`].
///
/// The list keeps track of a currently selected device, supporting selection
/// and a callback that is triggered when a selection is made.
pub struct SelectableDevices {
    devices: Vec<DeviceInfo>,
    selected: Option<String>,

    /// Callback that will be called as `callback(device_id)` whenever
    /// [`select(device_id)`](Self::select) is called with a valid `device_id`.
    pub on_selected: Callback<String>,
}

impl SelectableDevices {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            on_selected: Callback::noop(),
        }
    }

    /// Select a device by the `device_id` of an entry in
    /// [`devices()`](Self::devices). Does nothing for unknown ids.
    pub fn select(&mut self, device_id: &str) {
        if self.devices.iter().any(|d| d.device_id == device_id) {
            self.selected = Some(device_id.to_string());
            self.on_selected.emit(device_id.to_string());
        }
    }

    /// Returns the available devices of this kind.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Returns the `device_id` of the currently selected device, or "" if
    /// there are no devices.
    pub fn selected(&self) -> String {
        match &self.selected {
            Some(selected) => selected.to_string(),
            // device 0 is the default selection
            None => match self.devices.first() {
                Some(device) => device.device_id.clone(),
                None => String::new(),
            },
        }
    }
}

/// Queries the device layer for the available audio and video inputs and
/// maintains a current selection for each kind.
///
/// It has no implicit connection to [`super::MediaAcquisition`]; the calling
/// app passes the selection on when it re-acquires media.
pub struct MediaDeviceList {
    /// The list of audio input devices. "Read-only" other than selection.
    pub audio_inputs: SelectableDevices,

    /// The list of video input devices. "Read-only" other than selection.
    pub video_inputs: SelectableDevices,

    /// Callback that is called as `callback(())` after [`load()`](Self::load)
    /// completes.
    pub on_loaded: Callback<()>,
}

#[allow(clippy::new_without_default)]
impl MediaDeviceList {
    pub fn new() -> Self {
        Self {
            audio_inputs: SelectableDevices::new(),
            video_inputs: SelectableDevices::new(),
            on_loaded: Callback::noop(),
        }
    }

    /// Populates both lists from the device layer. By default the first
    /// device of each kind is selected and its `on_selected` callback fires.
    pub fn load(&mut self, devices: &dyn MediaDevices) {
        let all = devices.enumerate_devices();
        self.audio_inputs.devices = all
            .iter()
            .filter(|d| d.kind == DeviceKind::AudioInput)
            .cloned()
            .collect();
        self.video_inputs.devices = all
            .into_iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .collect();

        let first_audio = self.audio_inputs.selected();
        if !first_audio.is_empty() {
            self.audio_inputs.select(&first_audio);
        }
        let first_video = self.video_inputs.selected();
        if !first_video.is_empty() {
            self.video_inputs.select(&first_video);
        }
        self.on_loaded.emit(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevices;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn load_partitions_by_kind_and_selects_defaults() {
        let selections = Rc::new(RefCell::new(Vec::new()));
        let sink = selections.clone();

        let mut list = MediaDeviceList::new();
        list.audio_inputs.on_selected = Callback::from(move |id| sink.borrow_mut().push(id));
        list.load(&SimDevices::new());

        assert!(!list.audio_inputs.devices().is_empty());
        assert!(!list.video_inputs.devices().is_empty());
        assert_eq!(selections.borrow().len(), 1);
        assert_eq!(list.audio_inputs.selected(), selections.borrow()[0]);
    }

    #[test]
    fn selecting_unknown_device_is_ignored() {
        let mut list = MediaDeviceList::new();
        list.load(&SimDevices::new());
        let before = list.video_inputs.selected();
        list.video_inputs.select("no-such-device");
        assert_eq!(list.video_inputs.selected(), before);
    }
}
