pub mod acquisition;
pub mod device_list;
pub mod stream;

pub use acquisition::{DeviceAccessError, MediaAcquisition, MediaConstraints, MediaDevices};
pub use device_list::{DeviceInfo, DeviceKind, MediaDeviceList, SelectableDevices};
pub use stream::{MediaStream, MediaTrack, TrackKind, TrackSource};
