pub mod speaking_monitor;

pub use speaking_monitor::SpeakingMonitor;
