pub mod change_detector;
pub mod monitor;

pub use change_detector::{ChangeDetector, ChangeDetectorError};
pub use monitor::{CycleReport, Monitor, MonitorOptions};
