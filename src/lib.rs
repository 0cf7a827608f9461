//! `blewatch` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The aggregation core lives in [`crate::aggregator`] and
//! [`crate::scheduler`]; [`crate::app`] wires them to a scanner and an output
//! stream so the whole pipeline can be tested deterministically.

pub mod advertisement;
pub mod aggregator;
pub mod app;
pub mod duration;
pub mod mac_address;
pub mod output;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{AdvertisementEvent, EventError, EventResult};
pub use aggregator::{Aggregator, DeviceRecord, Snapshot, SnapshotPolicy, UNKNOWN_NAME};
pub use mac_address::MacAddress;
pub use output::{Format, OutputFormatter, WriterSink};
pub use scanner::{Backend, ScanError, Source};
pub use scheduler::{Clock, SchedulerConfig, SnapshotScheduler, SnapshotSink, SystemClock};
