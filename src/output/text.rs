//! Plain text table for terminals.

use crate::aggregator::Snapshot;
use crate::output::OutputFormatter;
use std::fmt::Write;

#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, snapshot: &Snapshot) -> String {
        let mut out = format!("-- {} device(s) --", snapshot.len());
        for device in snapshot {
            // Writing to a String cannot fail.
            let _ = write!(
                out,
                "\n{:>4} dBm  {}  {:>4}s  {}",
                device.rssi,
                device.identity,
                device.age_at(snapshot.taken_at).as_secs(),
                device.display_name()
            );
        }
        out
    }
}
