//! JSON array output.
//!
//! Each snapshot becomes one line:
//! `[{"address":"AA:BB:CC:DD:EE:FF","name":"Foo","rssi":-42,"lastSeenSecondsAgo":3}]`

use crate::aggregator::Snapshot;
use crate::output::OutputFormatter;
use serde_json::{Value, json};

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, snapshot: &Snapshot) -> String {
        let devices: Vec<Value> = snapshot
            .iter()
            .map(|device| {
                json!({
                    "address": device.identity.to_string(),
                    "name": device.display_name(),
                    "rssi": device.rssi,
                    "lastSeenSecondsAgo": device.age_at(snapshot.taken_at).as_secs(),
                })
            })
            .collect();
        Value::Array(devices).to_string()
    }
}
