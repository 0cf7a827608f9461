//! InfluxDB line protocol output formatter.

use crate::aggregator::{DeviceRecord, Snapshot};
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    #[allow(dead_code)] // Used in tests
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in a tag value.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Points from before the epoch are written without a timestamp.
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since| since.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Writes one point per visible device, timestamped with when the device was
/// last seen. Tags are the address and display name.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Create a new InfluxDB formatter.
    ///
    /// # Arguments
    /// * `measurement_name` - The measurement name to use in the line protocol
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, device: &DeviceRecord) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("address".to_string(), device.identity.to_string());
        tags.insert("name".to_string(), device.display_name().to_string());
        tags
    }

    fn field_set(&self, device: &DeviceRecord, now: SystemTime) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("rssi".into(), FieldValue::Integer(i64::from(device.rssi)));
        let age = device.age_at(now).as_secs();
        fields.insert(
            "last_seen_seconds_ago".into(),
            FieldValue::Integer(i64::try_from(age).unwrap_or(i64::MAX)),
        );
        fields
    }

    fn to_data_point(&self, device: &DeviceRecord, now: SystemTime) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(device),
            field_set: self.field_set(device, now),
            timestamp: Some(device.last_seen_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, snapshot: &Snapshot) -> String {
        snapshot
            .iter()
            .map(|device| self.to_data_point(device, snapshot.taken_at).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
