//! Decoded advertisement events delivered by a scanner backend.

use crate::mac_address::MacAddress;
use std::time::SystemTime;
use thiserror::Error;

/// One received advertisement, already decoded upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    /// Hardware address of the advertiser
    pub identity: MacAddress,
    /// Local name carried by the payload, if any. `None` and `Some("")` are
    /// both "no name" to the aggregator, but sources report what they saw.
    pub local_name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// When the advertisement was received
    pub observed_at: SystemTime,
}

impl AdvertisementEvent {
    pub fn new(
        identity: MacAddress,
        local_name: Option<String>,
        rssi: i16,
        observed_at: SystemTime,
    ) -> Self {
        Self {
            identity,
            local_name,
            rssi,
            observed_at,
        }
    }
}

/// Reports from a source that cannot become an [`AdvertisementEvent`].
///
/// These are contract violations of the upstream collaborator and are
/// rejected before they reach the aggregator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    /// The stack reported a device without a signal strength reading
    #[error("no RSSI reported for {0}")]
    MissingRssi(MacAddress),
    /// A replayed record could not be parsed
    #[error("invalid record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },
}

/// Convenience alias for events or boundary violations.
pub type EventResult = Result<AdvertisementEvent, EventError>;
