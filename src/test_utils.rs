use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use std::time::{Duration, SystemTime};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Address whose last byte is `n`, for tests that need several devices.
pub fn mac(n: u8) -> MacAddress {
    MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, n])
}

/// `secs` seconds after the Unix epoch.
pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Build an event observed `secs` seconds after the epoch.
pub fn event(identity: MacAddress, name: Option<&str>, rssi: i16, secs: u64) -> AdvertisementEvent {
    AdvertisementEvent::new(identity, name.map(str::to_string), rssi, at(secs))
}
