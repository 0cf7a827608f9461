//! Advertisement sources.
//!
//! A backend turns whatever the radio stack reports into a channel of
//! [`EventResult`]s. Payload decoding (names, signal strength) is the stack's
//! job; backends only map its reports onto [`AdvertisementEvent`]s and reject
//! reports that cannot become one.
//!
//! [`AdvertisementEvent`]: crate::advertisement::AdvertisementEvent

#[cfg(feature = "bluer")]
pub mod bluer;

pub mod replay;

use crate::advertisement::EventResult;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel buffer size for advertisement events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Error type for starting a source.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The replay input could not be opened
    #[error("cannot open replay input {path}: {source}")]
    ReplayInput { path: PathBuf, source: io::Error },
}

/// Available source backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Recorded events, one JSON object per line
    Replay,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(not(feature = "bluer"))]
        return Backend::Replay;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            Backend::Replay => write!(f, "replay"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            "replay" | "file" => Ok(Backend::Replay),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// A configured source: the backend plus anything it needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    #[cfg(feature = "bluer")]
    Bluer,
    /// Replay from a file, or stdin when the path is `-`
    Replay(PathBuf),
}

impl Source {
    pub fn new(backend: Backend, input: PathBuf) -> Self {
        match backend {
            #[cfg(feature = "bluer")]
            Backend::Bluer => Source::Bluer,
            Backend::Replay => Source::Replay(input),
        }
    }
}

/// Start delivering events from `source`.
///
/// The returned receiver yields events (and rejected reports) until the source
/// is exhausted; the live backend never ends on its own.
pub async fn start_scan(source: Source) -> Result<mpsc::Receiver<EventResult>, ScanError> {
    match source {
        #[cfg(feature = "bluer")]
        Source::Bluer => bluer::start_scan().await,
        Source::Replay(path) => replay::start_scan(path).await,
    }
}
