//! Replay backend: recorded events as JSON lines.
//!
//! Each non-blank line is one advertisement:
//!
//! ```text
//! {"address": "AA:BB:CC:DD:EE:FF", "name": "Foo", "rssi": -48, "timestamp_ms": 1700000000000}
//! ```
//!
//! `name` and `timestamp_ms` are optional; a record without a timestamp is
//! stamped with the time it is read. Lines starting with `#` are comments.
//! Lines that do not describe a valid event are reported as
//! [`EventError`]s and never reach the aggregator.

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{AdvertisementEvent, EventError, EventResult};
use crate::mac_address::MacAddress;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One recorded advertisement as it appears on the wire.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    address: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    rssi: Option<i16>,
    #[serde(default)]
    timestamp_ms: Option<u64>,
}

/// Parse line `line_no` (1-based). Returns `None` for blank and comment lines.
pub fn parse_line(line_no: usize, line: &str, now: SystemTime) -> Option<EventResult> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let invalid = |reason: String| EventError::InvalidRecord {
        line: line_no,
        reason,
    };

    let result = serde_json::from_str::<ReplayRecord>(line)
        .map_err(|e| invalid(e.to_string()))
        .and_then(|record| {
            let identity: MacAddress = record
                .address
                .parse()
                .map_err(|e: crate::mac_address::ParseMacError| invalid(e.to_string()))?;
            let rssi = record.rssi.ok_or(EventError::MissingRssi(identity))?;
            let observed_at = record
                .timestamp_ms
                .map_or(now, |ms| SystemTime::UNIX_EPOCH + Duration::from_millis(ms));
            Ok(AdvertisementEvent::new(identity, record.name, rssi, observed_at))
        });

    Some(result)
}

/// Start replaying from `path`, or from stdin when `path` is `-`.
///
/// The channel closes once the input is exhausted.
pub async fn start_scan(path: PathBuf) -> Result<mpsc::Receiver<EventResult>, ScanError> {
    let input: Box<dyn AsyncRead + Unpin + Send> = if path.as_os_str() == "-" {
        Box::new(tokio::io::stdin())
    } else {
        let file = File::open(&path)
            .await
            .map_err(|source| ScanError::ReplayInput {
                path: path.clone(),
                source,
            })?;
        Box::new(file)
    };

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
    info!(input = %path.display(), "replaying recorded advertisements");

    tokio::spawn(async move {
        replay_lines(input, tx).await;
    });

    Ok(rx)
}

async fn replay_lines<R: AsyncRead + Unpin>(input: R, tx: mpsc::Sender<EventResult>) {
    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "replay input failed, stopping");
                break;
            }
        };
        line_no += 1;

        if let Some(result) = parse_line(line_no, &line, SystemTime::now())
            && tx.send(result).await.is_err()
        {
            break;
        }
    }

    info!(lines = line_no, "replay finished");
}
