//! Renderers for snapshots.
//!
//! A [`OutputFormatter`] turns one [`Snapshot`] into text. [`WriterSink`]
//! pairs a formatter with a writer so the scheduler can drive it directly.

pub mod influxdb;
pub mod json;
pub mod text;

use crate::aggregator::Snapshot;
use crate::scheduler::{SinkError, SnapshotSink};
use std::io::Write;

/// Trait for formatting snapshots into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Render every device in `snapshot`. An empty string means there is
    /// nothing to write for this snapshot.
    fn format(&self, snapshot: &Snapshot) -> String;
}

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human readable table
    #[default]
    Text,
    /// One JSON array per snapshot
    Json,
    /// InfluxDB line protocol, one line per device
    Influxdb,
}

impl Format {
    pub fn formatter(self, measurement_name: &str) -> Box<dyn OutputFormatter> {
        match self {
            Format::Text => Box::new(text::TextFormatter),
            Format::Json => Box::new(json::JsonFormatter),
            Format::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(
                measurement_name.to_string(),
            )),
        }
    }
}

/// Writes each snapshot through a formatter, flushing after every one.
pub struct WriterSink<W> {
    formatter: Box<dyn OutputFormatter>,
    writer: W,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(formatter: Box<dyn OutputFormatter>, writer: W) -> Self {
        Self { formatter, writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> SnapshotSink for WriterSink<W> {
    fn consume(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let output = self.formatter.format(snapshot);
        if !output.is_empty() {
            writeln!(self.writer, "{output}")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
