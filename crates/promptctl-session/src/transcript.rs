//! Session transcripts in asciinema v2 format.
//!
//! A [`Transcript`] is an [`OutputSink`] that timestamps the process output
//! and the commands sent to it, so a controlled session can be replayed with
//! `asciinema play`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use promptctl_core::{Dimensions, Result};

use crate::sink::OutputSink;

/// Asciinema v2 header line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastHeader {
    /// Format version (always 2)
    pub version: u8,
    /// Terminal width
    pub width: u16,
    /// Terminal height
    pub height: u16,
    /// Unix timestamp of recording start
    pub timestamp: Option<i64>,
    /// Command that was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

/// Direction of a transcript event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Bytes read from the process
    Output,
    /// Bytes written to the process
    Input,
}

impl EventKind {
    fn code(self) -> &'static str {
        match self {
            Self::Output => "o",
            Self::Input => "i",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "o" => Some(Self::Output),
            "i" => Some(Self::Input),
            _ => None,
        }
    }
}

/// One timestamped chunk of traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct CastEvent {
    /// Seconds since the recording started
    pub time: f64,
    /// Direction
    pub kind: EventKind,
    /// Text, lossily decoded as UTF-8
    pub data: String,
}

/// Records a session in asciinema v2 format.
///
/// Output arrives one byte at a time; consecutive output bytes are coalesced
/// into one event per prompt wait.
///
/// # Example
///
/// ```
/// use promptctl_core::Dimensions;
/// use promptctl_session::{OutputSink, Transcript};
///
/// let mut transcript = Transcript::new(Dimensions::new(24, 80));
/// transcript.write_output(b"(gdb) ");
/// transcript.record_input(b"break main\n");
///
/// let cast = transcript.render().unwrap();
/// assert!(cast.starts_with("{\"version\":2"));
/// ```
#[derive(Debug)]
pub struct Transcript {
    events: Vec<CastEvent>,
    pending: Vec<u8>,
    pending_since: f64,
    start_time: Instant,
    dimensions: Dimensions,
    command: Option<String>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            events: Vec::new(),
            pending: Vec::new(),
            pending_since: 0.0,
            start_time: Instant::now(),
            dimensions,
            command: None,
        }
    }

    /// Record the command line in the header.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Recorded events, not counting output still being coalesced.
    pub fn events(&self) -> &[CastEvent] {
        &self.events
    }

    /// Number of recorded events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Time offset of the last event, in seconds.
    pub fn duration(&self) -> f64 {
        self.events.last().map(|e| e.time).unwrap_or(0.0)
    }

    fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let data = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.events.push(CastEvent {
            time: self.pending_since,
            kind: EventKind::Output,
            data,
        });
    }

    fn header(&self) -> CastHeader {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .ok();

        CastHeader {
            version: 2,
            width: self.dimensions.cols,
            height: self.dimensions.rows,
            timestamp,
            command: self.command.clone(),
            env: None,
        }
    }

    /// Write the transcript in asciinema v2 format.
    ///
    /// - Line 1: JSON header
    /// - Line 2+: JSON event arrays `[time, code, data]`
    pub fn save_to_writer<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        self.flush_pending();

        serde_json::to_writer(&mut *writer, &self.header())?;
        writeln!(writer)?;

        for event in &self.events {
            let event_array = serde_json::json!([event.time, event.kind.code(), event.data]);
            serde_json::to_writer(&mut *writer, &event_array)?;
            writeln!(writer)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Save the transcript to `path`.
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        self.save_to_writer(&mut file)?;
        info!(
            "Saved transcript with {} events to {}",
            self.events.len(),
            path.display()
        );
        Ok(())
    }

    /// Render the transcript as a string.
    pub fn render(&mut self) -> Result<String> {
        let mut buffer = Vec::new();
        self.save_to_writer(&mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }
}

impl OutputSink for Transcript {
    fn write_output(&mut self, bytes: &[u8]) {
        if self.pending.is_empty() {
            self.pending_since = self.elapsed();
        }
        self.pending.extend_from_slice(bytes);
    }

    fn record_input(&mut self, bytes: &[u8]) {
        self.flush_pending();
        let time = self.elapsed();
        self.events.push(CastEvent {
            time,
            kind: EventKind::Input,
            data: String::from_utf8_lossy(bytes).into_owned(),
        });
    }

    fn flush(&mut self) {
        self.flush_pending();
    }
}

impl FromStr for Transcript {
    type Err = io::Error;

    /// Parse an asciinema v2 recording. Events of unknown kinds are skipped.
    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = |e: serde_json::Error| io::Error::new(io::ErrorKind::InvalidData, e);
        let mut lines = content.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Empty recording file"))?;
        let header: CastHeader = serde_json::from_str(header_line).map_err(invalid)?;

        let mut events = Vec::new();
        for line in lines.filter(|line| !line.trim().is_empty()) {
            let (time, code, data): (f64, String, String) =
                serde_json::from_str(line).map_err(invalid)?;
            if let Some(kind) = EventKind::from_code(&code) {
                events.push(CastEvent { time, kind, data });
            }
        }

        Ok(Self {
            events,
            pending: Vec::new(),
            pending_since: 0.0,
            start_time: Instant::now(),
            dimensions: Dimensions::new(header.height, header.width),
            command: header.command,
        })
    }
}
